//! Recovery Integration Tests
//!
//! Recovery scans over seeded failed jobs.

pub mod recovery_scheduler_test;
