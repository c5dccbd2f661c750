//! Orchestration Integration Tests
//!
//! The orchestrator driven end to end over the in-memory store and queue.

pub mod orchestrator_test;
pub mod worker_pool_test;
