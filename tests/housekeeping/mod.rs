//! Housekeeping Integration Tests

pub mod tasks_test;
