//! Notification Hub Integration Tests

pub mod hub_test;
