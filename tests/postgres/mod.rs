//! PostgreSQL Backend Tests
//!
//! Each test gets a fresh database with the embedded migrations applied. They need a
//! running server:
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/stagehand_test cargo test postgres -- --ignored
//! ```

pub mod queue_test;
pub mod store_test;
