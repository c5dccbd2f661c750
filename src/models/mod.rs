//! # Models
//!
//! Job record and the value types used to create, patch and select jobs.

pub mod job;

pub use job::{generate_correlation_id, Job, JobFilter, JobPatch, NewJob, PayloadRefs, SubjectId};
