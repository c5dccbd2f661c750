//! Resume point for re-injected jobs.
//!
//! A failed job is resumed at the stage following the furthest stage whose output is
//! recorded in its payload refs. Only declared payload presence is consulted; error
//! text and the failed state are ignored. A job that already holds a document is
//! resumed at generation (regenerate) rather than skipped to completion.

use super::states::Stage;
use crate::models::PayloadRefs;

pub fn resume_stage(refs: &PayloadRefs) -> Stage {
    match refs.highest_populated() {
        None => Stage::Recognition,
        Some(stage) => stage.next().unwrap_or(Stage::Generation),
    }
}
