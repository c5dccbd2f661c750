// Job state machine
//
// The transition table, the CAS-backed transition driver and the resume-point policy
// used when failed jobs are re-injected.

pub mod errors;
pub mod events;
pub mod job_state_machine;
pub mod resume;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::JobEvent;
pub use job_state_machine::{determine_target_state, JobStateMachine};
pub use resume::resume_stage;
pub use states::{JobState, Stage};
