use serde::{Deserialize, Serialize};
use std::fmt;

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, not yet picked up
    Pending,
    /// Recognition stage executing
    Stage1Running,
    /// Lookup stage executing
    Stage2Running,
    /// Delivery confirmation stage executing
    Stage3Running,
    /// Delivery confirmed, waiting for document generation
    Stage3Done,
    /// Document generation executing
    Stage4Running,
    /// All stages finished
    Completed,
    /// Terminal failure
    Failed,
    /// Lookup/confirmation reported a domain-level return; no further stages
    Returned,
}

impl JobState {
    pub const ALL: [JobState; 9] = [
        Self::Pending,
        Self::Stage1Running,
        Self::Stage2Running,
        Self::Stage3Running,
        Self::Stage3Done,
        Self::Stage4Running,
        Self::Completed,
        Self::Failed,
        Self::Returned,
    ];

    /// Check if this is a terminal state (no advancement without re-injection)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Returned)
    }

    /// Check if a stage executor runs in this state
    pub fn is_running(&self) -> bool {
        self.stage().is_some()
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Stage executed while the job sits in this state
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage1Running => Some(Stage::Recognition),
            Self::Stage2Running => Some(Stage::Lookup),
            Self::Stage3Running => Some(Stage::Confirmation),
            Self::Stage4Running => Some(Stage::Generation),
            _ => None,
        }
    }

    /// Progress shown to the job owner. `Failed` has no fixed value, see
    /// [`crate::models::Job::progress_percent`].
    pub fn progress_percent(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Stage1Running => Some(20),
            Self::Stage2Running => Some(40),
            Self::Stage3Running => Some(50),
            Self::Stage3Done => Some(60),
            Self::Stage4Running => Some(80),
            Self::Completed | Self::Returned => Some(100),
            Self::Failed => None,
        }
    }

    pub fn non_terminal() -> Vec<JobState> {
        Self::ALL.into_iter().filter(|s| !s.is_terminal()).collect()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Stage1Running => write!(f, "stage1_running"),
            Self::Stage2Running => write!(f, "stage2_running"),
            Self::Stage3Running => write!(f, "stage3_running"),
            Self::Stage3Done => write!(f, "stage3_done"),
            Self::Stage4Running => write!(f, "stage4_running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Returned => write!(f, "returned"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "stage1_running" => Ok(Self::Stage1Running),
            "stage2_running" => Ok(Self::Stage2Running),
            "stage3_running" => Ok(Self::Stage3Running),
            "stage3_done" => Ok(Self::Stage3Done),
            "stage4_running" => Ok(Self::Stage4Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "returned" => Ok(Self::Returned),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::Pending
    }
}

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Recognition,
    Lookup,
    Confirmation,
    Generation,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Self::Recognition,
        Self::Lookup,
        Self::Confirmation,
        Self::Generation,
    ];

    /// State the job is in while this stage executes
    pub fn running_state(&self) -> JobState {
        match self {
            Self::Recognition => JobState::Stage1Running,
            Self::Lookup => JobState::Stage2Running,
            Self::Confirmation => JobState::Stage3Running,
            Self::Generation => JobState::Stage4Running,
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Recognition => Some(Self::Lookup),
            Self::Lookup => Some(Self::Confirmation),
            Self::Confirmation => Some(Self::Generation),
            Self::Generation => None,
        }
    }

    /// Whether the stage may end the pipeline with a `Returned` outcome
    pub fn may_return(&self) -> bool {
        matches!(self, Self::Lookup | Self::Confirmation)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recognition => write!(f, "recognition"),
            Self::Lookup => write!(f, "lookup"),
            Self::Confirmation => write!(f, "confirmation"),
            Self::Generation => write!(f, "generation"),
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recognition" => Ok(Self::Recognition),
            "lookup" => Ok(Self::Lookup),
            "confirmation" => Ok(Self::Confirmation),
            "generation" => Ok(Self::Generation),
            _ => Err(format!("Invalid stage: {s}")),
        }
    }
}
