use serde::{Deserialize, Serialize};

/// Lifecycle of one job as seen by one hosting process.
///
/// PAST is terminal. A commitment (pending join ticket) is a condition on
/// an INACTIVE job, tracked next to the state, not a separate variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Inactive,
    Active,
    Suspended,
    Standby,
    Past,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Inactive => write!(f, "inactive"),
            JobState::Active => write!(f, "active"),
            JobState::Suspended => write!(f, "suspended"),
            JobState::Standby => write!(f, "standby"),
            JobState::Past => write!(f, "past"),
        }
    }
}
