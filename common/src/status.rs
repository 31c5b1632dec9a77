use serde::{Deserialize, Serialize};

/// Lifecycle of the location lookup attached to one photo
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackingState {
    /// Captured, lookup not started yet
    #[default]
    Pending,
    Tracking,
    Resolved,
    Failed,
}

impl TrackingState {
    /// Resolved or Failed: nothing is in flight for this photo any more.
    pub fn is_settled(&self) -> bool {
        matches!(self, TrackingState::Resolved | TrackingState::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelfieState {
    #[default]
    NotStarted,
    Capturing,
    Captured,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPhase {
    #[default]
    Idle,
    AwaitingLocations,
    Uploading,
    Sending,
    Done,
    Cancelled,
}

impl SubmissionPhase {
    /// Whether the progress modal is on screen for this phase
    pub fn shows_modal(&self) -> bool {
        matches!(
            self,
            SubmissionPhase::AwaitingLocations | SubmissionPhase::Uploading | SubmissionPhase::Sending
        )
    }
}
