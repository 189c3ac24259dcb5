//! Job status state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Processing status of a job.
///
/// The happy path runs `Received` through `Completed` in declaration order.
/// `Failed` and `Cancelled` are absorbing and reachable from any
/// non-terminal status.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Submitted by the user, not yet picked up.
    #[default]
    Received,
    /// Picked up by the pipeline driver.
    Processing,
    /// External video generation in flight.
    VeoGenerating,
    /// External video generation produced an artifact.
    VeoCompleted,
    /// Queued with the external processing service.
    QueProcessing,
    /// Final render in flight.
    Rendering,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Statuses in happy-path order.
    pub const PIPELINE: [JobStatus; 7] = [
        Self::Received,
        Self::Processing,
        Self::VeoGenerating,
        Self::VeoCompleted,
        Self::QueProcessing,
        Self::Rendering,
        Self::Completed,
    ];

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Processing => "PROCESSING",
            Self::VeoGenerating => "VEO_GENERATING",
            Self::VeoCompleted => "VEO_COMPLETED",
            Self::QueProcessing => "QUE_PROCESSING",
            Self::Rendering => "RENDERING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RECEIVED" => Some(Self::Received),
            "PROCESSING" => Some(Self::Processing),
            "VEO_GENERATING" => Some(Self::VeoGenerating),
            "VEO_COMPLETED" => Some(Self::VeoCompleted),
            "QUE_PROCESSING" => Some(Self::QueProcessing),
            "RENDERING" => Some(Self::Rendering),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Position on the happy path, `None` for `Failed`/`Cancelled`.
    pub fn stage_index(&self) -> Option<usize> {
        Self::PIPELINE.iter().position(|s| s == self)
    }

    /// The next happy-path status, if any.
    pub fn successor(&self) -> Option<JobStatus> {
        self.stage_index()
            .and_then(|idx| Self::PIPELINE.get(idx + 1))
            .copied()
    }

    /// Validate a status write.
    ///
    /// Keeping the same status is always allowed so that artifact fields can be
    /// rewritten in place. Otherwise only the immediate successor, or an
    /// excursion to `Failed`/`Cancelled` from a non-terminal status, is legal.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        match (self, target) {
            (from, to) if *from == to => true,

            // Nothing leaves a terminal state
            (Completed | Failed | Cancelled, _) => false,

            (_, Failed | Cancelled) => true,

            (from, to) => from.successor() == Some(to),
        }
    }

    /// Attempt to transition to a new status.
    pub fn transition_to(&self, target: JobStatus) -> Result<JobStatus, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
