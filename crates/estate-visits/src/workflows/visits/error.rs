use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::domain::{VisitId, VisitStatus};
use super::repository::RepositoryError;

/// Business-rule rejections raised by the validation engine and the state machine.
///
/// Each variant names the request field it concerns so callers can render a
/// `{ field: message }` map next to the offending input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VisitRejection {
    #[error("start time and end time are both required")]
    MissingInterval,
    #[error("end time must be after start time")]
    InvalidInterval,
    #[error("visits must start on or after {earliest}")]
    TooSoon { earliest: NaiveDate },
    #[error("user already has a confirmed visit overlapping this time (visit {conflicting})")]
    UserOverlap { conflicting: VisitId },
    #[error("agent already has a confirmed visit overlapping this time (visit {conflicting})")]
    AgentDoubleBooked { conflicting: VisitId },
    #[error("agent has not declared availability covering this time")]
    AgentNotAvailable,
    #[error("agent availability could not be verified: {reason}")]
    AvailabilityCheckFailed { reason: String },
    #[error("{message}")]
    Overbooking { field: &'static str, message: String },
    #[error("visit cannot move from {from} to {to}")]
    IllegalTransition { from: VisitStatus, to: VisitStatus },
    #[error("confirmed visits can only be cancelled more than {cutoff_hours} hours before they start")]
    CancellationCutoff { cutoff_hours: u32 },
    #[error("visit {0} not found")]
    NotFound(VisitId),
}

impl VisitRejection {
    pub const fn kind(&self) -> &'static str {
        match self {
            VisitRejection::MissingInterval => "MISSING_INTERVAL",
            VisitRejection::InvalidInterval => "INVALID_INTERVAL",
            VisitRejection::TooSoon { .. } => "TOO_SOON",
            VisitRejection::UserOverlap { .. } => "USER_OVERLAP",
            VisitRejection::AgentDoubleBooked { .. } => "AGENT_DOUBLE_BOOKED",
            VisitRejection::AgentNotAvailable => "AGENT_NOT_AVAILABLE",
            VisitRejection::AvailabilityCheckFailed { .. } => "AVAILABILITY_CHECK_FAILED",
            VisitRejection::Overbooking { .. } => "OVERBOOKING",
            VisitRejection::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            VisitRejection::CancellationCutoff { .. } => "CANCELLATION_CUTOFF",
            VisitRejection::NotFound(_) => "NOT_FOUND",
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            VisitRejection::MissingInterval
            | VisitRejection::TooSoon { .. }
            | VisitRejection::CancellationCutoff { .. } => "startTime",
            VisitRejection::InvalidInterval => "endTime",
            VisitRejection::UserOverlap { .. } => "userId",
            VisitRejection::AgentDoubleBooked { .. } | VisitRejection::AgentNotAvailable => {
                "agentId"
            }
            VisitRejection::AvailabilityCheckFailed { .. } => "availability",
            VisitRejection::Overbooking { field, .. } => *field,
            VisitRejection::IllegalTransition { .. } => "status",
            VisitRejection::NotFound(_) => "visitId",
        }
    }

    pub fn errors(&self) -> BTreeMap<String, String> {
        let mut errors = BTreeMap::new();
        errors.insert(self.field().to_string(), self.to_string());
        errors
    }
}

/// Error raised by the visit orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum VisitServiceError {
    #[error(transparent)]
    Rejected(#[from] VisitRejection),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl VisitServiceError {
    pub fn rejection(&self) -> Option<&VisitRejection> {
        match self {
            VisitServiceError::Rejected(rejection) => Some(rejection),
            VisitServiceError::Repository(_) => None,
        }
    }
}
