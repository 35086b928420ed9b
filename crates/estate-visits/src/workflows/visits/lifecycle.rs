//! Visit status state machine and the cancellation window policy.
//!
//! ```text
//! PENDING   -> CONFIRMED | REJECTED | CANCELLED
//! CONFIRMED -> CANCELLED | COMPLETED
//! ```

use chrono::{DateTime, Duration, Utc};

use super::domain::{CallerRole, Visit, VisitStatus};
use super::error::VisitRejection;

/// Statuses reachable from `from` in a single step.
pub const fn allowed_transitions(from: VisitStatus) -> &'static [VisitStatus] {
    match from {
        VisitStatus::Pending => &[
            VisitStatus::Confirmed,
            VisitStatus::Rejected,
            VisitStatus::Cancelled,
        ],
        VisitStatus::Confirmed => &[VisitStatus::Cancelled, VisitStatus::Completed],
        VisitStatus::Rejected | VisitStatus::Cancelled | VisitStatus::Completed => &[],
    }
}

pub fn can_transition(from: VisitStatus, to: VisitStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

pub fn ensure_transition(from: VisitStatus, to: VisitStatus) -> Result<(), VisitRejection> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(VisitRejection::IllegalTransition { from, to })
    }
}

/// Last instant at which the requesting user may still cancel a confirmed visit
/// (exclusive). `None` when the cutoff reaches past the representable range,
/// which leaves no window at all.
pub fn cancellation_deadline(visit: &Visit, cutoff_hours: u32) -> Option<DateTime<Utc>> {
    visit
        .start_time
        .checked_sub_signed(Duration::hours(i64::from(cutoff_hours)))
}

/// Only the requesting user is bound by the cutoff; agents and operators are
/// already authorized by the time this runs.
pub fn ensure_cancellable(
    visit: &Visit,
    role: CallerRole,
    now: DateTime<Utc>,
    cutoff_hours: u32,
) -> Result<(), VisitRejection> {
    match visit.status {
        VisitStatus::Pending => Ok(()),
        VisitStatus::Confirmed => match role {
            CallerRole::RequestingUser => match cancellation_deadline(visit, cutoff_hours) {
                Some(deadline) if now < deadline => Ok(()),
                _ => Err(VisitRejection::CancellationCutoff { cutoff_hours }),
            },
            CallerRole::Agent | CallerRole::Operator => Ok(()),
        },
        from => Err(VisitRejection::IllegalTransition {
            from,
            to: VisitStatus::Cancelled,
        }),
    }
}
