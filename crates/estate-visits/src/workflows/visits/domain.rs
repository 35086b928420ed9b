use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_identifier!(
    /// Identifier of a booked property viewing.
    VisitId
);
uuid_identifier!(
    /// Opaque reference to a listed property.
    PropertyId
);
uuid_identifier!(
    /// The account requesting a viewing.
    UserId
);
uuid_identifier!(
    /// The agent conducting a viewing.
    AgentId
);
uuid_identifier!(SlotId);

/// Half-open time interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Returns `None` unless `end` is strictly after `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when `self` fully contains `other`.
    pub fn covers(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Lifecycle of a visit. `Pending` is the only initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
}

impl VisitStatus {
    pub const fn label(self) -> &'static str {
        match self {
            VisitStatus::Pending => "PENDING",
            VisitStatus::Confirmed => "CONFIRMED",
            VisitStatus::Rejected => "REJECTED",
            VisitStatus::Cancelled => "CANCELLED",
            VisitStatus::Completed => "COMPLETED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            VisitStatus::Rejected | VisitStatus::Cancelled | VisitStatus::Completed
        )
    }
}

impl fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown visit status '{0}'")]
pub struct UnknownVisitStatus(pub String);

impl FromStr for VisitStatus {
    type Err = UnknownVisitStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(VisitStatus::Pending),
            "CONFIRMED" => Ok(VisitStatus::Confirmed),
            "REJECTED" => Ok(VisitStatus::Rejected),
            "CANCELLED" => Ok(VisitStatus::Cancelled),
            "COMPLETED" => Ok(VisitStatus::Completed),
            _ => Err(UnknownVisitStatus(value.to_string())),
        }
    }
}

/// Role of the caller as established by the authorization layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallerRole {
    RequestingUser,
    Agent,
    Operator,
}

/// A property viewing: one property, one requester, one agent, one interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    pub id: VisitId,
    pub property_id: PropertyId,
    pub user_id: UserId,
    pub agent_id: AgentId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: VisitStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Visit {
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_time,
            end: self.end_time,
        }
    }
}

/// Booking request as received from callers; the interval bounds may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRequest {
    pub property_id: PropertyId,
    pub agent_id: AgentId,
    pub user_id: UserId,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

/// Agent-declared open window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySlot {
    pub id: SlotId,
    pub agent_id: AgentId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl AvailabilitySlot {
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_time,
            end: self.end_time,
        }
    }
}
