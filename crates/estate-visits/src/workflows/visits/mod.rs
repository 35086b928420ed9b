//! Property visit scheduling: booking, confirmation and cancellation with
//! conflict detection, overbooking caps and agent availability.

pub mod availability;
pub mod clock;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod router;
pub mod service;
pub(crate) mod validation;

#[cfg(test)]
mod tests;

pub use availability::{AvailabilityService, AvailabilityServiceError, SlotRejection};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{
    AgentId, AvailabilitySlot, CallerRole, PropertyId, SlotId, TimeWindow, UnknownVisitStatus,
    UserId, Visit, VisitId, VisitRequest, VisitStatus,
};
pub use error::{VisitRejection, VisitServiceError};
pub use memory::{InMemoryAvailabilityStore, InMemoryTransaction, InMemoryVisitStore};
pub use postgres::{PgAvailabilityStore, PgSettings, PgVisitStore, PgVisitTransaction};
pub use repository::{
    AvailabilityStore, LockKey, RepositoryError, VisitStore, VisitTransaction,
};
pub use router::{visit_router, CancelRequest, SlotRequest, StatusUpdate, VisitApi};
pub use service::VisitService;
pub use validation::{SchedulingPolicy, VisitValidator};
