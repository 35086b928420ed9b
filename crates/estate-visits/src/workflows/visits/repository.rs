use async_trait::async_trait;
use uuid::Uuid;

use super::domain::{
    AgentId, AvailabilitySlot, PropertyId, SlotId, TimeWindow, UserId, Visit, VisitId, VisitStatus,
};

/// Storage abstraction for visits. Every engine read happens inside a transaction.
#[async_trait]
pub trait VisitStore: Send + Sync {
    type Tx: VisitTransaction;

    /// Open a unit of work; locks taken through it are held until commit or rollback.
    async fn begin(&self) -> Result<Self::Tx, RepositoryError>;

    async fn fetch(&self, id: VisitId) -> Result<Option<Visit>, RepositoryError>;
    async fn for_user(&self, user_id: UserId) -> Result<Vec<Visit>, RepositoryError>;
    async fn for_agent(&self, agent_id: AgentId) -> Result<Vec<Visit>, RepositoryError>;
    async fn for_property(&self, property_id: PropertyId) -> Result<Vec<Visit>, RepositoryError>;
}

/// Owner keys that serialize writers touching the same user, agent or property.
///
/// The derived order is the acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Property(PropertyId),
    User(UserId),
    Agent(AgentId),
}

impl LockKey {
    pub fn scope(&self) -> &'static str {
        match self {
            LockKey::Property(_) => "property",
            LockKey::User(_) => "user",
            LockKey::Agent(_) => "agent",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            LockKey::Property(id) => id.0,
            LockKey::User(id) => id.0,
            LockKey::Agent(id) => id.0,
        }
    }
}

/// Row counts for cap checks. Counts past `u32::MAX` stay at the maximum so
/// the checks keep rejecting.
pub(crate) fn saturating_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Lock-acquiring queries and writes executed within one atomic unit.
///
/// Every read method takes write-intent locks on what it reads (and on the
/// owner key it filters by) so a concurrent writer for the same user, agent or
/// property waits until this transaction ends. Callers declare all owner keys
/// through [`VisitTransaction::lock_keys`] before the first read; the reads
/// then re-enter keys already held.
#[async_trait]
pub trait VisitTransaction: Send {
    /// Acquire every key in `keys` in [`LockKey`] order, held until the
    /// transaction ends.
    async fn lock_keys(&mut self, keys: &[LockKey]) -> Result<(), RepositoryError>;

    /// Visits of `user_id` in `status` overlapping `window`, other than `exclude`.
    async fn overlapping_for_user(
        &mut self,
        user_id: UserId,
        status: VisitStatus,
        window: TimeWindow,
        exclude: Option<VisitId>,
    ) -> Result<Vec<Visit>, RepositoryError>;

    async fn overlapping_for_agent(
        &mut self,
        agent_id: AgentId,
        status: VisitStatus,
        window: TimeWindow,
    ) -> Result<Vec<Visit>, RepositoryError>;

    /// Confirmed visits on `property_id` overlapping `window`, excluding `exclude`.
    async fn count_confirmed_for_property(
        &mut self,
        property_id: PropertyId,
        window: TimeWindow,
        exclude: VisitId,
    ) -> Result<u32, RepositoryError>;

    /// Distinct properties other than `property_id` on which the agent holds
    /// confirmed visits overlapping `window`.
    async fn count_distinct_other_properties_for_agent(
        &mut self,
        agent_id: AgentId,
        property_id: PropertyId,
        window: TimeWindow,
    ) -> Result<u32, RepositoryError>;

    /// Load a visit and lock its row for the rest of the transaction.
    async fn lock_visit(&mut self, id: VisitId) -> Result<Option<Visit>, RepositoryError>;

    async fn insert_visit(&mut self, visit: &Visit) -> Result<(), RepositoryError>;
    async fn update_visit(&mut self, visit: &Visit) -> Result<(), RepositoryError>;

    async fn commit(self) -> Result<(), RepositoryError>;
    async fn rollback(self) -> Result<(), RepositoryError>;
}

/// Agent-declared open windows. Read-only for the booking flow.
#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    /// A declared slot fully covering `window`, if any.
    async fn covering_slot(
        &self,
        agent_id: AgentId,
        window: TimeWindow,
    ) -> Result<Option<AvailabilitySlot>, RepositoryError>;

    /// Declared slots overlapping or covering `window`.
    async fn overlapping_slots(
        &self,
        agent_id: AgentId,
        window: TimeWindow,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError>;

    async fn insert_slot(&self, slot: &AvailabilitySlot) -> Result<(), RepositoryError>;
    async fn delete_slot(&self, id: SlotId) -> Result<bool, RepositoryError>;
    async fn slots_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("timed out waiting for a lock; retry the request")]
    LockTimeout,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::LockTimeout)
    }
}
