use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::domain::{AgentId, AvailabilitySlot, SlotId, TimeWindow};
use super::repository::{AvailabilityStore, RepositoryError};

/// Lets agents declare and withdraw the windows in which they accept visits.
pub struct AvailabilityService<A> {
    store: Arc<A>,
}

impl<A> AvailabilityService<A>
where
    A: AvailabilityStore + 'static,
{
    pub fn new(store: Arc<A>) -> Self {
        Self { store }
    }

    /// Declare a new open window. Slots of one agent never overlap.
    pub async fn declare_slot(
        &self,
        agent_id: AgentId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AvailabilitySlot, AvailabilityServiceError> {
        let window = TimeWindow::new(start, end).ok_or(SlotRejection::InvalidInterval)?;

        let existing = self.store.overlapping_slots(agent_id, window).await?;
        if let Some(slot) = existing.first() {
            return Err(SlotRejection::SlotOverlap { existing: slot.id }.into());
        }

        let slot = AvailabilitySlot {
            id: SlotId::new(),
            agent_id,
            start_time: start,
            end_time: end,
        };
        self.store.insert_slot(&slot).await?;
        info!(slot_id = %slot.id, %agent_id, %start, %end, "availability declared");
        Ok(slot)
    }

    pub async fn remove_slot(&self, slot_id: SlotId) -> Result<(), AvailabilityServiceError> {
        if !self.store.delete_slot(slot_id).await? {
            return Err(SlotRejection::SlotNotFound(slot_id).into());
        }
        info!(%slot_id, "availability withdrawn");
        Ok(())
    }

    pub async fn slots_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Vec<AvailabilitySlot>, AvailabilityServiceError> {
        Ok(self.store.slots_for_agent(agent_id).await?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotRejection {
    #[error("end time must be after start time")]
    InvalidInterval,
    #[error("slot overlaps existing availability {existing}")]
    SlotOverlap { existing: SlotId },
    #[error("availability slot {0} not found")]
    SlotNotFound(SlotId),
}

impl SlotRejection {
    pub const fn kind(&self) -> &'static str {
        match self {
            SlotRejection::InvalidInterval => "INVALID_INTERVAL",
            SlotRejection::SlotOverlap { .. } => "SLOT_OVERLAP",
            SlotRejection::SlotNotFound(_) => "NOT_FOUND",
        }
    }

    pub const fn field(&self) -> &'static str {
        match self {
            SlotRejection::InvalidInterval => "endTime",
            SlotRejection::SlotOverlap { .. } => "startTime",
            SlotRejection::SlotNotFound(_) => "slotId",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AvailabilityServiceError {
    #[error(transparent)]
    Rejected(#[from] SlotRejection),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
