//! Single-process stores for development and tests.
//!
//! A transaction owns the whole visit table until it commits or rolls back,
//! which serializes every booking and confirmation inside one process. Use
//! the PostgreSQL store when several instances share data.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::domain::{
    AgentId, AvailabilitySlot, PropertyId, SlotId, TimeWindow, UserId, Visit, VisitId, VisitStatus,
};
use super::repository::{
    saturating_count, AvailabilityStore, LockKey, RepositoryError, VisitStore, VisitTransaction,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

type VisitTable = HashMap<VisitId, Visit>;

#[derive(Clone)]
pub struct InMemoryVisitStore {
    visits: Arc<AsyncMutex<VisitTable>>,
    lock_timeout: Duration,
}

impl Default for InMemoryVisitStore {
    fn default() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }
}

impl InMemoryVisitStore {
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            visits: Arc::new(AsyncMutex::new(HashMap::new())),
            lock_timeout,
        }
    }

    /// Seed a visit directly, bypassing the booking rules.
    pub async fn seed(&self, visit: Visit) {
        self.visits.lock().await.insert(visit.id, visit);
    }

    async fn select<F>(&self, predicate: F) -> Vec<Visit>
    where
        F: Fn(&Visit) -> bool,
    {
        let guard = self.visits.lock().await;
        let mut visits: Vec<Visit> = guard.values().filter(|v| predicate(v)).cloned().collect();
        visits.sort_by_key(|v| (v.start_time, v.id));
        visits
    }
}

#[async_trait]
impl VisitStore for InMemoryVisitStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, RepositoryError> {
        let guard = tokio::time::timeout(self.lock_timeout, self.visits.clone().lock_owned())
            .await
            .map_err(|_| RepositoryError::LockTimeout)?;
        Ok(InMemoryTransaction {
            table: guard,
            staged: HashMap::new(),
        })
    }

    async fn fetch(&self, id: VisitId) -> Result<Option<Visit>, RepositoryError> {
        Ok(self.visits.lock().await.get(&id).cloned())
    }

    async fn for_user(&self, user_id: UserId) -> Result<Vec<Visit>, RepositoryError> {
        Ok(self.select(|v| v.user_id == user_id).await)
    }

    async fn for_agent(&self, agent_id: AgentId) -> Result<Vec<Visit>, RepositoryError> {
        Ok(self.select(|v| v.agent_id == agent_id).await)
    }

    async fn for_property(&self, property_id: PropertyId) -> Result<Vec<Visit>, RepositoryError> {
        Ok(self.select(|v| v.property_id == property_id).await)
    }
}

/// Writes are staged and only reach the table on commit.
pub struct InMemoryTransaction {
    table: OwnedMutexGuard<VisitTable>,
    staged: HashMap<VisitId, Visit>,
}

impl InMemoryTransaction {
    fn rows(&self) -> impl Iterator<Item = &Visit> {
        let staged = &self.staged;
        self.table
            .values()
            .filter(move |v| !staged.contains_key(&v.id))
            .chain(staged.values())
    }

    fn overlapping<F>(&self, status: VisitStatus, window: TimeWindow, owner: F) -> Vec<Visit>
    where
        F: Fn(&Visit) -> bool,
    {
        let mut hits: Vec<Visit> = self
            .rows()
            .filter(|v| v.status == status && owner(v) && v.window().overlaps(&window))
            .cloned()
            .collect();
        hits.sort_by_key(|v| (v.start_time, v.id));
        hits
    }
}

#[async_trait]
impl VisitTransaction for InMemoryTransaction {
    async fn lock_keys(&mut self, _keys: &[LockKey]) -> Result<(), RepositoryError> {
        // The table guard already excludes every other transaction.
        Ok(())
    }

    async fn overlapping_for_user(
        &mut self,
        user_id: UserId,
        status: VisitStatus,
        window: TimeWindow,
        exclude: Option<VisitId>,
    ) -> Result<Vec<Visit>, RepositoryError> {
        Ok(self.overlapping(status, window, |v| {
            v.user_id == user_id && Some(v.id) != exclude
        }))
    }

    async fn overlapping_for_agent(
        &mut self,
        agent_id: AgentId,
        status: VisitStatus,
        window: TimeWindow,
    ) -> Result<Vec<Visit>, RepositoryError> {
        Ok(self.overlapping(status, window, |v| v.agent_id == agent_id))
    }

    async fn count_confirmed_for_property(
        &mut self,
        property_id: PropertyId,
        window: TimeWindow,
        exclude: VisitId,
    ) -> Result<u32, RepositoryError> {
        let hits = self.overlapping(VisitStatus::Confirmed, window, |v| {
            v.property_id == property_id && v.id != exclude
        });
        Ok(saturating_count(hits.len()))
    }

    async fn count_distinct_other_properties_for_agent(
        &mut self,
        agent_id: AgentId,
        property_id: PropertyId,
        window: TimeWindow,
    ) -> Result<u32, RepositoryError> {
        let properties: BTreeSet<PropertyId> = self
            .overlapping(VisitStatus::Confirmed, window, |v| {
                v.agent_id == agent_id && v.property_id != property_id
            })
            .into_iter()
            .map(|v| v.property_id)
            .collect();
        Ok(saturating_count(properties.len()))
    }

    async fn lock_visit(&mut self, id: VisitId) -> Result<Option<Visit>, RepositoryError> {
        Ok(self
            .staged
            .get(&id)
            .or_else(|| self.table.get(&id))
            .cloned())
    }

    async fn insert_visit(&mut self, visit: &Visit) -> Result<(), RepositoryError> {
        if self.staged.contains_key(&visit.id) || self.table.contains_key(&visit.id) {
            return Err(RepositoryError::Conflict);
        }
        self.staged.insert(visit.id, visit.clone());
        Ok(())
    }

    async fn update_visit(&mut self, visit: &Visit) -> Result<(), RepositoryError> {
        if !self.staged.contains_key(&visit.id) && !self.table.contains_key(&visit.id) {
            return Err(RepositoryError::NotFound);
        }
        self.staged.insert(visit.id, visit.clone());
        Ok(())
    }

    async fn commit(mut self) -> Result<(), RepositoryError> {
        let staged = std::mem::take(&mut self.staged);
        self.table.extend(staged);
        Ok(())
    }

    async fn rollback(self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryAvailabilityStore {
    slots: Arc<Mutex<Vec<AvailabilitySlot>>>,
}

impl InMemoryAvailabilityStore {
    fn guard(&self) -> Result<MutexGuard<'_, Vec<AvailabilitySlot>>, RepositoryError> {
        self.slots
            .lock()
            .map_err(|_| RepositoryError::Unavailable("availability store poisoned".into()))
    }

    fn matching<F>(&self, predicate: F) -> Result<Vec<AvailabilitySlot>, RepositoryError>
    where
        F: Fn(&AvailabilitySlot) -> bool,
    {
        let guard = self.guard()?;
        let mut slots: Vec<AvailabilitySlot> =
            guard.iter().filter(|s| predicate(s)).cloned().collect();
        slots.sort_by_key(|s| s.start_time);
        Ok(slots)
    }
}

#[async_trait]
impl AvailabilityStore for InMemoryAvailabilityStore {
    async fn covering_slot(
        &self,
        agent_id: AgentId,
        window: TimeWindow,
    ) -> Result<Option<AvailabilitySlot>, RepositoryError> {
        Ok(self
            .matching(|s| s.agent_id == agent_id && s.window().covers(&window))?
            .into_iter()
            .next())
    }

    async fn overlapping_slots(
        &self,
        agent_id: AgentId,
        window: TimeWindow,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        self.matching(|s| s.agent_id == agent_id && s.window().overlaps(&window))
    }

    async fn insert_slot(&self, slot: &AvailabilitySlot) -> Result<(), RepositoryError> {
        let mut guard = self.guard()?;
        if guard.iter().any(|s| s.id == slot.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.push(slot.clone());
        Ok(())
    }

    async fn delete_slot(&self, id: SlotId) -> Result<bool, RepositoryError> {
        let mut guard = self.guard()?;
        let before = guard.len();
        guard.retain(|s| s.id != id);
        Ok(guard.len() != before)
    }

    async fn slots_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        self.matching(|s| s.agent_id == agent_id)
    }
}

