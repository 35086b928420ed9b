use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::visits::{
    AgentId, AvailabilityService, AvailabilitySlot, AvailabilityStore, FixedClock,
    InMemoryAvailabilityStore, InMemoryVisitStore, PropertyId, RepositoryError, SchedulingPolicy,
    SlotId, TimeWindow, UserId, Visit, VisitApi, VisitId, VisitRequest, VisitService,
    VisitStatus,
};

pub(super) type MemoryService = VisitService<InMemoryVisitStore, InMemoryAvailabilityStore>;

/// 2026-03-10 09:00 UTC, a Tuesday.
pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn tomorrow_at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 11, hour, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) struct Harness {
    pub(super) service: MemoryService,
    pub(super) store: Arc<InMemoryVisitStore>,
    pub(super) availability: Arc<InMemoryAvailabilityStore>,
    pub(super) clock: Arc<FixedClock>,
}

pub(super) fn harness() -> Harness {
    harness_with_policy(SchedulingPolicy::default())
}

pub(super) fn harness_with_policy(policy: SchedulingPolicy) -> Harness {
    let store = Arc::new(InMemoryVisitStore::default());
    let availability = Arc::new(InMemoryAvailabilityStore::default());
    let clock = Arc::new(FixedClock::new(now()));
    let service =
        VisitService::with_clock(store.clone(), availability.clone(), policy, clock.clone());
    Harness {
        service,
        store,
        availability,
        clock,
    }
}

pub(super) fn api_for(harness: Harness) -> Arc<VisitApi<InMemoryVisitStore, InMemoryAvailabilityStore>> {
    let availability = AvailabilityService::new(harness.availability.clone());
    Arc::new(VisitApi::new(harness.service, availability))
}

/// Declare a slot for `agent_id` without going through the availability service.
pub(super) async fn open_slot(
    availability: &InMemoryAvailabilityStore,
    agent_id: AgentId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) {
    availability
        .insert_slot(&AvailabilitySlot {
            id: SlotId::new(),
            agent_id,
            start_time: start,
            end_time: end,
        })
        .await
        .expect("slot stored");
}

/// Agent open all of tomorrow from 08:00 to 20:00.
pub(super) async fn open_agent_tomorrow(availability: &InMemoryAvailabilityStore) -> AgentId {
    let agent_id = AgentId::new();
    open_slot(availability, agent_id, tomorrow_at(8, 0), tomorrow_at(20, 0)).await;
    agent_id
}

pub(super) fn request(
    property_id: PropertyId,
    agent_id: AgentId,
    user_id: UserId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> VisitRequest {
    VisitRequest {
        property_id,
        agent_id,
        user_id,
        start_time: Some(start),
        end_time: Some(end),
    }
}

pub(super) fn visit(
    status: VisitStatus,
    property_id: PropertyId,
    agent_id: AgentId,
    user_id: UserId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Visit {
    Visit {
        id: VisitId::new(),
        property_id,
        user_id,
        agent_id,
        start_time: start,
        end_time: end,
        status,
        created_at: now() - Duration::days(2),
        updated_at: now() - Duration::days(2),
    }
}

/// Seed a confirmed visit directly into the store.
pub(super) async fn seed_confirmed(
    store: &InMemoryVisitStore,
    property_id: PropertyId,
    agent_id: AgentId,
    user_id: UserId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Visit {
    let visit = visit(VisitStatus::Confirmed, property_id, agent_id, user_id, start, end);
    store.seed(visit.clone()).await;
    visit
}

/// Availability backend that is always down.
pub(super) struct UnavailableAvailability;

#[async_trait]
impl AvailabilityStore for UnavailableAvailability {
    async fn covering_slot(
        &self,
        _agent_id: AgentId,
        _window: TimeWindow,
    ) -> Result<Option<AvailabilitySlot>, RepositoryError> {
        Err(RepositoryError::Unavailable("calendar offline".to_string()))
    }

    async fn overlapping_slots(
        &self,
        _agent_id: AgentId,
        _window: TimeWindow,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        Err(RepositoryError::Unavailable("calendar offline".to_string()))
    }

    async fn insert_slot(&self, _slot: &AvailabilitySlot) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("calendar offline".to_string()))
    }

    async fn delete_slot(&self, _id: SlotId) -> Result<bool, RepositoryError> {
        Err(RepositoryError::Unavailable("calendar offline".to_string()))
    }

    async fn slots_for_agent(
        &self,
        _agent_id: AgentId,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        Err(RepositoryError::Unavailable("calendar offline".to_string()))
    }
}

/// Availability backend that answers with a slot that does not cover the request.
pub(super) struct MisreportingAvailability;

#[async_trait]
impl AvailabilityStore for MisreportingAvailability {
    async fn covering_slot(
        &self,
        agent_id: AgentId,
        window: TimeWindow,
    ) -> Result<Option<AvailabilitySlot>, RepositoryError> {
        Ok(Some(AvailabilitySlot {
            id: SlotId::new(),
            agent_id,
            start_time: window.start + Duration::minutes(30),
            end_time: window.end,
        }))
    }

    async fn overlapping_slots(
        &self,
        _agent_id: AgentId,
        _window: TimeWindow,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn insert_slot(&self, _slot: &AvailabilitySlot) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn delete_slot(&self, _id: SlotId) -> Result<bool, RepositoryError> {
        Ok(false)
    }

    async fn slots_for_agent(
        &self,
        _agent_id: AgentId,
    ) -> Result<Vec<AvailabilitySlot>, RepositoryError> {
        Ok(Vec::new())
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
