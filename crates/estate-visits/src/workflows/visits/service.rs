use std::sync::Arc;

use tracing::{error, info, warn};

use super::clock::{Clock, SystemClock};
use super::domain::{
    AgentId, CallerRole, PropertyId, TimeWindow, UserId, Visit, VisitId, VisitRequest,
    VisitStatus,
};
use super::error::{VisitRejection, VisitServiceError};
use super::lifecycle;
use super::repository::{AvailabilityStore, LockKey, VisitStore, VisitTransaction};
use super::validation::{SchedulingPolicy, VisitValidator};

/// Orchestrates booking and status changes. Each write operation runs in one
/// store transaction: checks, locks and the final write commit or roll back
/// together.
pub struct VisitService<S, A> {
    store: Arc<S>,
    validator: VisitValidator<A>,
    clock: Arc<dyn Clock>,
}

impl<S, A> VisitService<S, A>
where
    S: VisitStore + 'static,
    A: AvailabilityStore + 'static,
{
    pub fn new(store: Arc<S>, availability: Arc<A>, policy: SchedulingPolicy) -> Self {
        Self::with_clock(store, availability, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<S>,
        availability: Arc<A>,
        policy: SchedulingPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let validator = VisitValidator::new(policy, clock.clone(), availability);
        Self {
            store,
            validator,
            clock,
        }
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        self.validator.policy()
    }

    /// Book a new visit in `PENDING`.
    pub async fn create_visit(&self, request: VisitRequest) -> Result<Visit, VisitServiceError> {
        let window = self
            .validator
            .validate_business_rules(request.start_time, request.end_time)
            .inspect_err(|rejection| log_rejection("create", None, rejection))?;

        let mut tx = self.store.begin().await?;
        let outcome = self.book_in(&mut tx, &request, window).await;
        let visit = finish(tx, outcome, "create", None).await?;
        info!(
            visit_id = %visit.id,
            property_id = %visit.property_id,
            agent_id = %visit.agent_id,
            start = %visit.start_time,
            "visit requested"
        );
        Ok(visit)
    }

    /// Move a visit to `next`. Cancellation through this path is treated as
    /// agent-initiated; requesters cancel through [`Self::cancel_visit`].
    pub async fn update_visit_status(
        &self,
        visit_id: VisitId,
        next: VisitStatus,
    ) -> Result<Visit, VisitServiceError> {
        if next == VisitStatus::Cancelled {
            return self.cancel_visit(visit_id, CallerRole::Agent).await;
        }

        let mut tx = self.store.begin().await?;
        let outcome = self.transition_in(&mut tx, visit_id, next).await;
        let (visit, previous) = finish(tx, outcome, "update_status", Some(visit_id)).await?;
        info!(%visit_id, from = %previous, to = %visit.status, "visit status changed");
        Ok(visit)
    }

    /// Cancel a visit on behalf of a caller whose role was established upstream.
    pub async fn cancel_visit(
        &self,
        visit_id: VisitId,
        role: CallerRole,
    ) -> Result<Visit, VisitServiceError> {
        let mut tx = self.store.begin().await?;
        let outcome = self.cancel_in(&mut tx, visit_id, role).await;
        let visit = finish(tx, outcome, "cancel", Some(visit_id)).await?;
        info!(%visit_id, ?role, "visit cancelled");
        Ok(visit)
    }

    pub async fn get_visit(&self, visit_id: VisitId) -> Result<Visit, VisitServiceError> {
        self.store
            .fetch(visit_id)
            .await?
            .ok_or_else(|| VisitRejection::NotFound(visit_id).into())
    }

    pub async fn visits_for_user(&self, user_id: UserId) -> Result<Vec<Visit>, VisitServiceError> {
        Ok(self.store.for_user(user_id).await?)
    }

    pub async fn visits_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Vec<Visit>, VisitServiceError> {
        Ok(self.store.for_agent(agent_id).await?)
    }

    pub async fn visits_for_property(
        &self,
        property_id: PropertyId,
    ) -> Result<Vec<Visit>, VisitServiceError> {
        Ok(self.store.for_property(property_id).await?)
    }

    async fn book_in(
        &self,
        tx: &mut S::Tx,
        request: &VisitRequest,
        window: TimeWindow,
    ) -> Result<Visit, VisitServiceError> {
        tx.lock_keys(&[
            LockKey::User(request.user_id),
            LockKey::Agent(request.agent_id),
        ])
        .await?;
        self.validator
            .ensure_user_has_no_overlap(tx, request.user_id, window, None)
            .await?;
        self.validator
            .ensure_agent_available(tx, request.agent_id, window)
            .await?;

        let now = self.clock.now();
        let visit = Visit {
            id: VisitId::new(),
            property_id: request.property_id,
            user_id: request.user_id,
            agent_id: request.agent_id,
            start_time: window.start,
            end_time: window.end,
            status: VisitStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        tx.insert_visit(&visit).await?;
        Ok(visit)
    }

    async fn transition_in(
        &self,
        tx: &mut S::Tx,
        visit_id: VisitId,
        next: VisitStatus,
    ) -> Result<(Visit, VisitStatus), VisitServiceError> {
        let mut visit = load_locked(tx, visit_id).await?;
        lifecycle::ensure_transition(visit.status, next)?;
        if next == VisitStatus::Confirmed {
            tx.lock_keys(&[
                LockKey::Property(visit.property_id),
                LockKey::User(visit.user_id),
                LockKey::Agent(visit.agent_id),
            ])
            .await?;
            self.validator
                .ensure_user_has_no_overlap(tx, visit.user_id, visit.window(), Some(visit.id))
                .await?;
            self.validator.ensure_overbooking_rules(tx, &visit).await?;
        }

        let previous = visit.status;
        visit.status = next;
        visit.updated_at = self.clock.now();
        tx.update_visit(&visit).await?;
        Ok((visit, previous))
    }

    async fn cancel_in(
        &self,
        tx: &mut S::Tx,
        visit_id: VisitId,
        role: CallerRole,
    ) -> Result<Visit, VisitServiceError> {
        let mut visit = load_locked(tx, visit_id).await?;
        let now = self.clock.now();
        lifecycle::ensure_cancellable(&visit, role, now, self.policy().cancellation_cutoff_hours)?;

        visit.status = VisitStatus::Cancelled;
        visit.updated_at = now;
        tx.update_visit(&visit).await?;
        Ok(visit)
    }
}

async fn load_locked<T>(tx: &mut T, visit_id: VisitId) -> Result<Visit, VisitServiceError>
where
    T: VisitTransaction,
{
    tx.lock_visit(visit_id)
        .await?
        .ok_or_else(|| VisitRejection::NotFound(visit_id).into())
}

/// Commit on success. On failure roll back and return the failure unchanged.
async fn finish<T, V>(
    tx: T,
    outcome: Result<V, VisitServiceError>,
    operation: &'static str,
    visit_id: Option<VisitId>,
) -> Result<V, VisitServiceError>
where
    T: VisitTransaction,
{
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                error!(operation, error = %rollback, "rollback failed");
            }
            match &err {
                VisitServiceError::Rejected(rejection) => {
                    log_rejection(operation, visit_id, rejection)
                }
                VisitServiceError::Repository(repository) => {
                    error!(operation, ?visit_id, error = %repository, "visit repository failure")
                }
            }
            Err(err)
        }
    }
}

fn log_rejection(operation: &'static str, visit_id: Option<VisitId>, rejection: &VisitRejection) {
    warn!(
        operation,
        ?visit_id,
        kind = rejection.kind(),
        field = rejection.field(),
        "visit request rejected: {rejection}"
    );
}
