mod config;
mod rules;

pub use config::SchedulingPolicy;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::clock::Clock;
use super::domain::{AgentId, TimeWindow, UserId, Visit, VisitId, VisitStatus};
use super::error::{VisitRejection, VisitServiceError};
use super::repository::{AvailabilityStore, VisitTransaction};

/// Business-rule checks for booking and confirming visits.
///
/// The engine never writes. Overlap and count reads go through the caller's
/// transaction so the locks they take cover the caller's eventual write.
pub struct VisitValidator<A> {
    policy: SchedulingPolicy,
    clock: Arc<dyn Clock>,
    availability: Arc<A>,
}

impl<A> VisitValidator<A>
where
    A: AvailabilityStore + 'static,
{
    pub fn new(policy: SchedulingPolicy, clock: Arc<dyn Clock>, availability: Arc<A>) -> Self {
        Self {
            policy,
            clock,
            availability,
        }
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    /// Interval presence, ordering and minimum lead time, first failure wins.
    pub fn validate_business_rules(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<TimeWindow, VisitRejection> {
        let window = rules::check_interval(start, end)?;
        rules::check_lead_time(&window, self.clock.now(), &self.policy)?;
        Ok(window)
    }

    /// The user holds no confirmed visit overlapping `window` other than `exclude`.
    pub async fn ensure_user_has_no_overlap<T>(
        &self,
        tx: &mut T,
        user_id: UserId,
        window: TimeWindow,
        exclude: Option<VisitId>,
    ) -> Result<(), VisitServiceError>
    where
        T: VisitTransaction,
    {
        let overlapping = tx
            .overlapping_for_user(user_id, VisitStatus::Confirmed, window, exclude)
            .await?;
        if let Some(existing) = overlapping.first() {
            return Err(VisitRejection::UserOverlap {
                conflicting: existing.id,
            }
            .into());
        }
        Ok(())
    }

    /// Agent must be free of confirmed visits and have a declared slot covering `window`.
    pub async fn ensure_agent_available<T>(
        &self,
        tx: &mut T,
        agent_id: AgentId,
        window: TimeWindow,
    ) -> Result<(), VisitServiceError>
    where
        T: VisitTransaction,
    {
        let overlapping = tx
            .overlapping_for_agent(agent_id, VisitStatus::Confirmed, window)
            .await?;
        if let Some(existing) = overlapping.first() {
            return Err(VisitRejection::AgentDoubleBooked {
                conflicting: existing.id,
            }
            .into());
        }

        let slot = match self.availability.covering_slot(agent_id, window).await {
            Ok(slot) => slot,
            Err(err) => {
                warn!(%agent_id, error = %err, "availability lookup failed; rejecting booking");
                return Err(VisitRejection::AvailabilityCheckFailed {
                    reason: err.to_string(),
                }
                .into());
            }
        };

        match slot {
            None => Err(VisitRejection::AgentNotAvailable.into()),
            Some(slot) if slot.agent_id != agent_id || !slot.window().covers(&window) => {
                warn!(%agent_id, slot_id = %slot.id, "availability store returned a non-covering slot");
                Err(VisitRejection::AvailabilityCheckFailed {
                    reason: format!("slot {} does not cover the requested interval", slot.id),
                }
                .into())
            }
            Some(_) => Ok(()),
        }
    }

    /// Caps on concurrent confirmed visits, checked before `visit` becomes confirmed.
    pub async fn ensure_overbooking_rules<T>(
        &self,
        tx: &mut T,
        visit: &Visit,
    ) -> Result<(), VisitServiceError>
    where
        T: VisitTransaction,
    {
        let window = visit.window();

        let same_property = tx
            .count_confirmed_for_property(visit.property_id, window, visit.id)
            .await?;
        rules::check_property_cap(same_property, &self.policy)?;

        let other_properties = tx
            .count_distinct_other_properties_for_agent(visit.agent_id, visit.property_id, window)
            .await?;
        rules::check_agent_property_spread(other_properties, &self.policy)?;

        Ok(())
    }
}
