use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use super::common::*;
use crate::workflows::visits::{
    AgentId, FixedClock, InMemoryVisitStore, PropertyId, SchedulingPolicy, UserId,
    VisitRejection, VisitRequest, VisitService, VisitServiceError, VisitStatus,
};

fn rejection(err: VisitServiceError) -> VisitRejection {
    err.rejection().cloned().expect("business rejection")
}

#[tokio::test]
async fn inverted_or_empty_interval_is_invalid() {
    let h = harness();
    let agent_id = open_agent_tomorrow(&h.availability).await;
    let start = tomorrow_at(10, 0);

    for end in [start, start - Duration::minutes(1), start - Duration::days(1)] {
        let err = h
            .service
            .create_visit(request(PropertyId::new(), agent_id, UserId::new(), start, end))
            .await
            .expect_err("interval rejected");
        assert_eq!(rejection(err), VisitRejection::InvalidInterval);
    }
}

#[tokio::test]
async fn missing_bounds_are_reported_first() {
    let h = harness();
    let err = h
        .service
        .create_visit(VisitRequest {
            property_id: PropertyId::new(),
            agent_id: AgentId::new(),
            user_id: UserId::new(),
            start_time: None,
            end_time: Some(tomorrow_at(10, 0)),
        })
        .await
        .expect_err("missing start rejected");

    let rejection = rejection(err);
    assert_eq!(rejection, VisitRejection::MissingInterval);
    assert!(rejection.errors().contains_key("startTime"));
}

#[tokio::test]
async fn same_day_visits_are_too_soon() {
    let h = harness();
    let agent_id = AgentId::new();
    open_slot(&h.availability, agent_id, now(), tomorrow_at(20, 0)).await;

    let later_today = now() + Duration::hours(4);
    let err = h
        .service
        .create_visit(request(
            PropertyId::new(),
            agent_id,
            UserId::new(),
            later_today,
            later_today + Duration::hours(1),
        ))
        .await
        .expect_err("same-day visit rejected");
    assert_eq!(
        rejection(err),
        VisitRejection::TooSoon {
            earliest: tomorrow_at(0, 0).date_naive()
        }
    );

    let first_thing_tomorrow = tomorrow_at(0, 0);
    let created = h
        .service
        .create_visit(request(
            PropertyId::new(),
            agent_id,
            UserId::new(),
            first_thing_tomorrow,
            first_thing_tomorrow + Duration::hours(1),
        ))
        .await
        .expect("midnight tomorrow is bookable");
    assert_eq!(created.status, VisitStatus::Pending);
}

#[tokio::test]
async fn lead_time_uses_configured_timezone() {
    let policy = SchedulingPolicy {
        timezone: chrono_tz::America::New_York,
        ..SchedulingPolicy::default()
    };
    let h = harness_with_policy(policy);
    let agent_id = AgentId::new();
    let start = Utc
        .with_ymd_and_hms(2026, 3, 11, 2, 0, 0)
        .single()
        .expect("valid");
    open_slot(&h.availability, agent_id, start, start + Duration::hours(2)).await;

    // 02:00 UTC on the 11th is still the evening of the 10th in New York.
    let err = h
        .service
        .create_visit(request(
            PropertyId::new(),
            agent_id,
            UserId::new(),
            start,
            start + Duration::hours(1),
        ))
        .await
        .expect_err("local date is today");
    assert!(matches!(rejection(err), VisitRejection::TooSoon { .. }));
}

#[tokio::test]
async fn user_overlap_is_half_open() {
    let h = harness();
    let user_id = UserId::new();
    let existing = seed_confirmed(
        &h.store,
        PropertyId::new(),
        AgentId::new(),
        user_id,
        tomorrow_at(10, 0),
        tomorrow_at(11, 0),
    )
    .await;
    let agent_id = open_agent_tomorrow(&h.availability).await;

    let err = h
        .service
        .create_visit(request(
            PropertyId::new(),
            agent_id,
            user_id,
            tomorrow_at(10, 30),
            tomorrow_at(11, 30),
        ))
        .await
        .expect_err("overlap rejected");
    let rejection = rejection(err);
    assert_eq!(
        rejection,
        VisitRejection::UserOverlap {
            conflicting: existing.id
        }
    );
    assert_eq!(rejection.field(), "userId");

    let adjacent = h
        .service
        .create_visit(request(
            PropertyId::new(),
            agent_id,
            user_id,
            tomorrow_at(11, 0),
            tomorrow_at(12, 0),
        ))
        .await
        .expect("back-to-back visits allowed");
    assert_eq!(adjacent.status, VisitStatus::Pending);
}

#[tokio::test]
async fn pending_visits_do_not_block_the_user() {
    let h = harness();
    let user_id = UserId::new();
    let agent_id = open_agent_tomorrow(&h.availability).await;
    let other_agent = open_agent_tomorrow(&h.availability).await;

    h.service
        .create_visit(request(
            PropertyId::new(),
            agent_id,
            user_id,
            tomorrow_at(10, 0),
            tomorrow_at(11, 0),
        ))
        .await
        .expect("first request");
    h.service
        .create_visit(request(
            PropertyId::new(),
            other_agent,
            user_id,
            tomorrow_at(10, 0),
            tomorrow_at(11, 0),
        ))
        .await
        .expect("second pending request for the same slot");
}

#[tokio::test]
async fn requested_interval_must_sit_inside_a_declared_slot() {
    let h = harness();
    let agent_id = AgentId::new();
    open_slot(&h.availability, agent_id, tomorrow_at(9, 0), tomorrow_at(12, 0)).await;

    h.service
        .create_visit(request(
            PropertyId::new(),
            agent_id,
            UserId::new(),
            tomorrow_at(10, 0),
            tomorrow_at(11, 0),
        ))
        .await
        .expect("covered by slot");

    let err = h
        .service
        .create_visit(request(
            PropertyId::new(),
            agent_id,
            UserId::new(),
            tomorrow_at(8, 0),
            tomorrow_at(9, 30),
        ))
        .await
        .expect_err("starts before the slot");
    assert_eq!(rejection(err), VisitRejection::AgentNotAvailable);
}

#[tokio::test]
async fn agent_with_confirmed_overlap_is_double_booked() {
    let h = harness();
    let agent_id = open_agent_tomorrow(&h.availability).await;
    let existing = seed_confirmed(
        &h.store,
        PropertyId::new(),
        agent_id,
        UserId::new(),
        tomorrow_at(14, 0),
        tomorrow_at(15, 0),
    )
    .await;

    let err = h
        .service
        .create_visit(request(
            PropertyId::new(),
            agent_id,
            UserId::new(),
            tomorrow_at(14, 30),
            tomorrow_at(15, 30),
        ))
        .await
        .expect_err("agent busy");
    assert_eq!(
        rejection(err),
        VisitRejection::AgentDoubleBooked {
            conflicting: existing.id
        }
    );
}

#[tokio::test]
async fn availability_outage_fails_closed() {
    let store = Arc::new(InMemoryVisitStore::default());
    let service = VisitService::with_clock(
        store.clone(),
        Arc::new(UnavailableAvailability),
        SchedulingPolicy::default(),
        Arc::new(FixedClock::new(now())),
    );

    let err = service
        .create_visit(request(
            PropertyId::new(),
            AgentId::new(),
            UserId::new(),
            tomorrow_at(10, 0),
            tomorrow_at(11, 0),
        ))
        .await
        .expect_err("lookup failure rejects");
    let rejection = rejection(err);
    assert!(matches!(
        rejection,
        VisitRejection::AvailabilityCheckFailed { .. }
    ));
    assert_eq!(rejection.kind(), "AVAILABILITY_CHECK_FAILED");
}

#[tokio::test]
async fn non_covering_slot_from_backend_is_treated_as_failure() {
    let service = VisitService::with_clock(
        Arc::new(InMemoryVisitStore::default()),
        Arc::new(MisreportingAvailability),
        SchedulingPolicy::default(),
        Arc::new(FixedClock::new(now())),
    );

    let err = service
        .create_visit(request(
            PropertyId::new(),
            AgentId::new(),
            UserId::new(),
            tomorrow_at(10, 0),
            tomorrow_at(11, 0),
        ))
        .await
        .expect_err("malformed slot rejected");
    assert!(matches!(
        rejection(err),
        VisitRejection::AvailabilityCheckFailed { .. }
    ));
}

#[tokio::test]
async fn rejected_booking_leaves_no_trace() {
    let h = harness();
    let user_id = UserId::new();
    let err = h
        .service
        .create_visit(request(
            PropertyId::new(),
            AgentId::new(),
            user_id,
            tomorrow_at(10, 0),
            tomorrow_at(11, 0),
        ))
        .await
        .expect_err("no availability declared");
    assert_eq!(rejection(err), VisitRejection::AgentNotAvailable);
    assert!(h
        .service
        .visits_for_user(user_id)
        .await
        .expect("listing")
        .is_empty());
}
