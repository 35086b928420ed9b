use chrono::{DateTime, Days, NaiveDate, Utc};

use super::super::domain::TimeWindow;
use super::super::error::VisitRejection;
use super::config::SchedulingPolicy;

/// First calendar date, in the policy timezone, on which a new visit may start.
pub(crate) fn earliest_start_date(now: DateTime<Utc>, policy: &SchedulingPolicy) -> NaiveDate {
    let today = now.with_timezone(&policy.timezone).date_naive();
    today
        .checked_add_days(Days::new(u64::from(policy.min_lead_days)))
        .unwrap_or(NaiveDate::MAX)
}

pub(crate) fn check_interval(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<TimeWindow, VisitRejection> {
    let (Some(start), Some(end)) = (start, end) else {
        return Err(VisitRejection::MissingInterval);
    };
    TimeWindow::new(start, end).ok_or(VisitRejection::InvalidInterval)
}

pub(crate) fn check_lead_time(
    window: &TimeWindow,
    now: DateTime<Utc>,
    policy: &SchedulingPolicy,
) -> Result<(), VisitRejection> {
    let earliest = earliest_start_date(now, policy);
    let requested = window.start.with_timezone(&policy.timezone).date_naive();
    if requested < earliest {
        return Err(VisitRejection::TooSoon { earliest });
    }
    Ok(())
}

/// `already_confirmed` excludes the visit being confirmed.
pub(crate) fn check_property_cap(
    already_confirmed: u32,
    policy: &SchedulingPolicy,
) -> Result<(), VisitRejection> {
    let cap = policy.max_confirmed_same_property;
    if already_confirmed >= cap {
        return Err(VisitRejection::Overbooking {
            field: "propertyId",
            message: format!(
                "property already has {already_confirmed} confirmed visit(s) at this time; \
                 at most {cap} may run concurrently"
            ),
        });
    }
    Ok(())
}

/// `other_properties` excludes the property of the visit being confirmed.
pub(crate) fn check_agent_property_spread(
    other_properties: u32,
    policy: &SchedulingPolicy,
) -> Result<(), VisitRejection> {
    let cap = policy.max_distinct_properties_for_agent;
    if other_properties >= cap {
        return Err(VisitRejection::Overbooking {
            field: "agentId",
            message: format!(
                "agent already has confirmed visits on {other_properties} other propert(ies) \
                 at this time; at most {cap} distinct properties may overlap"
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).single().expect("valid")
    }

    #[test]
    fn missing_bounds_reported_before_inverted_bounds() {
        let now = utc(2026, 3, 10, 9, 0);
        assert_eq!(check_interval(None, Some(now)), Err(VisitRejection::MissingInterval));
        assert_eq!(check_interval(Some(now), None), Err(VisitRejection::MissingInterval));
        assert_eq!(check_interval(None, None), Err(VisitRejection::MissingInterval));
    }

    #[test]
    fn inverted_and_empty_bounds_are_invalid() {
        let start = utc(2026, 3, 12, 10, 0);
        for offset in [0, 1, 60, 24 * 60] {
            let end = start - chrono::Duration::minutes(offset);
            assert_eq!(
                check_interval(Some(start), Some(end)),
                Err(VisitRejection::InvalidInterval),
                "end {offset} minutes before start"
            );
        }
    }

    #[test]
    fn earliest_date_follows_policy_timezone() {
        // 23:30 UTC on the 10th is already the 11th in Auckland.
        let now = utc(2026, 3, 10, 23, 30);
        let utc_policy = SchedulingPolicy::default();
        let auckland = SchedulingPolicy {
            timezone: Tz::Pacific__Auckland,
            ..SchedulingPolicy::default()
        };
        assert_eq!(
            earliest_start_date(now, &utc_policy),
            NaiveDate::from_ymd_opt(2026, 3, 11).unwrap()
        );
        assert_eq!(
            earliest_start_date(now, &auckland),
            NaiveDate::from_ymd_opt(2026, 3, 12).unwrap()
        );
    }

    #[test]
    fn lead_time_rejects_today_and_accepts_tomorrow_midnight() {
        let policy = SchedulingPolicy::default();
        let now = utc(2026, 3, 10, 9, 0);

        let later_today = TimeWindow::new(utc(2026, 3, 10, 22, 0), utc(2026, 3, 10, 23, 0)).unwrap();
        assert!(matches!(
            check_lead_time(&later_today, now, &policy),
            Err(VisitRejection::TooSoon { .. })
        ));

        let yesterday = TimeWindow::new(utc(2026, 3, 9, 10, 0), utc(2026, 3, 9, 11, 0)).unwrap();
        assert!(check_lead_time(&yesterday, now, &policy).is_err());

        let tomorrow = TimeWindow::new(utc(2026, 3, 11, 0, 0), utc(2026, 3, 11, 1, 0)).unwrap();
        assert_eq!(check_lead_time(&tomorrow, now, &policy), Ok(()));
    }

    #[test]
    fn property_cap_counts_the_candidate() {
        let policy = SchedulingPolicy::default();
        assert_eq!(check_property_cap(2, &policy), Ok(()));
        let err = check_property_cap(3, &policy).expect_err("fourth confirmation rejected");
        assert_eq!(err.kind(), "OVERBOOKING");
        assert_eq!(err.field(), "propertyId");
        assert!(!err.to_string().trim().is_empty());
    }

    #[test]
    fn agent_spread_counts_the_candidate_property() {
        let policy = SchedulingPolicy::default();
        assert_eq!(check_agent_property_spread(1, &policy), Ok(()));
        let err = check_agent_property_spread(2, &policy).expect_err("third property rejected");
        assert_eq!(err.field(), "agentId");
        assert!(err.to_string().contains("at most 2"));
    }
}
