use chrono_tz::Tz;

/// Tunable booking rules. Defaults mirror the production listing platform.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingPolicy {
    /// Timezone in which "tomorrow" is evaluated for the lead-time rule.
    pub timezone: Tz,
    pub min_lead_days: u32,
    pub cancellation_cutoff_hours: u32,
    pub max_confirmed_same_property: u32,
    pub max_distinct_properties_for_agent: u32,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            min_lead_days: 1,
            cancellation_cutoff_hours: 24,
            max_confirmed_same_property: 3,
            max_distinct_properties_for_agent: 2,
        }
    }
}
