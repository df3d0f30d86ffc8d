use chrono::{DateTime, Local, TimeZone};

use crate::alarm::model::AlarmDefinition;
use crate::alarm::recurrence::{SkipPolicy, next_trigger_in_tz};

/// An alarm together with the instant it will next ring.
#[derive(Debug, Clone)]
pub struct Occurrence<Tz: TimeZone = Local> {
    pub alarm: AlarmDefinition,
    pub trigger_at: DateTime<Tz>,
}

impl<Tz: TimeZone> Occurrence<Tz> {
    pub fn time_until(&self, now: &DateTime<Tz>) -> chrono::Duration {
        self.trigger_at.clone() - now.clone()
    }
}

pub fn next_occurrence(
    alarms: &[AlarmDefinition],
    now: &DateTime<Local>,
    policy: SkipPolicy<'_>,
) -> Option<Occurrence> {
    next_occurrence_in_tz(alarms, now, &Local, policy)
}

/// Soonest occurrence across the enabled alarms. On equal trigger instants
/// the alarm listed first wins.
pub fn next_occurrence_in_tz<Tz>(
    alarms: &[AlarmDefinition],
    now: &DateTime<Tz>,
    timezone: &Tz,
    policy: SkipPolicy<'_>,
) -> Option<Occurrence<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let mut best: Option<Occurrence<Tz>> = None;
    for alarm in alarms.iter().filter(|alarm| alarm.enabled()) {
        let Some(trigger_at) = next_trigger_in_tz(alarm, now, timezone, policy) else {
            continue;
        };
        let sooner = best
            .as_ref()
            .is_none_or(|current| trigger_at < current.trigger_at);
        if sooner {
            best = Some(Occurrence {
                alarm: alarm.clone(),
                trigger_at,
            });
        }
    }
    best
}
