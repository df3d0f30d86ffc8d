use std::fmt;

use chrono::{
    DateTime, Datelike, Days, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike,
    Weekday,
};

use crate::alarm::model::AlarmDefinition;
use crate::holiday::HolidayLookup;

/// Most days the daily regime moves forward looking for a working day.
const DAILY_SKIP_GUARD: u32 = 30;
/// Today plus one full week.
const WEEKLY_SCAN_DAYS: u64 = 8;

/// Whether Saturdays, Sundays and holidays are excluded from firing.
#[derive(Clone, Copy)]
pub enum SkipPolicy<'a> {
    Never,
    WeekendsAndHolidays(&'a dyn HolidayLookup),
}

impl<'a> SkipPolicy<'a> {
    pub fn from_setting(skip_holidays: bool, holidays: &'a dyn HolidayLookup) -> Self {
        if skip_holidays {
            SkipPolicy::WeekendsAndHolidays(holidays)
        } else {
            SkipPolicy::Never
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, SkipPolicy::WeekendsAndHolidays(_))
    }

    pub fn skips(&self, date: NaiveDate) -> bool {
        match self {
            SkipPolicy::Never => false,
            SkipPolicy::WeekendsAndHolidays(holidays) => {
                is_weekend(date) || holidays.is_holiday(date)
            }
        }
    }
}

impl fmt::Debug for SkipPolicy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipPolicy::Never => f.write_str("Never"),
            SkipPolicy::WeekendsAndHolidays(_) => f.write_str("WeekendsAndHolidays"),
        }
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub(crate) fn resolve_local_datetime<Tz>(timezone: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    match timezone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(first, _second) => Some(first),
        LocalResult::None => None,
    }
}

pub fn next_trigger(
    alarm: &AlarmDefinition,
    now: &DateTime<Local>,
    policy: SkipPolicy<'_>,
) -> Option<DateTime<Local>> {
    next_trigger_in_tz(alarm, now, &Local, policy)
}

/// First instant strictly after `now`, at minute granularity, on which
/// `alarm` should ring. `None` when the bounded scan finds nothing.
pub fn next_trigger_in_tz<Tz>(
    alarm: &AlarmDefinition,
    now: &DateTime<Tz>,
    timezone: &Tz,
    policy: SkipPolicy<'_>,
) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let reference = now.with_second(0)?.with_nanosecond(0)?;
    if alarm.repeat().is_every_day() {
        next_daily_trigger(alarm, &reference, timezone, policy)
    } else {
        next_weekly_trigger(alarm, &reference, timezone, policy)
    }
}

fn at_alarm_time<Tz>(alarm: &AlarmDefinition, date: NaiveDate, timezone: &Tz) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    resolve_local_datetime(timezone, date.and_time(alarm.time_of_day()))
}

fn next_daily_trigger<Tz>(
    alarm: &AlarmDefinition,
    reference: &DateTime<Tz>,
    timezone: &Tz,
    policy: SkipPolicy<'_>,
) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let mut date = reference.date_naive();
    let later_today = at_alarm_time(alarm, date, timezone).is_some_and(|today| today > *reference);
    if !later_today {
        date = date.succ_opt()?;
    }

    for _ in 0..=DAILY_SKIP_GUARD {
        if !policy.skips(date)
            && let Some(candidate) = at_alarm_time(alarm, date, timezone)
        {
            return Some(candidate);
        }
        date = date.succ_opt()?;
    }
    None
}

// A repeat day that is skipped is not moved; the scan goes on to the next
// selected weekday, so a holiday costs that week's occurrence.
fn next_weekly_trigger<Tz>(
    alarm: &AlarmDefinition,
    reference: &DateTime<Tz>,
    timezone: &Tz,
    policy: SkipPolicy<'_>,
) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let start = reference.date_naive();
    for day_offset in 0..WEEKLY_SCAN_DAYS {
        let date = start.checked_add_days(Days::new(day_offset))?;
        if !alarm.repeat().contains(date.weekday()) {
            continue;
        }
        let Some(candidate) = at_alarm_time(alarm, date, timezone) else {
            continue;
        };
        if candidate <= *reference || policy.skips(date) {
            continue;
        }
        return Some(candidate);
    }
    None
}
