use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use tracing::{debug, info};

use crate::alarm::model::{AlarmDefinition, AlarmSettings};
use crate::alarm::recurrence::{SkipPolicy, next_trigger_in_tz};
use crate::alarm::selector::{Occurrence, next_occurrence_in_tz};
use crate::holiday::HolidaySet;

/// One-shot wake-up primitive. Each arm replaces whatever was armed before.
pub trait TimerArm<Tz: TimeZone = Local> {
    fn arm(&mut self, occurrence: &Occurrence<Tz>);
    fn disarm(&mut self);
}

/// In-process timer that only remembers its deadline; the run loop sleeps
/// towards it.
#[derive(Debug)]
pub struct DeadlineTimer<Tz: TimeZone = Local> {
    deadline: Option<DateTime<Tz>>,
}

impl<Tz: TimeZone> Default for DeadlineTimer<Tz> {
    fn default() -> Self {
        Self { deadline: None }
    }
}

impl<Tz: TimeZone> DeadlineTimer<Tz> {
    pub fn deadline(&self) -> Option<&DateTime<Tz>> {
        self.deadline.as_ref()
    }
}

impl<Tz: TimeZone> TimerArm<Tz> for DeadlineTimer<Tz> {
    fn arm(&mut self, occurrence: &Occurrence<Tz>) {
        self.deadline = Some(occurrence.trigger_at.clone());
    }

    fn disarm(&mut self) {
        self.deadline = None;
    }
}

#[derive(Debug, Clone)]
pub struct TickOutcome<Tz: TimeZone = Local> {
    /// Every occurrence that came due since the previous tick, earliest first.
    pub fired: Vec<Occurrence<Tz>>,
}

/// Keeps exactly one occurrence armed. Every fire or change to alarms,
/// settings or holidays recomputes the soonest occurrence and re-arms it.
///
/// `covered_until` is the instant up to which every occurrence has either
/// fired or been ruled out. A fire rings all alarms due in
/// `(covered_until, now]`, and edits recompute from `covered_until`, so an
/// occurrence that is already due stays armed until the next tick.
pub struct AlarmScheduler<Tz: TimeZone = Local> {
    alarms: Vec<AlarmDefinition>,
    settings: AlarmSettings,
    holidays: Arc<HolidaySet>,
    timezone: Tz,
    armed: Option<Occurrence<Tz>>,
    covered_until: Option<DateTime<Tz>>,
}

impl AlarmScheduler<Local> {
    pub fn new(
        alarms: Vec<AlarmDefinition>,
        settings: AlarmSettings,
        holidays: Arc<HolidaySet>,
    ) -> Self {
        Self::new_in_tz(alarms, settings, holidays, Local)
    }
}

impl<Tz> AlarmScheduler<Tz>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    pub fn new_in_tz(
        alarms: Vec<AlarmDefinition>,
        settings: AlarmSettings,
        holidays: Arc<HolidaySet>,
        timezone: Tz,
    ) -> Self {
        Self {
            alarms,
            settings,
            holidays,
            timezone,
            armed: None,
            covered_until: None,
        }
    }

    pub fn alarms(&self) -> &[AlarmDefinition] {
        &self.alarms
    }

    pub fn settings(&self) -> &AlarmSettings {
        &self.settings
    }

    pub fn holidays(&self) -> &Arc<HolidaySet> {
        &self.holidays
    }

    pub fn armed(&self) -> Option<&Occurrence<Tz>> {
        self.armed.as_ref()
    }

    pub fn skip_policy(&self) -> SkipPolicy<'_> {
        SkipPolicy::from_setting(self.settings.skip_holidays, self.holidays.as_ref())
    }

    /// Treats everything up to `now` as handled and arms the next occurrence.
    pub fn reschedule(
        &mut self,
        now: &DateTime<Tz>,
        timer: &mut dyn TimerArm<Tz>,
    ) -> Option<&Occurrence<Tz>> {
        self.covered_until = Some(now.clone());
        self.arm_from(now, timer)
    }

    fn arm_from(
        &mut self,
        reference: &DateTime<Tz>,
        timer: &mut dyn TimerArm<Tz>,
    ) -> Option<&Occurrence<Tz>> {
        let next = next_occurrence_in_tz(
            &self.alarms,
            reference,
            &self.timezone,
            self.skip_policy(),
        );
        match &next {
            Some(occurrence) => {
                timer.arm(occurrence);
                info!(
                    alarm = occurrence.alarm.id(),
                    trigger_at = %occurrence.trigger_at.naive_local(),
                    "alarm armed"
                );
            }
            None => {
                timer.disarm();
                debug!("no upcoming alarm, timer disarmed");
            }
        }
        self.armed = next;
        self.armed.as_ref()
    }

    /// Occurrences after `since` and no later than `now`, one per alarm,
    /// earliest first with ties in list order.
    fn due_between(&self, since: &DateTime<Tz>, now: &DateTime<Tz>) -> Vec<Occurrence<Tz>> {
        let policy = self.skip_policy();
        let mut due = self
            .alarms
            .iter()
            .filter(|alarm| alarm.enabled())
            .filter_map(|alarm| {
                let trigger_at = next_trigger_in_tz(alarm, since, &self.timezone, policy)?;
                (trigger_at <= *now).then(|| Occurrence {
                    alarm: alarm.clone(),
                    trigger_at,
                })
            })
            .collect::<Vec<_>>();
        due.sort_by(|a, b| a.trigger_at.cmp(&b.trigger_at));
        due
    }

    /// Fires every occurrence due by `now` once the armed one is reached,
    /// then arms the next.
    pub fn tick(&mut self, now: &DateTime<Tz>, timer: &mut dyn TimerArm<Tz>) -> TickOutcome<Tz> {
        let due = self
            .armed
            .as_ref()
            .is_some_and(|occurrence| *now >= occurrence.trigger_at);
        if !due {
            // Nothing rings in (covered_until, now], so the window can close.
            self.covered_until = Some(now.clone());
            return TickOutcome { fired: Vec::new() };
        }

        let since = self.covered_until.clone().unwrap_or_else(|| now.clone());
        let mut fired = self.due_between(&since, now);
        if fired.is_empty()
            && let Some(armed) = self.armed.take()
        {
            fired.push(armed);
        }
        for occurrence in &fired {
            info!(
                alarm = occurrence.alarm.id(),
                sound = occurrence.alarm.sound().unwrap_or("default"),
                trigger_at = %occurrence.trigger_at.naive_local(),
                "alarm fired"
            );
        }
        self.reschedule(now, timer);
        TickOutcome { fired }
    }

    /// Edits recompute from the covered instant, so an occurrence that came
    /// due before this call is kept for the next tick.
    fn rearm_after_edit(&mut self, now: &DateTime<Tz>, timer: &mut dyn TimerArm<Tz>) {
        let reference = self.covered_until.clone().unwrap_or_else(|| now.clone());
        self.arm_from(&reference, timer);
    }

    pub fn replace_alarms(
        &mut self,
        alarms: Vec<AlarmDefinition>,
        now: &DateTime<Tz>,
        timer: &mut dyn TimerArm<Tz>,
    ) {
        self.alarms = alarms;
        self.rearm_after_edit(now, timer);
    }

    pub fn replace_settings(
        &mut self,
        settings: AlarmSettings,
        now: &DateTime<Tz>,
        timer: &mut dyn TimerArm<Tz>,
    ) {
        self.settings = settings;
        self.rearm_after_edit(now, timer);
    }

    pub fn replace_holidays(
        &mut self,
        holidays: Arc<HolidaySet>,
        now: &DateTime<Tz>,
        timer: &mut dyn TimerArm<Tz>,
    ) {
        self.holidays = holidays;
        self.rearm_after_edit(now, timer);
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TimeDisplayMode {
    Hour24,
    Hour12,
}

pub fn format_time_of_day<Tz: TimeZone>(at: &DateTime<Tz>, mode: TimeDisplayMode) -> String {
    let naive = at.naive_local();
    match mode {
        TimeDisplayMode::Hour24 => naive.format("%H:%M").to_string(),
        TimeDisplayMode::Hour12 => naive.format("%I:%M %p").to_string(),
    }
}

pub fn format_trigger_with_mode<Tz: TimeZone>(
    trigger: Option<&DateTime<Tz>>,
    mode: TimeDisplayMode,
) -> String {
    match trigger {
        Some(at) => format!(
            "{} {}",
            at.naive_local().format("%a %Y-%m-%d"),
            format_time_of_day(at, mode)
        ),
        None => "-".to_string(),
    }
}

/// One-line "next alarm" banner, e.g. `next alarm at 07:00 (Tue 2026-10-20), in 23h 0m`.
pub fn format_next_alarm<Tz: TimeZone>(
    next: Option<&Occurrence<Tz>>,
    now: &DateTime<Tz>,
    mode: TimeDisplayMode,
) -> String {
    let Some(occurrence) = next else {
        return "next alarm: --:--".to_string();
    };
    let mut line = format!(
        "next alarm at {} ({})",
        format_time_of_day(&occurrence.trigger_at, mode),
        occurrence.trigger_at.naive_local().format("%a %Y-%m-%d")
    );
    let remaining_minutes = occurrence.time_until(now).num_minutes();
    if remaining_minutes > 0 {
        line.push_str(&format!(
            ", in {}h {}m",
            remaining_minutes / 60,
            remaining_minutes % 60
        ));
    }
    line
}
