use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use tracing::{info, warn};

use crate::alarm::recurrence::next_trigger_in_tz;
use crate::alarm::scheduler::{
    AlarmScheduler, DeadlineTimer, TimeDisplayMode, TimerArm, format_next_alarm,
};
use crate::alarm::selector::Occurrence;
use crate::alarm::store::AlarmStore;
use crate::api::{
    AlarmView, ApiServer, ApiServerConfig, ApiSharedState, HolidayView, NextAlarmView,
    RuntimeSnapshot,
};
use crate::holiday::store::HolidayStore;

/// Holidays published to API readers, counted in days from today.
const PUBLISHED_HOLIDAY_DAYS: u32 = 366;
const MAX_IDLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub alarms_path: PathBuf,
    pub holidays_path: PathBuf,
    pub time_mode: TimeDisplayMode,
    pub api: Option<ApiServerConfig>,
    pub once: bool,
}

/// Remembers a file's modification time so edits made by other processes
/// can be picked up.
struct WatchedFile {
    path: PathBuf,
    modified: Option<SystemTime>,
}

impl WatchedFile {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            modified: modified_time(path),
        }
    }

    fn changed(&mut self) -> bool {
        let current = modified_time(&self.path);
        if current == self.modified {
            return false;
        }
        self.modified = current;
        true
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

pub fn run(options: DaemonOptions) -> Result<()> {
    let alarm_store = AlarmStore::open(&options.alarms_path)?;
    let holiday_store = HolidayStore::open(&options.holidays_path)?;
    if holiday_store.should_auto_update(Utc::now()) {
        warn!(
            path = %options.holidays_path.display(),
            "holiday calendar is missing or older than six months; import a fresh one"
        );
    }

    let mut scheduler = AlarmScheduler::new(
        alarm_store.list().to_vec(),
        alarm_store.settings().clone(),
        holiday_store.snapshot(),
    );
    let mut timer = DeadlineTimer::<Local>::default();

    let api_server = match options.api.clone() {
        Some(config) => {
            let bind = format!("{}:{}", config.bind_addr, config.port);
            Some(
                ApiServer::start(config)
                    .with_context(|| format!("failed to start local API at {bind}"))?,
            )
        }
        None => None,
    };
    let api_state = api_server.as_ref().map(|server| Arc::clone(&server.state));

    let now = Local::now();
    scheduler.reschedule(&now, &mut timer);
    println!("{}", format_next_alarm(scheduler.armed(), &now, options.time_mode));
    publish_api_state(api_state.as_ref(), &scheduler, &now, options.time_mode, 0)?;
    if options.once {
        return Ok(());
    }

    let mut watch = SourceFiles {
        alarms: WatchedFile::new(&options.alarms_path),
        holidays: WatchedFile::new(&options.holidays_path),
    };
    let mut fired_count = 0_u64;

    loop {
        let now = Local::now();
        let fired = poll(&mut scheduler, &mut timer, &mut watch, &now);
        for occurrence in &fired {
            fired_count += 1;
            println!(
                "ALARM {} {} sound={}",
                occurrence.alarm.id(),
                occurrence.alarm.time_label(),
                occurrence.alarm.sound().unwrap_or("default")
            );
        }
        if !fired.is_empty() {
            println!("{}", format_next_alarm(scheduler.armed(), &now, options.time_mode));
        }

        publish_api_state(
            api_state.as_ref(),
            &scheduler,
            &now,
            options.time_mode,
            fired_count,
        )?;
        thread::sleep(idle_duration(timer.deadline(), &now));
    }
}

struct SourceFiles {
    alarms: WatchedFile,
    holidays: WatchedFile,
}

/// One loop pass. Due alarms fire before any reload is applied, so an edit
/// landing in the same second cannot push them to their next day.
fn poll<Tz>(
    scheduler: &mut AlarmScheduler<Tz>,
    timer: &mut dyn TimerArm<Tz>,
    watch: &mut SourceFiles,
    now: &DateTime<Tz>,
) -> Vec<Occurrence<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let outcome = scheduler.tick(now, timer);

    if watch.alarms.changed() {
        match AlarmStore::open(&watch.alarms.path) {
            Ok(store) => {
                info!(alarms = store.list().len(), "alarm file changed, reloading");
                scheduler.replace_alarms(store.list().to_vec(), now, timer);
                if scheduler.settings() != store.settings() {
                    scheduler.replace_settings(store.settings().clone(), now, timer);
                }
            }
            Err(err) => warn!(error = %format!("{err:#}"), "keeping previous alarms"),
        }
    }
    if watch.holidays.changed() {
        match HolidayStore::open(&watch.holidays.path) {
            Ok(store) => {
                info!(
                    holidays = store.snapshot().len(),
                    "holiday file changed, reloading"
                );
                scheduler.replace_holidays(store.snapshot(), now, timer);
            }
            Err(err) => warn!(error = %format!("{err:#}"), "keeping previous holidays"),
        }
    }

    outcome.fired
}

/// Time to sleep before the next loop pass: up to the armed deadline, never
/// longer than a second so file edits are noticed.
fn idle_duration<Tz: TimeZone>(deadline: Option<&DateTime<Tz>>, now: &DateTime<Tz>) -> Duration {
    match deadline {
        Some(at) => (at.clone() - now.clone())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_IDLE),
        None => MAX_IDLE,
    }
}

fn publish_api_state<Tz>(
    shared: Option<&Arc<Mutex<ApiSharedState>>>,
    scheduler: &AlarmScheduler<Tz>,
    now: &DateTime<Tz>,
    mode: TimeDisplayMode,
    fired_count: u64,
) -> Result<()>
where
    Tz: TimeZone,
    Tz::Offset: Copy + fmt::Display,
{
    let Some(shared) = shared else {
        return Ok(());
    };
    let snapshot = build_snapshot(scheduler, now, mode, fired_count);
    let mut guard = shared
        .lock()
        .map_err(|_| anyhow::anyhow!("failed to lock API state"))?;
    guard.runtime = snapshot;
    Ok(())
}

pub fn build_snapshot<Tz>(
    scheduler: &AlarmScheduler<Tz>,
    now: &DateTime<Tz>,
    mode: TimeDisplayMode,
    fired_count: u64,
) -> RuntimeSnapshot
where
    Tz: TimeZone,
    Tz::Offset: Copy + fmt::Display,
{
    let timezone = now.timezone();
    let policy = scheduler.skip_policy();
    let today = now.date_naive();

    let next = scheduler.armed().map(|occurrence| NextAlarmView {
        id: occurrence.alarm.id().to_string(),
        time: occurrence.alarm.time_label(),
        trigger_iso_local: occurrence.trigger_at.to_rfc3339(),
        minutes_until: occurrence.time_until(now).num_minutes(),
        display: format_next_alarm(Some(occurrence), now, mode),
    });

    let alarms = scheduler
        .alarms()
        .iter()
        .map(|alarm| AlarmView {
            id: alarm.id().to_string(),
            time: alarm.time_label(),
            enabled: alarm.enabled(),
            sound: alarm.sound().map(str::to_string),
            repeat: alarm.repeat().to_string(),
            repeat_mask: alarm.repeat().bits(),
            next_trigger_iso_local: if alarm.enabled() {
                next_trigger_in_tz(alarm, now, &timezone, policy).map(|at| at.to_rfc3339())
            } else {
                None
            },
        })
        .collect();

    let holidays = scheduler
        .holidays()
        .upcoming(today, PUBLISHED_HOLIDAY_DAYS)
        .into_iter()
        .map(|holiday| HolidayView {
            date: holiday.date,
            name: holiday.name,
        })
        .collect();

    RuntimeSnapshot {
        iso_local: now.to_rfc3339(),
        today: Some(today),
        skip_holidays: scheduler.settings().skip_holidays,
        next,
        display: format_next_alarm(scheduler.armed(), now, mode),
        alarms,
        holidays,
        holidays_last_update: scheduler.holidays().last_update().map(|at| at.to_rfc3339()),
        fired_count,
        updated_unix_ms: now.timestamp_millis(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, Weekday};
    use chrono_tz::Asia::Tokyo;
    use chrono_tz::Tz;

    use super::*;
    use crate::alarm::model::{AlarmDefinition, AlarmSettings, RepeatMask};
    use crate::holiday::{Holiday, HolidaySet};

    fn tokyo(d: u32, h: u32, min: u32) -> DateTime<Tz> {
        Tokyo
            .with_ymd_and_hms(2026, 10, d, h, min, 0)
            .single()
            .expect("valid tokyo time")
    }

    fn scheduler_with_holiday(skip: bool) -> AlarmScheduler<Tz> {
        let alarms = vec![
            AlarmDefinition::new("workday", 7, 0).expect("alarm"),
            AlarmDefinition::new("gym", 6, 0)
                .expect("alarm")
                .with_repeat(RepeatMask::from_weekdays([Weekday::Thu])),
            AlarmDefinition::new("off", 5, 0)
                .expect("alarm")
                .with_enabled(false),
        ];
        let holidays = HolidaySet::new(
            [Holiday::new(
                NaiveDate::from_ymd_opt(2026, 10, 20).expect("date"),
                "Test Day",
            )],
            None,
        );
        AlarmScheduler::new_in_tz(
            alarms,
            AlarmSettings {
                skip_holidays: skip,
            },
            Arc::new(holidays),
            Tokyo,
        )
    }

    #[test]
    fn snapshot_reports_armed_alarm_and_per_alarm_triggers() {
        let mut scheduler = scheduler_with_holiday(true);
        let mut timer = DeadlineTimer::<Tz>::default();
        let now = tokyo(19, 8, 0);
        scheduler.reschedule(&now, &mut timer);

        let snapshot = build_snapshot(&scheduler, &now, TimeDisplayMode::Hour24, 2);
        let next = snapshot.next.expect("next alarm");
        assert_eq!(next.id, "workday");
        assert_eq!(next.trigger_iso_local, "2026-10-21T07:00:00+09:00");
        assert_eq!(next.minutes_until, 47 * 60);
        assert_eq!(snapshot.display, "next alarm at 07:00 (Wed 2026-10-21), in 47h 0m");

        let gym = &snapshot.alarms[1];
        assert_eq!(gym.repeat, "Thu");
        assert_eq!(
            gym.next_trigger_iso_local.as_deref(),
            Some("2026-10-22T06:00:00+09:00")
        );
        assert!(snapshot.alarms[2].next_trigger_iso_local.is_none());

        assert_eq!(snapshot.holidays.len(), 1);
        assert!(snapshot.skip_holidays);
        assert_eq!(snapshot.fired_count, 2);
        assert_eq!(snapshot.today, NaiveDate::from_ymd_opt(2026, 10, 19));
    }

    #[test]
    fn snapshot_without_armed_alarm_shows_placeholder() {
        let scheduler = AlarmScheduler::new_in_tz(
            Vec::new(),
            AlarmSettings::default(),
            Arc::new(HolidaySet::default()),
            Tokyo,
        );
        let snapshot = build_snapshot(&scheduler, &tokyo(19, 8, 0), TimeDisplayMode::Hour24, 0);
        assert!(snapshot.next.is_none());
        assert_eq!(snapshot.display, "next alarm: --:--");
    }

    #[test]
    fn idle_duration_is_capped_at_one_second() {
        let now = tokyo(19, 6, 59);
        assert_eq!(idle_duration::<Tz>(None, &now), MAX_IDLE);

        let far = tokyo(19, 7, 0);
        assert_eq!(idle_duration(Some(&far), &now), MAX_IDLE);

        let near = now + chrono::Duration::milliseconds(250);
        assert_eq!(idle_duration(Some(&near), &now), Duration::from_millis(250));

        let past = now - chrono::Duration::seconds(5);
        assert_eq!(idle_duration(Some(&past), &now), Duration::ZERO);
    }

    #[test]
    fn poll_fires_due_alarm_before_applying_a_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let alarms_path = dir.path().join("alarms.json");
        let mut watch = SourceFiles {
            alarms: WatchedFile::new(&alarms_path),
            holidays: WatchedFile::new(&dir.path().join("holidays.json")),
        };
        let mut scheduler = AlarmScheduler::new_in_tz(
            vec![AlarmDefinition::new("wake", 7, 0).expect("alarm")],
            AlarmSettings::default(),
            Arc::new(HolidaySet::default()),
            Tokyo,
        );
        let mut timer = DeadlineTimer::<Tz>::default();
        scheduler.reschedule(&tokyo(19, 6, 0), &mut timer);
        assert!(poll(&mut scheduler, &mut timer, &mut watch, &tokyo(19, 6, 59)).is_empty());

        fs::write(
            &alarms_path,
            r#"{"version":1,"alarms":[
                {"id":"wake","hour":7,"minute":0},
                {"id":"tea","hour":7,"minute":30}
            ]}"#,
        )
        .expect("write alarms");

        let fired = poll(&mut scheduler, &mut timer, &mut watch, &tokyo(19, 7, 0));
        let ids = fired
            .iter()
            .map(|occurrence| occurrence.alarm.id())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["wake"]);
        assert_eq!(scheduler.alarms().len(), 2);
        assert_eq!(
            scheduler.armed().map(|next| next.alarm.id().to_string()),
            Some("tea".to_string())
        );
        assert_eq!(timer.deadline(), Some(&tokyo(19, 7, 30)));
    }

    #[test]
    fn watched_file_notices_modification() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alarms.json");
        let mut watched = WatchedFile::new(&path);
        assert!(!watched.changed());

        fs::write(&path, "{}").expect("write");
        assert!(watched.changed());
        assert!(!watched.changed());
    }
}
