use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Months, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::holiday::{Holiday, HolidaySet, date_key, parse_date_key};

pub const AUTO_UPDATE_INTERVAL_MONTHS: u32 = 6;

/// Somewhere a full holiday calendar can be pulled from.
pub trait HolidaySource {
    fn describe(&self) -> String;
    fn fetch(&self) -> Result<Vec<Holiday>>;
}

/// Reads a `{"yyyy-mm-dd": "name", ...}` calendar from disk.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HolidaySource for JsonFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn fetch(&self) -> Result<Vec<Holiday>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("unable to read holiday calendar {}", self.path.display()))?;
        parse_holiday_calendar_json(&text)
    }
}

/// Parses a date-to-name JSON object. Entries with a malformed date or a
/// non-string name are dropped.
pub fn parse_holiday_calendar_json(text: &str) -> Result<Vec<Holiday>> {
    let object = serde_json::from_str::<Map<String, Value>>(text).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid holiday JSON at line {line}, column {column}: {err}")
    })?;

    let mut holidays = Vec::with_capacity(object.len());
    for (key, value) in object {
        let Some(date) = parse_date_key(&key) else {
            warn!(entry = %key, "skipping holiday with malformed date");
            continue;
        };
        let Some(name) = value.as_str() else {
            warn!(entry = %key, "skipping holiday with non-string name");
            continue;
        };
        holidays.push(Holiday::new(date, name));
    }
    holidays.sort_by_key(|holiday| holiday.date);
    Ok(holidays)
}

/// Cached holiday calendar. Readers take an `Arc` snapshot; a refresh swaps
/// in a whole new set.
pub struct HolidayStore {
    path: PathBuf,
    snapshot: Arc<HolidaySet>,
}

impl HolidayStore {
    /// Opens the cache file, treating a missing file as an empty, never
    /// refreshed calendar.
    pub fn open(path: &Path) -> Result<Self> {
        let set = if path.exists() {
            load_holiday_file(path).with_context(|| format!("failed to load {}", path.display()))?
        } else {
            HolidaySet::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            snapshot: Arc::new(set),
        })
    }

    pub fn snapshot(&self) -> Arc<HolidaySet> {
        Arc::clone(&self.snapshot)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.snapshot.last_update()
    }

    pub fn should_auto_update(&self, now: DateTime<Utc>) -> bool {
        match self.last_update() {
            None => true,
            Some(last) => last
                .checked_add_months(Months::new(AUTO_UPDATE_INTERVAL_MONTHS))
                .is_none_or(|due| now > due),
        }
    }

    /// Replaces the calendar with whatever `source` returns. On failure the
    /// current snapshot and file are left as they were.
    pub fn refresh(&mut self, source: &dyn HolidaySource, now: DateTime<Utc>) -> Result<usize> {
        let holidays = source
            .fetch()
            .with_context(|| format!("holiday refresh from {} failed", source.describe()))?;
        let next = HolidaySet::new(holidays, Some(now));
        save_holiday_file(&self.path, &next)?;
        let count = next.len();
        self.snapshot = Arc::new(next);
        info!(source = %source.describe(), holidays = count, "holiday calendar refreshed");
        Ok(count)
    }
}

#[derive(Debug, Deserialize)]
struct HolidayFile {
    version: u32,
    #[serde(default)]
    last_update: Option<String>,
    #[serde(default)]
    holidays: Map<String, Value>,
}

fn load_holiday_file(path: &Path) -> Result<HolidaySet> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read holiday file {}", path.display()))?;
    let raw = serde_json::from_str::<HolidayFile>(&content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;
    if raw.version != 1 {
        bail!(
            "unsupported holiday file version {}; expected version 1",
            raw.version
        );
    }

    let last_update = match raw.last_update.as_deref() {
        Some(text) => Some(
            DateTime::parse_from_rfc3339(text)
                .with_context(|| format!("invalid last_update '{text}', expected RFC 3339"))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let mut holidays = Vec::with_capacity(raw.holidays.len());
    for (key, value) in raw.holidays {
        let Some(date) = parse_date_key(&key) else {
            bail!("invalid holiday date '{key}', expected yyyy-mm-dd");
        };
        holidays.push(Holiday {
            date,
            name: value.as_str().map(str::to_string),
        });
    }
    Ok(HolidaySet::new(holidays, last_update))
}

fn save_holiday_file(path: &Path, set: &HolidaySet) -> Result<()> {
    let mut days = Map::new();
    for holiday in set.iter() {
        let name = holiday.name.map(Value::String).unwrap_or(Value::Null);
        days.insert(date_key(holiday.date), name);
    }
    let payload = json!({
        "version": 1,
        "last_update": set.last_update().map(|at| at.to_rfc3339()),
        "holidays": days,
    });
    let text = serde_json::to_string_pretty(&payload)?;
    fs::write(path, format!("{text}\n"))
        .with_context(|| format!("unable to write holiday file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};

    use super::*;
    use crate::holiday::HolidayLookup;

    struct FixedSource(Vec<Holiday>);

    impl HolidaySource for FixedSource {
        fn describe(&self) -> String {
            "fixed".to_string()
        }

        fn fetch(&self) -> Result<Vec<Holiday>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    impl HolidaySource for FailingSource {
        fn describe(&self) -> String {
            "offline".to_string()
        }

        fn fetch(&self) -> Result<Vec<Holiday>> {
            bail!("network unreachable")
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0)
            .single()
            .expect("valid datetime")
    }

    #[test]
    fn parses_date_to_name_object_and_skips_bad_entries() {
        let text = r#"{
            "2026-11-23": "Labor Thanksgiving Day",
            "2026-11-03": "Culture Day",
            "not-a-date": "Nope",
            "2026-12-31": 7
        }"#;
        let holidays = parse_holiday_calendar_json(text).expect("parse");
        assert_eq!(
            holidays,
            vec![
                Holiday::new(date(2026, 11, 3), "Culture Day"),
                Holiday::new(date(2026, 11, 23), "Labor Thanksgiving Day"),
            ]
        );
    }

    #[test]
    fn rejects_non_object_calendar() {
        let err = parse_holiday_calendar_json("[1, 2]").expect_err("array should fail");
        assert!(err.to_string().contains("invalid holiday JSON"));
    }

    #[test]
    fn never_refreshed_store_wants_update() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HolidayStore::open(&dir.path().join("holidays.json")).expect("open");
        assert!(store.snapshot().is_empty());
        assert!(store.should_auto_update(utc(2026, 10, 16)));
    }

    #[test]
    fn refresh_persists_and_swaps_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("holidays.json");
        let mut store = HolidayStore::open(&path).expect("open");
        let before = store.snapshot();

        let source = FixedSource(vec![Holiday::new(date(2026, 10, 20), "Test Day")]);
        let count = store.refresh(&source, utc(2026, 10, 16)).expect("refresh");
        assert_eq!(count, 1);

        assert!(before.is_empty());
        assert!(store.snapshot().is_holiday(date(2026, 10, 20)));
        assert_eq!(store.last_update(), Some(utc(2026, 10, 16)));

        let reopened = HolidayStore::open(&path).expect("reopen");
        let snapshot = reopened.snapshot();
        assert_eq!(snapshot.name_for(date(2026, 10, 20)), Some("Test Day"));
        assert_eq!(snapshot.last_update(), Some(utc(2026, 10, 16)));
    }

    #[test]
    fn failed_refresh_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = HolidayStore::open(&dir.path().join("holidays.json")).expect("open");
        let source = FixedSource(vec![Holiday::new(date(2026, 10, 20), "Test Day")]);
        store.refresh(&source, utc(2026, 10, 16)).expect("refresh");

        let err = store
            .refresh(&FailingSource, utc(2026, 10, 17))
            .expect_err("offline source should fail");
        assert!(format!("{err:#}").contains("network unreachable"));
        assert!(store.snapshot().is_holiday(date(2026, 10, 20)));
        assert_eq!(store.last_update(), Some(utc(2026, 10, 16)));
    }

    #[test]
    fn auto_update_due_after_six_months() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = HolidayStore::open(&dir.path().join("holidays.json")).expect("open");
        store
            .refresh(&FixedSource(Vec::new()), utc(2026, 1, 10))
            .expect("refresh");

        assert!(!store.should_auto_update(utc(2026, 7, 10)));
        assert!(store.should_auto_update(utc(2026, 7, 11)));
    }
}
