use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{NaiveTime, Timelike, Weekday};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum AlarmError {
    #[error("invalid time of day {hour:02}:{minute:02}, expected 00:00 through 23:59")]
    InvalidTimeOfDay { hour: u32, minute: u32 },
    #[error("repeat mask {0:#b} has bits outside Sunday..Saturday")]
    InvalidRepeatMask(u32),
    #[error("duplicate alarm id found: {0}")]
    DuplicateId(String),
    #[error("no alarm with id '{0}'")]
    UnknownAlarm(String),
}

/// Days of the week an alarm repeats on.
///
/// Bit 0 is Sunday through bit 6 for Saturday, regardless of locale. An empty
/// mask means the alarm fires every day.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct RepeatMask(u8);

impl RepeatMask {
    pub const EVERY_DAY: Self = Self(0);
    const ALL_DAYS: u8 = 0b111_1111;

    pub fn from_bits(bits: u32) -> Result<Self, AlarmError> {
        match u8::try_from(bits) {
            Ok(value) if value <= Self::ALL_DAYS => Ok(Self(value)),
            _ => Err(AlarmError::InvalidRepeatMask(bits)),
        }
    }

    pub fn from_weekdays<I>(days: I) -> Self
    where
        I: IntoIterator<Item = Weekday>,
    {
        Self(days.into_iter().fold(0, |mask, day| mask | weekday_bit(day)))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_every_day(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & weekday_bit(day) != 0
    }

    /// Selected days, Sunday first.
    pub fn weekdays(self) -> Vec<Weekday> {
        WEEK_FROM_SUNDAY
            .into_iter()
            .filter(|day| self.contains(*day))
            .collect()
    }
}

impl fmt::Display for RepeatMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_every_day() {
            return f.write_str("every day");
        }
        let tokens = self
            .weekdays()
            .into_iter()
            .map(weekday_to_token)
            .collect::<Vec<_>>();
        f.write_str(&tokens.join(","))
    }
}

const WEEK_FROM_SUNDAY: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

pub fn weekday_bit(day: Weekday) -> u8 {
    1_u8 << day.num_days_from_sunday()
}

/// A single alarm. Edits go through the `with_*` builders, which keep the id.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AlarmDefinition {
    id: String,
    time: NaiveTime,
    enabled: bool,
    sound: Option<String>,
    repeat: RepeatMask,
}

impl AlarmDefinition {
    pub fn new(id: impl Into<String>, hour: u32, minute: u32) -> Result<Self, AlarmError> {
        let time = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or(AlarmError::InvalidTimeOfDay { hour, minute })?;
        Ok(Self {
            id: id.into(),
            time,
            enabled: true,
            sound: None,
            repeat: RepeatMask::EVERY_DAY,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hour(&self) -> u32 {
        self.time.hour()
    }

    pub fn minute(&self) -> u32 {
        self.time.minute()
    }

    pub fn time_of_day(&self) -> NaiveTime {
        self.time
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn sound(&self) -> Option<&str> {
        self.sound.as_deref()
    }

    pub fn repeat(&self) -> RepeatMask {
        self.repeat
    }

    pub fn minutes_since_midnight(&self) -> u32 {
        self.hour() * 60 + self.minute()
    }

    pub fn time_label(&self) -> String {
        format!("{:02}:{:02}", self.hour(), self.minute())
    }

    pub fn with_enabled(&self, enabled: bool) -> Self {
        Self {
            enabled,
            ..self.clone()
        }
    }

    pub fn with_repeat(&self, repeat: RepeatMask) -> Self {
        Self {
            repeat,
            ..self.clone()
        }
    }

    pub fn with_sound(&self, sound: Option<String>) -> Self {
        Self {
            sound,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct AlarmSettings {
    pub skip_holidays: bool,
}

#[derive(Debug, Clone)]
pub struct AlarmConfig {
    #[allow(dead_code)]
    pub version: u32,
    pub settings: AlarmSettings,
    pub alarms: Vec<AlarmDefinition>,
}

pub fn load_alarm_config(path: &Path) -> Result<AlarmConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read alarm file {}", path.display()))?;
    parse_alarm_config_text(&content)
}

pub fn parse_alarm_config_text(content: &str) -> Result<AlarmConfig> {
    let raw = serde_json::from_str::<AlarmConfigFile>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != 1 {
        bail!(
            "unsupported alarm config version {}; expected version 1",
            raw.version
        );
    }

    let mut ids = HashSet::new();
    let mut alarms = Vec::with_capacity(raw.alarms.len());
    for alarm in raw.alarms {
        if !ids.insert(alarm.id.clone()) {
            return Err(AlarmError::DuplicateId(alarm.id).into());
        }
        let repeat = RepeatMask::from_weekdays(
            alarm.repeat_days.into_iter().map(WeekdayToken::to_chrono),
        );
        let definition = AlarmDefinition::new(alarm.id.clone(), alarm.hour, alarm.minute)
            .with_context(|| format!("alarm '{}' has an invalid time", alarm.id))?
            .with_enabled(alarm.enabled)
            .with_sound(alarm.sound)
            .with_repeat(repeat);
        alarms.push(definition);
    }

    Ok(AlarmConfig {
        version: raw.version,
        settings: AlarmSettings {
            skip_holidays: raw.settings.skip_holidays,
        },
        alarms,
    })
}

pub fn save_alarm_config(
    path: &Path,
    alarms: &[AlarmDefinition],
    settings: &AlarmSettings,
) -> Result<()> {
    let mut serialized_alarms = Vec::with_capacity(alarms.len());
    for alarm in alarms {
        let mut alarm_obj = Map::new();
        alarm_obj.insert("id".to_string(), Value::String(alarm.id().to_string()));
        alarm_obj.insert("hour".to_string(), Value::Number(alarm.hour().into()));
        alarm_obj.insert("minute".to_string(), Value::Number(alarm.minute().into()));
        alarm_obj.insert("enabled".to_string(), Value::Bool(alarm.enabled()));
        alarm_obj.insert(
            "sound".to_string(),
            alarm
                .sound()
                .map(|sound| Value::String(sound.to_string()))
                .unwrap_or(Value::Null),
        );
        let days = alarm
            .repeat()
            .weekdays()
            .into_iter()
            .map(|day| Value::String(weekday_to_token(day).to_string()))
            .collect::<Vec<_>>();
        alarm_obj.insert("repeat_days".to_string(), Value::Array(days));

        serialized_alarms.push(Value::Object(alarm_obj));
    }

    let payload = json!({
        "version": 1,
        "settings": {
            "skip_holidays": settings.skip_holidays,
        },
        "alarms": serialized_alarms,
    });
    let text = serde_json::to_string_pretty(&payload)?;
    fs::write(path, format!("{text}\n"))
        .with_context(|| format!("unable to write alarm file {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct AlarmConfigFile {
    version: u32,
    #[serde(default)]
    settings: AlarmSettingsFile,
    #[serde(default)]
    alarms: Vec<AlarmFile>,
}

#[derive(Debug, Deserialize, Default)]
struct AlarmSettingsFile {
    #[serde(default)]
    skip_holidays: bool,
}

#[derive(Debug, Deserialize)]
struct AlarmFile {
    id: String,
    hour: u32,
    minute: u32,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    sound: Option<String>,
    #[serde(default)]
    repeat_days: Vec<WeekdayToken>,
}

#[derive(Debug, Deserialize)]
enum WeekdayToken {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl WeekdayToken {
    fn to_chrono(self) -> Weekday {
        match self {
            WeekdayToken::Sun => Weekday::Sun,
            WeekdayToken::Mon => Weekday::Mon,
            WeekdayToken::Tue => Weekday::Tue,
            WeekdayToken::Wed => Weekday::Wed,
            WeekdayToken::Thu => Weekday::Thu,
            WeekdayToken::Fri => Weekday::Fri,
            WeekdayToken::Sat => Weekday::Sat,
        }
    }
}

fn default_enabled() -> bool {
    true
}

pub fn weekday_to_token(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "Sun",
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
    }
}
