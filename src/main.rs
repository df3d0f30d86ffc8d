mod alarm;
mod api;
mod daemon;
mod holiday;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate, NaiveDateTime, Utc, Weekday};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::alarm::model::{AlarmDefinition, RepeatMask};
use crate::alarm::recurrence::{SkipPolicy, next_trigger, resolve_local_datetime};
use crate::alarm::scheduler::{TimeDisplayMode, format_next_alarm, format_trigger_with_mode};
use crate::alarm::selector::next_occurrence;
use crate::alarm::store::AlarmStore;
use crate::api::ApiServerConfig;
use crate::daemon::DaemonOptions;
use crate::holiday::store::{HolidayStore, JsonFileSource};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliTimeFormat {
    #[value(name = "24")]
    Hour24,
    #[value(name = "12")]
    Hour12,
}

impl From<CliTimeFormat> for TimeDisplayMode {
    fn from(value: CliTimeFormat) -> Self {
        match value {
            CliTimeFormat::Hour24 => TimeDisplayMode::Hour24,
            CliTimeFormat::Hour12 => TimeDisplayMode::Hour12,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Parser, Debug)]
#[command(
    name = "wakeclock",
    version,
    about = "Alarm clock with weekly repeats and holiday skipping"
)]
struct Cli {
    #[arg(long, global = true, default_value = "alarms.json")]
    alarms: PathBuf,

    #[arg(long, global = true, default_value = "holidays.json")]
    holidays: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = CliTimeFormat::Hour24)]
    time_format: CliTimeFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show every alarm with its next trigger.
    List,
    /// Add an alarm at HH:MM.
    Add {
        time: String,
        #[arg(long)]
        id: Option<String>,
        /// Comma separated weekdays; omit for every day.
        #[arg(long, value_delimiter = ',', value_parser = parse_weekday)]
        days: Vec<Weekday>,
        #[arg(long)]
        sound: Option<String>,
        #[arg(long)]
        disabled: bool,
    },
    Remove {
        id: String,
    },
    Enable {
        id: String,
    },
    Disable {
        id: String,
    },
    /// Set the weekdays an alarm repeats on; no days means every day.
    Repeat {
        id: String,
        #[arg(value_delimiter = ',', value_parser = parse_weekday, conflicts_with = "mask")]
        days: Vec<Weekday>,
        /// Raw mask, bit 0 = Sunday through bit 6 = Saturday.
        #[arg(long)]
        mask: Option<u32>,
    },
    /// Set or clear an alarm's sound.
    Sound {
        id: String,
        sound: Option<String>,
    },
    /// Print the next alarm to ring.
    Next {
        /// Local reference time, `YYYY-MM-DDTHH:MM[:SS]`; defaults to now.
        #[arg(long, value_parser = parse_local_naive)]
        at: Option<NaiveDateTime>,
    },
    SkipHolidays {
        #[arg(value_enum)]
        state: Toggle,
    },
    #[command(subcommand)]
    Holidays(HolidayCommand),
    /// Keep the next alarm armed and ring it when due.
    Run {
        #[arg(long, default_value = "127.0.0.1")]
        api_bind: String,
        #[arg(long, default_value_t = 8099)]
        api_port: u16,
        #[arg(long)]
        no_api: bool,
        /// Arm, print the next alarm and exit.
        #[arg(long)]
        once: bool,
    },
}

#[derive(Subcommand, Debug)]
enum HolidayCommand {
    /// Show holidays in the coming days.
    List {
        #[arg(long, default_value_t = 30)]
        days: u32,
        #[arg(long, value_parser = parse_date)]
        from: Option<NaiveDate>,
    },
    /// Replace the cached calendar with a `{"yyyy-mm-dd": "name"}` file.
    Import {
        file: PathBuf,
    },
    Status,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wakeclock=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mode = TimeDisplayMode::from(cli.time_format);

    match cli.command {
        Command::List => list_alarms(&cli.alarms, &cli.holidays, mode),
        Command::Add {
            time,
            id,
            days,
            sound,
            disabled,
        } => {
            let (hour, minute) = parse_time_of_day(&time)?;
            let mut store = AlarmStore::open(&cli.alarms)?;
            let id = match id {
                Some(id) => id,
                None => store.generate_id(Local::now()),
            };
            let alarm = AlarmDefinition::new(id, hour, minute)?
                .with_repeat(RepeatMask::from_weekdays(days))
                .with_sound(sound)
                .with_enabled(!disabled);
            store.add(alarm.clone())?;
            store.save()?;
            println!(
                "added {} at {} ({})",
                alarm.id(),
                alarm.time_label(),
                alarm.repeat()
            );
            Ok(())
        }
        Command::Remove { id } => {
            let mut store = AlarmStore::open(&cli.alarms)?;
            let removed = store.remove(&id)?;
            store.save()?;
            println!("removed {}", removed.id());
            Ok(())
        }
        Command::Enable { id } => set_enabled(&cli.alarms, &id, true),
        Command::Disable { id } => set_enabled(&cli.alarms, &id, false),
        Command::Repeat { id, days, mask } => {
            let mut store = AlarmStore::open(&cli.alarms)?;
            let mask = match mask {
                Some(bits) => RepeatMask::from_bits(bits)?,
                None => RepeatMask::from_weekdays(days),
            };
            let alarm = store.modify(&id, |alarm| alarm.with_repeat(mask))?;
            store.save()?;
            println!("{} repeats {}", alarm.id(), alarm.repeat());
            Ok(())
        }
        Command::Sound { id, sound } => {
            let mut store = AlarmStore::open(&cli.alarms)?;
            let alarm = store.modify(&id, |alarm| alarm.with_sound(sound))?;
            store.save()?;
            println!("{} sound {}", alarm.id(), alarm.sound().unwrap_or("default"));
            Ok(())
        }
        Command::Next { at } => print_next(&cli.alarms, &cli.holidays, at, mode),
        Command::SkipHolidays { state } => {
            let mut store = AlarmStore::open(&cli.alarms)?;
            store.set_skip_holidays(state == Toggle::On);
            store.save()?;
            println!(
                "skip weekends and holidays: {}",
                if state == Toggle::On { "on" } else { "off" }
            );
            Ok(())
        }
        Command::Holidays(command) => run_holiday_command(&cli.holidays, command),
        Command::Run {
            api_bind,
            api_port,
            no_api,
            once,
        } => daemon::run(DaemonOptions {
            alarms_path: cli.alarms,
            holidays_path: cli.holidays,
            time_mode: mode,
            api: (!no_api).then_some(ApiServerConfig {
                bind_addr: api_bind,
                port: api_port,
            }),
            once,
        }),
    }
}

fn list_alarms(alarms_path: &Path, holidays_path: &Path, mode: TimeDisplayMode) -> Result<()> {
    let store = AlarmStore::open(alarms_path)?;
    if store.list().is_empty() {
        println!("no alarms configured in {}", store.path().display());
        return Ok(());
    }
    let holidays = HolidayStore::open(holidays_path)?.snapshot();
    let policy = SkipPolicy::from_setting(store.settings().skip_holidays, holidays.as_ref());
    let now = Local::now();

    for alarm in store.list() {
        let next = if alarm.enabled() {
            next_trigger(alarm, &now, policy)
        } else {
            None
        };
        println!(
            "{:<24} {:<5} {:<3} {:<28} next {}",
            alarm.id(),
            alarm.time_label(),
            if alarm.enabled() { "on" } else { "off" },
            alarm.repeat().to_string(),
            format_trigger_with_mode(next.as_ref(), mode)
        );
    }
    Ok(())
}

fn set_enabled(alarms_path: &Path, id: &str, enabled: bool) -> Result<()> {
    let mut store = AlarmStore::open(alarms_path)?;
    let alarm = store.modify(id, |alarm| alarm.with_enabled(enabled))?;
    store.save()?;
    println!(
        "{} {}",
        alarm.id(),
        if alarm.enabled() { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn print_next(
    alarms_path: &Path,
    holidays_path: &Path,
    at: Option<NaiveDateTime>,
    mode: TimeDisplayMode,
) -> Result<()> {
    let store = AlarmStore::open(alarms_path)?;
    let holidays = HolidayStore::open(holidays_path)?.snapshot();
    let policy = SkipPolicy::from_setting(store.settings().skip_holidays, holidays.as_ref());
    let now = match at {
        Some(naive) => match resolve_local_datetime(&Local, naive) {
            Some(now) => now,
            None => bail!("{naive} does not exist in the local time zone"),
        },
        None => Local::now(),
    };

    let next = next_occurrence(store.list(), &now, policy);
    println!("{}", format_next_alarm(next.as_ref(), &now, mode));
    if let Some(occurrence) = next {
        println!("alarm: {}", occurrence.alarm.id());
    }
    if policy.is_enabled() {
        println!("skipping weekends and holidays");
    }
    Ok(())
}

fn run_holiday_command(holidays_path: &Path, command: HolidayCommand) -> Result<()> {
    match command {
        HolidayCommand::List { days, from } => {
            let store = HolidayStore::open(holidays_path)?;
            let today = from.unwrap_or_else(|| Local::now().date_naive());
            let upcoming = store.snapshot().upcoming(today, days);
            if upcoming.is_empty() {
                println!("no holidays in the next {days} days");
            }
            for holiday in upcoming {
                println!(
                    "{}  {}",
                    holiday.date.format("%Y-%m-%d %a"),
                    holiday.name.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        HolidayCommand::Import { file } => {
            let mut store = HolidayStore::open(holidays_path)?;
            let count = store.refresh(&JsonFileSource::new(&file), Utc::now())?;
            println!("imported {count} holidays from {}", file.display());
            Ok(())
        }
        HolidayCommand::Status => {
            let store = HolidayStore::open(holidays_path)?;
            let snapshot = store.snapshot();
            println!("holidays: {}", snapshot.len());
            let today = Local::now().date_naive();
            if let Some(name) = snapshot.name_for(today) {
                println!("today: {name}");
            }
            match store.last_update() {
                Some(at) => println!("last update: {}", at.to_rfc3339()),
                None => println!("last update: never"),
            }
            if store.should_auto_update(Utc::now()) {
                println!("update due: yes");
            } else {
                println!("update due: no");
            }
            Ok(())
        }
    }
}

fn parse_time_of_day(text: &str) -> Result<(u32, u32)> {
    let Some((hour, minute)) = text.trim().split_once(':') else {
        bail!("invalid time '{text}', expected HH:MM");
    };
    let hour = hour
        .parse::<u32>()
        .with_context(|| format!("invalid hour in '{text}'"))?;
    let minute = minute
        .parse::<u32>()
        .with_context(|| format!("invalid minute in '{text}'"))?;
    Ok((hour, minute))
}

fn parse_weekday(text: &str) -> Result<Weekday, String> {
    text.trim()
        .parse::<Weekday>()
        .map_err(|_| format!("unknown weekday '{text}', expected Mon..Sun"))
}

fn parse_local_naive(text: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M"))
        .map_err(|_| format!("invalid local time '{text}', expected YYYY-MM-DDTHH:MM[:SS]"))
}

fn parse_date(text: &str) -> Result<NaiveDate, String> {
    crate::holiday::parse_date_key(text)
        .ok_or_else(|| format!("invalid date '{text}', expected YYYY-MM-DD"))
}
