use std::fs;
use std::path::Path;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

fn valid_alarm_json() -> &'static str {
    r#"
{
  "version": 1,
  "settings": { "skip_holidays": false },
  "alarms": [
    { "id": "wake", "hour": 7, "minute": 0, "enabled": true, "sound": "chime" },
    { "id": "early", "hour": 6, "minute": 30, "enabled": true },
    { "id": "gym", "hour": 6, "minute": 0, "enabled": true, "repeat_days": ["Thu"] }
  ]
}
"#
}

fn holiday_calendar_json() -> &'static str {
    r#"{ "2026-10-20": "Test Day", "2026-11-03": "Culture Day" }"#
}

fn wakeclock(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("wakeclock");
    cmd.env("TZ", "UTC")
        .env_remove("RUST_LOG")
        .arg("--alarms")
        .arg(dir.join("alarms.json"))
        .arg("--holidays")
        .arg(dir.join("holidays.json"));
    cmd
}

#[test]
fn list_shows_alarms_in_time_order() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("alarms.json"), valid_alarm_json()).expect("write json");

    wakeclock(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("gym"))
        .stdout(predicate::str::contains("every day"))
        .stdout(predicate::str::is_match(r"(?s)06:00.*06:30.*07:00").expect("regex"));
}

#[test]
fn malformed_json_fails_with_clear_error() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("alarms.json"), "{ not-valid-json ").expect("write invalid json");

    wakeclock(dir.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid JSON"));
}

#[test]
fn out_of_range_time_is_rejected() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("alarms.json"),
        r#"{"version":1,"alarms":[{"id":"bad","hour":24,"minute":0}]}"#,
    )
    .expect("write json");

    wakeclock(dir.path())
        .arg("next")
        .assert()
        .failure()
        .stderr(predicate::str::contains("alarm 'bad' has an invalid time"));
}

#[test]
fn next_picks_the_soonest_alarm() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("alarms.json"), valid_alarm_json()).expect("write json");

    wakeclock(dir.path())
        .args(["next", "--at", "2026-10-19T06:10:00"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "next alarm at 06:30 (Mon 2026-10-19), in 0h 20m",
        ))
        .stdout(predicate::str::contains("alarm: early"));
}

#[test]
fn next_uses_twelve_hour_format_when_asked() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("alarms.json"), valid_alarm_json()).expect("write json");

    wakeclock(dir.path())
        .args(["--time-format", "12", "next", "--at", "2026-10-19T06:10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("next alarm at 06:30 AM"));
}

#[test]
fn imported_holidays_are_skipped_when_enabled() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("alarms.json"),
        r#"{"version":1,"alarms":[{"id":"wake","hour":7,"minute":0}]}"#,
    )
    .expect("write json");
    let calendar = dir.path().join("calendar.json");
    fs::write(&calendar, holiday_calendar_json()).expect("write calendar");

    wakeclock(dir.path())
        .args(["holidays", "import"])
        .arg(&calendar)
        .assert()
        .success()
        .stdout(predicate::str::contains("imported 2 holidays"));

    wakeclock(dir.path())
        .args(["next", "--at", "2026-10-19T08:00:00"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(Tue 2026-10-20)"));

    wakeclock(dir.path())
        .args(["skip-holidays", "on"])
        .assert()
        .success();

    wakeclock(dir.path())
        .args(["next", "--at", "2026-10-19T08:00:00"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(Wed 2026-10-21)"));

    wakeclock(dir.path())
        .args(["holidays", "list", "--from", "2026-10-16", "--days", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2026-10-20 Tue  Test Day"))
        .stdout(predicate::str::contains("Culture Day").not());
}

#[test]
fn add_then_list_shows_repeat_days() {
    let dir = tempdir().expect("tempdir");

    wakeclock(dir.path())
        .args(["add", "07:15", "--id", "weekday", "--days", "Mon,Wed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("added weekday at 07:15 (Mon,Wed)"));

    wakeclock(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("weekday"))
        .stdout(predicate::str::contains("Mon,Wed"));

    wakeclock(dir.path())
        .args(["add", "07:15", "--id", "weekday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate alarm id found: weekday"));
}

#[test]
fn no_enabled_alarms_prints_placeholder() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("alarms.json"), valid_alarm_json()).expect("write json");

    for id in ["wake", "early", "gym"] {
        wakeclock(dir.path()).args(["disable", id]).assert().success();
    }

    wakeclock(dir.path())
        .arg("next")
        .assert()
        .success()
        .stdout(predicate::str::contains("next alarm: --:--"));
}

#[test]
fn removing_unknown_alarm_fails() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("alarms.json"), valid_alarm_json()).expect("write json");

    wakeclock(dir.path())
        .args(["remove", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no alarm with id 'nope'"));
}

#[test]
fn run_once_prints_banner_and_exits() {
    let dir = tempdir().expect("tempdir");

    wakeclock(dir.path())
        .args(["run", "--once", "--no-api"])
        .assert()
        .success()
        .stdout(predicate::str::contains("next alarm: --:--"));
}

#[test]
fn repeat_accepts_days_or_a_raw_mask() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("alarms.json"), valid_alarm_json()).expect("write json");

    wakeclock(dir.path())
        .args(["repeat", "wake", "Sat,Sun"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wake repeats Sun,Sat"));

    wakeclock(dir.path())
        .args(["repeat", "wake", "--mask", "62"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wake repeats Mon,Tue,Wed,Thu,Fri"));

    wakeclock(dir.path())
        .args(["repeat", "wake", "--mask", "128"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("has bits outside Sunday..Saturday"));
}
