pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, Utc};

pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Membership oracle for public holidays.
pub trait HolidayLookup {
    fn is_holiday(&self, date: NaiveDate) -> bool;
}

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, DATE_KEY_FORMAT).ok()
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: Option<String>,
}

impl Holiday {
    pub fn new(date: NaiveDate, name: impl Into<String>) -> Self {
        Self {
            date,
            name: Some(name.into()),
        }
    }
}

/// Holiday dates keyed by `yyyy-mm-dd`, with the time they were last refreshed.
///
/// A set is never edited after construction; refreshes build a new one.
#[derive(Debug, Clone, Default)]
pub struct HolidaySet {
    days: BTreeMap<String, Option<String>>,
    last_update: Option<DateTime<Utc>>,
}

impl HolidaySet {
    pub fn new<I>(holidays: I, last_update: Option<DateTime<Utc>>) -> Self
    where
        I: IntoIterator<Item = Holiday>,
    {
        let days = holidays
            .into_iter()
            .map(|holiday| (date_key(holiday.date), holiday.name))
            .collect();
        Self { days, last_update }
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.days.contains_key(key)
    }

    pub fn name_for(&self, date: NaiveDate) -> Option<&str> {
        self.days.get(&date_key(date))?.as_deref()
    }

    /// Holidays in date order.
    pub fn iter(&self) -> impl Iterator<Item = Holiday> + '_ {
        self.days.iter().filter_map(|(key, name)| {
            Some(Holiday {
                date: parse_date_key(key)?,
                name: name.clone(),
            })
        })
    }

    /// Holidays from `today` through `today + days`, inclusive.
    pub fn upcoming(&self, today: NaiveDate, days: u32) -> Vec<Holiday> {
        let end = today
            .checked_add_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MAX);
        self.days
            .range(date_key(today)..=date_key(end))
            .filter_map(|(key, name)| {
                Some(Holiday {
                    date: parse_date_key(key)?,
                    name: name.clone(),
                })
            })
            .collect()
    }
}

impl HolidayLookup for HolidaySet {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.contains_key(&date_key(date))
    }
}
