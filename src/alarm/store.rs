use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::debug;

use crate::alarm::model::{
    AlarmDefinition, AlarmError, AlarmSettings, load_alarm_config, save_alarm_config,
};

/// File-backed alarm list plus the settings that live beside it.
///
/// Alarms are kept ordered by time of day; edits replace the stored value by id.
pub struct AlarmStore {
    path: PathBuf,
    settings: AlarmSettings,
    alarms: Vec<AlarmDefinition>,
    next_seq: u64,
}

impl AlarmStore {
    /// Opens the alarm file, treating a missing file as an empty list.
    pub fn open(path: &Path) -> Result<Self> {
        let (settings, mut alarms) = if path.exists() {
            let config = load_alarm_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            (config.settings, config.alarms)
        } else {
            debug!(path = %path.display(), "alarm file missing, starting empty");
            (AlarmSettings::default(), Vec::new())
        };
        alarms.sort_by_key(AlarmDefinition::minutes_since_midnight);
        Ok(Self {
            path: path.to_path_buf(),
            settings,
            alarms,
            next_seq: 1,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> &[AlarmDefinition] {
        &self.alarms
    }

    pub fn settings(&self) -> &AlarmSettings {
        &self.settings
    }

    pub fn get(&self, id: &str) -> Option<&AlarmDefinition> {
        self.alarms.iter().find(|alarm| alarm.id() == id)
    }

    pub fn generate_id(&mut self, now: DateTime<Local>) -> String {
        loop {
            let id = format!("alarm-{}-{}", now.timestamp(), self.next_seq);
            self.next_seq += 1;
            if self.get(&id).is_none() {
                return id;
            }
        }
    }

    pub fn add(&mut self, alarm: AlarmDefinition) -> Result<(), AlarmError> {
        if self.get(alarm.id()).is_some() {
            return Err(AlarmError::DuplicateId(alarm.id().to_string()));
        }
        self.alarms.push(alarm);
        self.alarms.sort_by_key(AlarmDefinition::minutes_since_midnight);
        Ok(())
    }

    pub fn update(&mut self, alarm: AlarmDefinition) -> Result<(), AlarmError> {
        let slot = self
            .alarms
            .iter_mut()
            .find(|existing| existing.id() == alarm.id())
            .ok_or_else(|| AlarmError::UnknownAlarm(alarm.id().to_string()))?;
        *slot = alarm;
        Ok(())
    }

    /// Applies `edit` to the alarm with `id` and stores the result.
    pub fn modify<F>(&mut self, id: &str, edit: F) -> Result<AlarmDefinition, AlarmError>
    where
        F: FnOnce(&AlarmDefinition) -> AlarmDefinition,
    {
        let current = self
            .get(id)
            .ok_or_else(|| AlarmError::UnknownAlarm(id.to_string()))?;
        let edited = edit(current);
        self.update(edited.clone())?;
        Ok(edited)
    }

    pub fn remove(&mut self, id: &str) -> Result<AlarmDefinition, AlarmError> {
        let index = self
            .alarms
            .iter()
            .position(|alarm| alarm.id() == id)
            .ok_or_else(|| AlarmError::UnknownAlarm(id.to_string()))?;
        Ok(self.alarms.remove(index))
    }

    pub fn set_skip_holidays(&mut self, enabled: bool) {
        self.settings.skip_holidays = enabled;
    }

    pub fn save(&self) -> Result<()> {
        save_alarm_config(&self.path, &self.alarms, &self.settings)?;
        debug!(
            path = %self.path.display(),
            alarms = self.alarms.len(),
            "alarm file written"
        );
        Ok(())
    }
}
