use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::feedback::{default_entries, ThresholdEntry, ThresholdTable};

const API_URL_ENV: &str = "REHABPAL_API_URL";
const DEBUG_ENV: &str = "REHABPAL_DEBUG";
const DEBUG_PLAYBACK_POLL_MS: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RehabSettings {
    pub api_url: String,
    /// Warning delay before the doctor recording, and pre-roll before the
    /// patient's reference playback.
    pub countdown_ms: u64,
    pub sample_interval_ms: u64,
    pub playback_poll_ms: u64,
    /// How close to the reference's end playback must be to count as finished.
    pub end_tolerance_ms: u64,
    pub request_timeout_ms: u64,
    pub cache_dir: Option<PathBuf>,
    pub thresholds: Vec<ThresholdEntry>,
    #[serde(skip)]
    pub debug: bool,
}

impl Default for RehabSettings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            countdown_ms: 5_000,
            sample_interval_ms: 700,
            playback_poll_ms: 100,
            end_tolerance_ms: 50,
            request_timeout_ms: 10_000,
            cache_dir: None,
            thresholds: default_entries(),
            debug: false,
        }
    }
}

impl RehabSettings {
    pub fn countdown(&self) -> Duration {
        Duration::from_millis(self.countdown_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    pub fn playback_poll(&self) -> Duration {
        Duration::from_millis(self.playback_poll_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("rehabpal"))
    }

    /// A malformed table from disk falls back to the built-in one.
    pub fn threshold_table(&self) -> ThresholdTable {
        match ThresholdTable::new(self.thresholds.clone()) {
            Ok(table) => table,
            Err(err) => {
                warn!("Ignoring configured thresholds: {err}");
                ThresholdTable::default()
            }
        }
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_url = url.trim().trim_end_matches('/').to_string();
            }
        }

        self.debug = std::env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if self.debug {
            self.playback_poll_ms = self.playback_poll_ms.min(DEBUG_PLAYBACK_POLL_MS);
        }
        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<RehabSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Settings at {} are malformed ({err}); using defaults", path.display());
                RehabSettings::default()
            })
        } else {
            RehabSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Effective settings: the stored values with environment overrides applied.
    pub fn settings(&self) -> RehabSettings {
        self.read().clone().with_env_overrides()
    }

    pub fn update(&self, settings: RehabSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: RehabSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings at {}", self.path.display()))?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &RehabSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, RehabSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RehabSettings> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
