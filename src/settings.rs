use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
    time::Duration as StdDuration,
};

use crate::interception::{FailsafeTiming, SurfaceIdentity};
use crate::interstitial::{EscalationPolicy, InterstitialConfig, TYPED_PHRASE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrictionSettings {
    /// Foreground identifier of our own interstitial surface.
    pub own_identifier: String,
    /// Home screen surfaces. Returning to any of them clears every grace entry.
    pub launcher_identifiers: Vec<String>,
    pub grace_secs: i64,
    pub debounce_ms: i64,
    pub launch_settle_ms: u64,
    pub failsafe_ms: u64,
    pub breathing_base_secs: u64,
    pub breathing_increment_secs: u64,
    pub roast_threshold: u32,
    pub typed_phrase: String,
    pub step_goal: u32,
    /// Interception events older than this are purged at startup. 0 keeps everything.
    pub retention_days: u32,
    pub premium: bool,
}

impl Default for FrictionSettings {
    fn default() -> Self {
        Self {
            own_identifier: "app.friction".into(),
            launcher_identifiers: vec![
                "com.android.launcher3".into(),
                "com.google.android.apps.nexuslauncher".into(),
                "com.apple.springboard".into(),
            ],
            grace_secs: 5 * 60,
            debounce_ms: 2_000,
            launch_settle_ms: 100,
            failsafe_ms: 5_000,
            breathing_base_secs: 5,
            breathing_increment_secs: 5,
            roast_threshold: 5,
            typed_phrase: TYPED_PHRASE.into(),
            step_goal: 50,
            retention_days: 90,
            premium: false,
        }
    }
}

impl FrictionSettings {
    /// Out-of-range values saturate instead of failing.
    pub fn grace(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.grace_secs.max(0)).unwrap_or(chrono::Duration::MAX)
    }

    pub fn debounce(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.debounce_ms.max(0))
    }

    pub fn surface_identity(&self) -> SurfaceIdentity {
        SurfaceIdentity::new(
            self.own_identifier.clone(),
            self.launcher_identifiers.iter().cloned(),
        )
    }

    pub fn failsafe_timing(&self) -> FailsafeTiming {
        FailsafeTiming {
            launch_settle: StdDuration::from_millis(self.launch_settle_ms),
            timeout: StdDuration::from_millis(self.failsafe_ms),
        }
    }

    pub fn interstitial_config(&self) -> InterstitialConfig {
        InterstitialConfig {
            policy: EscalationPolicy {
                base_secs: self.breathing_base_secs,
                increment_secs: self.breathing_increment_secs,
                roast_threshold: self.roast_threshold,
            },
            phrase: self.typed_phrase.clone(),
            step_goal: self.step_goal,
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<FrictionSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings at {}: {err}", path.display());
                FrictionSettings::default()
            })
        } else {
            FrictionSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> FrictionSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, settings: FrictionSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    pub fn update_with<F>(&self, change: F) -> Result<FrictionSettings>
    where
        F: FnOnce(&mut FrictionSettings),
    {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        change(&mut next);
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: FrictionSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid settings file {}", self.path.display()))?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *guard = data;
        Ok(())
    }

    fn persist(&self, data: &FrictionSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
