//! Scheduler configuration
//!
//! TOML-based settings with environment variable overrides. Settings are
//! read once at scheduler-context construction and resolved into immutable
//! per-task [`TaskPolicy`] values; there is no hot reload of pool policy.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::{PoolSizePolicy, TaskPolicy, TaskTypeId};

/// Configuration error types
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid settings: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Env(String),
}

/// Root scheduler configuration.
///
/// Unlisted task types fall back to the defaults below; the historical
/// fallback pool size for an unrecognized task type is a single thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Raw pool-size sentinel applied to unconfigured task types:
    /// -1 no pool, 0 unbounded, n hard cap.
    pub default_pool_size: i64,

    /// Default backlog threshold beyond live threads at which the booster
    /// is offered work.
    pub default_booster_threshold: usize,

    /// Default queue depth that must remain before task combination is
    /// attempted.
    pub default_combine_threshold: usize,

    pub booster: BoosterSettings,

    /// Per-task overrides.
    pub tasks: Vec<TaskSettings>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_pool_size: 1,
            default_booster_threshold: 2,
            default_combine_threshold: 3,
            booster: BoosterSettings::default(),
            tasks: Vec::new(),
        }
    }
}

/// Shared booster pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterSettings {
    pub enabled: bool,

    /// Thread-slot capacity; the effective size never exceeds this.
    pub max_size: usize,

    /// Lower clamp for the adaptive effective size.
    pub min_size: usize,

    /// Initial effective size is `min(max_size, start_size)`.
    pub start_size: usize,

    /// Recompute the effective size every this many booster submissions.
    /// 0 disables adaptive resizing.
    pub adjustment_period: u32,

    /// Concurrency -> size breakpoints, interpolated linearly. When empty,
    /// `slope` is applied to the measured concurrency instead.
    pub size_curve: Vec<CurvePoint>,

    /// Fallback multiplier used when no curve is configured.
    pub slope: f64,

    /// Idle time after which a thread in a retired slot exits.
    pub idle_timeout_secs: u64,

    /// Task types that must never be boosted.
    pub excluded_tasks: Vec<TaskTypeId>,
}

impl Default for BoosterSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size: 32,
            min_size: 1,
            start_size: 10,
            adjustment_period: 32,
            size_curve: Vec::new(),
            slope: 1.0,
            idle_timeout_secs: 30,
            excluded_tasks: Vec::new(),
        }
    }
}

impl BoosterSettings {
    /// Map a measured concurrency level to a target effective size,
    /// clamped to `[min_size, max_size]`.
    pub fn target_size(&self, concurrency: usize) -> usize {
        let raw = if self.size_curve.is_empty() {
            (self.slope * concurrency as f64).round() as i64
        } else {
            self.interpolate(concurrency)
        };
        (raw.max(0) as usize).max(self.min_size).min(self.max_size)
    }

    fn interpolate(&self, concurrency: usize) -> i64 {
        let c = concurrency as f64;
        let first = &self.size_curve[0];
        if c <= first.concurrency as f64 {
            return first.size as i64;
        }
        for pair in self.size_curve.windows(2) {
            let (lo, hi) = (&pair[0], &pair[1]);
            if c <= hi.concurrency as f64 {
                let span = (hi.concurrency - lo.concurrency).max(1) as f64;
                let frac = (c - lo.concurrency as f64) / span;
                return (lo.size as f64 + frac * (hi.size as f64 - lo.size as f64)).round() as i64;
            }
        }
        self.size_curve.last().map(|p| p.size as i64).unwrap_or(0)
    }
}

/// One breakpoint of the booster size curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CurvePoint {
    pub concurrency: u32,
    pub size: u32,
}

/// Per-task settings; unset fields inherit the scheduler defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    pub id: u32,
    pub size: Option<i64>,
    pub booster_threshold: Option<usize>,
    pub combine_tasks: Option<bool>,
    pub combine_threshold: Option<usize>,
    pub consume_backlog: Option<bool>,
    pub scavenge_eligible: Option<bool>,
}

impl TaskSettings {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            size: None,
            booster_threshold: None,
            combine_tasks: None,
            combine_threshold: None,
            consume_backlog: None,
            scavenge_eligible: None,
        }
    }
}

impl SchedulerSettings {
    /// Parse settings from a TOML string and validate them.
    pub fn from_toml_str(raw: &str) -> Result<Self, SettingsError> {
        let settings: SchedulerSettings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file, apply environment overrides, validate.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut settings: SchedulerSettings = toml::from_str(&raw)?;
        settings.apply_env_overrides()?;
        settings.validate()?;
        info!(path = %path.as_ref().display(), "Loaded scheduler settings");
        Ok(settings)
    }

    /// Targeted environment overrides, applied after file parsing:
    /// `SP_BOOSTER_ENABLED`, `SP_BOOSTER_MAX_SIZE`, `SP_DEFAULT_POOL_SIZE`.
    pub fn apply_env_overrides(&mut self) -> Result<(), SettingsError> {
        if let Ok(v) = std::env::var("SP_BOOSTER_ENABLED") {
            self.booster.enabled = v
                .parse::<bool>()
                .map_err(|_| SettingsError::Env(format!("SP_BOOSTER_ENABLED: {v}")))?;
        }
        if let Ok(v) = std::env::var("SP_BOOSTER_MAX_SIZE") {
            self.booster.max_size = v
                .parse::<usize>()
                .map_err(|_| SettingsError::Env(format!("SP_BOOSTER_MAX_SIZE: {v}")))?;
        }
        if let Ok(v) = std::env::var("SP_DEFAULT_POOL_SIZE") {
            self.default_pool_size = v
                .parse::<i64>()
                .map_err(|_| SettingsError::Env(format!("SP_DEFAULT_POOL_SIZE: {v}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let b = &self.booster;
        if b.min_size > b.max_size {
            return Err(SettingsError::Validation(format!(
                "booster.min_size ({}) exceeds booster.max_size ({})",
                b.min_size, b.max_size
            )));
        }
        if b.enabled && b.max_size == 0 {
            return Err(SettingsError::Validation(
                "booster.max_size must be positive when the booster is enabled".into(),
            ));
        }
        if b.slope <= 0.0 {
            return Err(SettingsError::Validation(format!(
                "booster.slope must be positive, got {}",
                b.slope
            )));
        }
        if !b
            .size_curve
            .windows(2)
            .all(|p| p[0].concurrency < p[1].concurrency)
        {
            return Err(SettingsError::Validation(
                "booster.size_curve breakpoints must be strictly increasing in concurrency".into(),
            ));
        }
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id) {
                return Err(SettingsError::Validation(format!(
                    "duplicate task settings for id {}",
                    task.id
                )));
            }
        }
        Ok(())
    }

    /// Resolve the immutable policy for one task type.
    pub fn resolve(&self, task_type: TaskTypeId) -> TaskPolicy {
        let entry = self.tasks.iter().find(|t| t.id == task_type.0);

        let size = PoolSizePolicy::from_raw(
            entry
                .and_then(|t| t.size)
                .unwrap_or(self.default_pool_size),
        );
        let boosted = self.booster.enabled
            && size != PoolSizePolicy::NoPool
            && !self.booster.excluded_tasks.contains(&task_type);

        TaskPolicy {
            task_type,
            size,
            booster_threshold: entry
                .and_then(|t| t.booster_threshold)
                .unwrap_or(self.default_booster_threshold),
            combine_tasks: entry.and_then(|t| t.combine_tasks).unwrap_or(false),
            combine_threshold: entry
                .and_then(|t| t.combine_threshold)
                .unwrap_or(self.default_combine_threshold),
            consume_backlog: entry.and_then(|t| t.consume_backlog).unwrap_or(false),
            scavenge_eligible: entry.and_then(|t| t.scavenge_eligible).unwrap_or(true),
            boosted,
        }
    }
}
