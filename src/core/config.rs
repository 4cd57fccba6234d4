//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ThrottleError};

/// Full throttle configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ThrottleConfig {
    pub meter: MeterConfig,
    pub cache: CacheConfig,
    pub idle: IdleConfig,
    pub probe: ProbeConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Load meter decay and per-access weights.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MeterConfig {
    /// Length of one decay tick; load halves once per tick.
    pub tick_ms: u64,
    pub read_weight: u64,
    pub write_weight: u64,
    pub delete_weight: u64,
}

/// Hint cache eviction ceilings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache larger than this is cleared unconditionally on the next insert.
    pub hard_ceiling: usize,
    /// Cache larger than this is cleared on the removal path, at most once per interval.
    pub soft_ceiling: usize,
    pub shrink_interval_ms: u64,
}

/// Idle waiter tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdleConfig {
    /// Upper bound on a single blocking wait before load is re-evaluated.
    pub poll_interval_ms: u64,
}

/// Raw existence probe diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Probes slower than this are logged and counted.
    pub slow_threshold_ms: u64,
}

/// Activity log tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub channel_capacity: usize,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

/// Filesystem paths used by iothrottle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
    pub jsonl_fallback: Option<PathBuf>,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            read_weight: 1,
            write_weight: 2,
            delete_weight: 2,
        }
    }
}

impl MeterConfig {
    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hard_ceiling: 150_000,
            soft_ceiling: 1_500,
            shrink_interval_ms: 5_000,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn shrink_interval(&self) -> Duration {
        Duration::from_millis(self.shrink_interval_ms)
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl IdleConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            slow_threshold_ms: 1_000,
        }
    }
}

impl ProbeConfig {
    #[must_use]
    pub const fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_capacity: 1024,
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 10,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[IOT-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir
            .join(".config")
            .join("iothrottle")
            .join("config.toml");
        let data = home_dir.join(".local").join("share").join("iothrottle");
        Self {
            config_file: cfg,
            jsonl_log: data.join("activity.jsonl"),
            jsonl_fallback: Some(PathBuf::from("/dev/shm/iothrottle.jsonl")),
        }
    }
}

impl ThrottleConfig {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| ThrottleError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(ThrottleError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        Ok(format!("{:016x}", fnv1a(canonical.as_bytes())))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut u64_slots: [(&str, &mut u64); 8] = [
            ("IOT_METER_TICK_MS", &mut self.meter.tick_ms),
            ("IOT_METER_READ_WEIGHT", &mut self.meter.read_weight),
            ("IOT_METER_WRITE_WEIGHT", &mut self.meter.write_weight),
            ("IOT_METER_DELETE_WEIGHT", &mut self.meter.delete_weight),
            (
                "IOT_CACHE_SHRINK_INTERVAL_MS",
                &mut self.cache.shrink_interval_ms,
            ),
            ("IOT_IDLE_POLL_INTERVAL_MS", &mut self.idle.poll_interval_ms),
            (
                "IOT_PROBE_SLOW_THRESHOLD_MS",
                &mut self.probe.slow_threshold_ms,
            ),
            (
                "IOT_LOGGING_MAX_SIZE_BYTES",
                &mut self.logging.max_size_bytes,
            ),
        ];
        for (name, slot) in &mut u64_slots {
            if let Some(raw) = lookup(name) {
                **slot = parse_env(name, &raw)?;
            }
        }

        let mut usize_slots: [(&str, &mut usize); 3] = [
            ("IOT_CACHE_HARD_CEILING", &mut self.cache.hard_ceiling),
            ("IOT_CACHE_SOFT_CEILING", &mut self.cache.soft_ceiling),
            (
                "IOT_LOGGING_CHANNEL_CAPACITY",
                &mut self.logging.channel_capacity,
            ),
        ];
        for (name, slot) in &mut usize_slots {
            if let Some(raw) = lookup(name) {
                **slot = parse_env(name, &raw)?;
            }
        }

        if let Some(raw) = lookup("IOT_LOGGING_ENABLED") {
            self.logging.enabled = parse_env("IOT_LOGGING_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("IOT_LOGGING_JSONL_PATH") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.meter.tick_ms == 0 {
            return Err(ThrottleError::InvalidConfig {
                details: "meter.tick_ms must be > 0".to_string(),
            });
        }

        for (name, val) in [
            ("read_weight", self.meter.read_weight),
            ("write_weight", self.meter.write_weight),
            ("delete_weight", self.meter.delete_weight),
        ] {
            if val == 0 {
                return Err(ThrottleError::InvalidConfig {
                    details: format!("meter.{name} must be >= 1"),
                });
            }
        }

        if self.cache.hard_ceiling == 0 {
            return Err(ThrottleError::InvalidConfig {
                details: "cache.hard_ceiling must be > 0".to_string(),
            });
        }

        if self.cache.soft_ceiling > self.cache.hard_ceiling {
            return Err(ThrottleError::InvalidConfig {
                details: format!(
                    "cache.soft_ceiling ({}) must be <= cache.hard_ceiling ({})",
                    self.cache.soft_ceiling, self.cache.hard_ceiling
                ),
            });
        }

        if self.idle.poll_interval_ms == 0 {
            return Err(ThrottleError::InvalidConfig {
                details: "idle.poll_interval_ms must be > 0".to_string(),
            });
        }

        if self.logging.channel_capacity == 0 {
            return Err(ThrottleError::InvalidConfig {
                details: "logging.channel_capacity must be > 0".to_string(),
            });
        }

        Ok(())
    }
}

/// FNV-1a 64-bit hash.
pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| ThrottleError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
