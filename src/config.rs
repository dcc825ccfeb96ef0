//! Scheduler configuration.
//!
//! # Precedence
//!
//! Highest first:
//!
//! 1. Builder methods (`SchedulerBuilder::alarm_policy`, ...)
//! 2. Environment variables, when the builder was asked to read them
//! 3. A TOML file (`config-file` feature), passed in as the base config
//! 4. [`SchedulerConfig::default()`]
//!
//! # Environment variables
//!
//! | Variable | Format | Maps to |
//! |----------|--------|---------|
//! | `TASKSCHED_ALARM_POLICY` | `one`, `drain` or `drain:<n>` | `alarm_policy` |
//! | `TASKSCHED_MAX_POLL_WAIT_US` | microseconds, `0` = poll only | `max_poll_wait` |
//! | `TASKSCHED_EVENTS_CAPACITY` | `usize` | `events_capacity` |

use crate::error::ConfigError;
use crate::time::DelayInterval;

/// Environment variable name for the alarm policy.
pub const ENV_ALARM_POLICY: &str = "TASKSCHED_ALARM_POLICY";
/// Environment variable name for the poll wait cap, in microseconds.
pub const ENV_MAX_POLL_WAIT_US: &str = "TASKSCHED_MAX_POLL_WAIT_US";
/// Environment variable name for the readiness buffer size.
pub const ENV_EVENTS_CAPACITY: &str = "TASKSCHED_EVENTS_CAPACITY";

/// Alarms fired per step under `drain` without an explicit bound.
pub const DEFAULT_DRAIN_MAX: usize = 256;
/// Default readiness buffer size.
pub const DEFAULT_EVENTS_CAPACITY: usize = 64;

/// How many due timers one step fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlarmPolicy {
    /// At most one alarm per step; further due alarms wait for the next
    /// step, after descriptors have been polled again.
    #[default]
    OnePerStep,
    /// Fire due alarms until none is due or `max` have fired.
    DrainDue {
        /// Upper bound per step.
        max: usize,
    },
}

impl AlarmPolicy {
    /// Parses `one`, `drain` or `drain:<n>`.
    pub fn parse(var: &str, value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            var: var.to_string(),
            value: value.to_string(),
            expected: "one, drain or drain:<n>",
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "one" => Ok(Self::OnePerStep),
            "drain" => Ok(Self::DrainDue {
                max: DEFAULT_DRAIN_MAX,
            }),
            other => {
                let max = other
                    .strip_prefix("drain:")
                    .and_then(|n| n.trim().parse::<usize>().ok())
                    .ok_or_else(invalid)?;
                Ok(Self::DrainDue { max })
            }
        }
    }
}

/// Tunables for a [`TaskScheduler`](crate::scheduler::TaskScheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Alarm firing policy.
    pub alarm_policy: AlarmPolicy,
    /// Upper bound on any single poll wait. `None` leaves the wait bounded
    /// only by the next alarm.
    pub max_poll_wait: Option<DelayInterval>,
    /// Readiness reports gathered per poll.
    pub events_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            alarm_policy: AlarmPolicy::OnePerStep,
            max_poll_wait: None,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// Clamps values that would stall the loop.
    pub fn normalize(&mut self) {
        if self.events_capacity == 0 {
            self.events_capacity = 1;
        }
        if let AlarmPolicy::DrainDue { max } = &mut self.alarm_policy {
            if *max == 0 {
                *max = 1;
            }
        }
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }
}

/// Applies the `TASKSCHED_*` variables that are set.
///
/// Returns an error if a variable is set but cannot be parsed.
pub fn apply_env_overrides(config: &mut SchedulerConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_ALARM_POLICY) {
        config.alarm_policy = AlarmPolicy::parse(ENV_ALARM_POLICY, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_POLL_WAIT_US) {
        let micros = parse_u64(ENV_MAX_POLL_WAIT_US, &val)?;
        config.max_poll_wait = Some(DelayInterval::new(micros / 1_000_000, micros % 1_000_000));
    }
    if let Some(val) = read_env(ENV_EVENTS_CAPACITY) {
        config.events_capacity = parse_usize(ENV_EVENTS_CAPACITY, &val)?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_u64(var: &str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: val.to_string(),
            expected: "unsigned integer",
        })
}

fn parse_usize(var: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: val.to_string(),
            expected: "unsigned integer",
        })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML layout of a scheduler config.
///
/// ```toml
/// [scheduler]
/// alarm_policy = "drain:16"
/// max_poll_wait_us = 50000
/// events_capacity = 128
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerTomlConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
}

/// `[scheduler]` table.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Alarm policy, same syntax as the environment variable.
    pub alarm_policy: Option<String>,
    /// Poll wait cap in microseconds.
    pub max_poll_wait_us: Option<u64>,
    /// Readiness buffer size.
    pub events_capacity: Option<usize>,
}

/// Applies the fields present in `toml`.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(
    config: &mut SchedulerConfig,
    toml: &SchedulerTomlConfig,
) -> Result<(), ConfigError> {
    if let Some(ref v) = toml.scheduler.alarm_policy {
        config.alarm_policy = AlarmPolicy::parse("scheduler.alarm_policy", v)?;
    }
    if let Some(micros) = toml.scheduler.max_poll_wait_us {
        config.max_poll_wait = Some(DelayInterval::new(micros / 1_000_000, micros % 1_000_000));
    }
    if let Some(v) = toml.scheduler.events_capacity {
        config.events_capacity = v;
    }
    Ok(())
}

/// Parses a TOML document.
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<SchedulerTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Reads and parses a TOML file.
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<SchedulerTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_toml_str(&content)
}

/// Defaults overlaid with a TOML file.
#[cfg(feature = "config-file")]
pub fn load_toml_file(path: &std::path::Path) -> Result<SchedulerConfig, ConfigError> {
    let mut config = SchedulerConfig::default();
    apply_toml_config(&mut config, &parse_toml_file(path)?)?;
    Ok(config)
}

#[cfg(test)]
pub(crate) static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

#[cfg(test)]
mod tests {
    use super::*;

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock();
        clean_env();
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        let result = f();
        clean_env();
        result
    }

    fn clean_env() {
        for var in [ENV_ALARM_POLICY, ENV_MAX_POLL_WAIT_US, ENV_EVENTS_CAPACITY] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn alarm_policy_syntax() {
        assert_eq!(AlarmPolicy::parse("T", "one").unwrap(), AlarmPolicy::OnePerStep);
        assert_eq!(
            AlarmPolicy::parse("T", " DRAIN ").unwrap(),
            AlarmPolicy::DrainDue {
                max: DEFAULT_DRAIN_MAX
            }
        );
        assert_eq!(
            AlarmPolicy::parse("T", "drain:8").unwrap(),
            AlarmPolicy::DrainDue { max: 8 }
        );
        assert!(AlarmPolicy::parse("T", "drain:").is_err());
        assert!(AlarmPolicy::parse("T", "all").is_err());
    }

    #[test]
    fn normalize_clamps_zeroes() {
        let mut config = SchedulerConfig {
            alarm_policy: AlarmPolicy::DrainDue { max: 0 },
            max_poll_wait: None,
            events_capacity: 0,
        };
        config.normalize();
        assert_eq!(config.alarm_policy, AlarmPolicy::DrainDue { max: 1 });
        assert_eq!(config.events_capacity, 1);
    }

    #[test]
    fn no_env_means_defaults() {
        let config = with_envs(&[], SchedulerConfig::from_env).expect("defaults");
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn env_overrides_every_field() {
        let config = with_envs(
            &[
                (ENV_ALARM_POLICY, "drain:4"),
                (ENV_MAX_POLL_WAIT_US, "1500000"),
                (ENV_EVENTS_CAPACITY, "16"),
            ],
            SchedulerConfig::from_env,
        )
        .expect("valid env");
        assert_eq!(config.alarm_policy, AlarmPolicy::DrainDue { max: 4 });
        assert_eq!(config.max_poll_wait, Some(DelayInterval::new(1, 500_000)));
        assert_eq!(config.events_capacity, 16);
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let err = with_envs(&[(ENV_EVENTS_CAPACITY, "-3")], SchedulerConfig::from_env)
            .expect_err("negative capacity");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref var, .. } if var == ENV_EVENTS_CAPACITY
        ));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_overrides_present_fields() {
        let parsed = parse_toml_str(
            r#"
            [scheduler]
            alarm_policy = "one"
            max_poll_wait_us = 250
            "#,
        )
        .expect("valid toml");
        let mut config = SchedulerConfig {
            events_capacity: 9,
            ..SchedulerConfig::default()
        };
        apply_toml_config(&mut config, &parsed).expect("valid values");
        assert_eq!(config.max_poll_wait, Some(DelayInterval::from_micros(250)));
        assert_eq!(config.events_capacity, 9);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_parse_error() {
        assert!(matches!(
            parse_toml_str("[scheduler\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
