//! Builder for [`TaskScheduler`].

use super::{DelayQueue, HandlerSet, TaskScheduler, TriggerBank};
use crate::config::{apply_env_overrides, AlarmPolicy, SchedulerConfig};
use crate::error::Result;
use crate::poller::{Events, Poller};
use crate::time::{Clock, DelayInterval, SystemClock};
use crate::tracing_compat::debug;
use std::sync::Arc;

/// Assembles a scheduler from a poller, a clock and a config.
///
/// Unset parts default to the OS poller (unix) and the system clock.
#[derive(Default)]
pub struct SchedulerBuilder {
    poller: Option<Box<dyn Poller>>,
    clock: Option<Arc<dyn Clock>>,
    config: SchedulerConfig,
    read_env: bool,
    alarm_policy: Option<AlarmPolicy>,
    max_poll_wait: Option<Option<DelayInterval>>,
    events_capacity: Option<usize>,
}

impl SchedulerBuilder {
    /// A builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Applies `TASKSCHED_*` environment overrides at build time, below
    /// anything set through builder methods.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        self.read_env = true;
        self
    }

    /// Uses `poller` for readiness.
    #[must_use]
    pub fn poller(mut self, poller: impl Poller + 'static) -> Self {
        self.poller = Some(Box::new(poller));
        self
    }

    /// Uses `clock` for the delay queue.
    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Sets the alarm policy.
    #[must_use]
    pub fn alarm_policy(mut self, policy: AlarmPolicy) -> Self {
        self.alarm_policy = Some(policy);
        self
    }

    /// Caps every poll wait; `None` removes the cap.
    #[must_use]
    pub fn max_poll_wait(mut self, wait: Option<DelayInterval>) -> Self {
        self.max_poll_wait = Some(wait);
        self
    }

    /// Sets the readiness buffer size.
    #[must_use]
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = Some(capacity);
        self
    }

    /// Builds the scheduler.
    ///
    /// Fails if an environment variable is malformed or the OS poller cannot
    /// be created.
    pub fn build(self) -> Result<TaskScheduler> {
        let mut config = self.config;
        if self.read_env {
            apply_env_overrides(&mut config)?;
        }
        if let Some(policy) = self.alarm_policy {
            config.alarm_policy = policy;
        }
        if let Some(wait) = self.max_poll_wait {
            config.max_poll_wait = wait;
        }
        if let Some(capacity) = self.events_capacity {
            config.events_capacity = capacity;
        }
        config.normalize();

        let poller = match self.poller {
            Some(poller) => poller,
            None => default_poller()?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        debug!(config = ?config, "building task scheduler");
        Ok(TaskScheduler {
            delay_queue: DelayQueue::new(clock),
            handlers: HandlerSet::new(),
            triggers: TriggerBank::new(poller.notifier()),
            poller,
            events: Events::with_capacity(config.events_capacity),
            watches: Vec::new(),
            dispatch_keys: Vec::new(),
            config,
        })
    }
}

#[cfg(unix)]
fn default_poller() -> Result<Box<dyn Poller>> {
    Ok(Box::new(crate::poller::OsPoller::new()?))
}

#[cfg(not(unix))]
fn default_poller() -> Result<Box<dyn Poller>> {
    Err(crate::error::ConfigError::MissingPoller.into())
}

impl std::fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("has_poller", &self.poller.is_some())
            .field("has_clock", &self.clock.is_some())
            .field("config", &self.config)
            .field("read_env", &self.read_env)
            .finish_non_exhaustive()
    }
}
