//! The task scheduler: timers, descriptor handlers and triggers on one loop.
//!
//! # Step order
//!
//! Every [`TaskScheduler::single_step`] runs the same sequence:
//!
//! 1. Ask the [`DelayQueue`] how long until the next alarm and poll the
//!    watched descriptors for at most that long.
//! 2. Run the handler of every ready descriptor, with the observed
//!    conditions narrowed to the ones it registered for.
//! 3. Snapshot and clear the pending trigger mask; run each fired trigger.
//! 4. Fire due timers according to the configured [`AlarmPolicy`].
//!
//! Callbacks run to completion on the scheduler thread and receive
//! `&mut TaskScheduler`, so they can schedule, cancel or re-register anything,
//! including themselves.
//!
//! # Threads
//!
//! `TaskScheduler` is deliberately `!Send`. The one operation meant for other
//! threads is firing a trigger, exposed through the `Send + Sync`
//! [`TriggerHandle`].
//!
//! [`AlarmPolicy`]: crate::config::AlarmPolicy

pub mod builder;
pub mod delay_queue;
pub mod handler_set;
pub mod trigger;

pub use builder::SchedulerBuilder;
pub use delay_queue::{DelayQueue, DelayQueueEntry};
pub use handler_set::{HandlerCursor, HandlerDescriptor, HandlerKey, HandlerSet};
pub use trigger::{EventTriggerId, TriggerBank, TriggerData, TriggerHandle, MAX_EVENT_TRIGGERS};

use crate::config::{AlarmPolicy, SchedulerConfig};
use crate::error::{Error, Result};
use crate::poller::{Condition, DescriptorId, Events, Poller, Watch};
use crate::time::DelayInterval;
use crate::tracing_compat::{debug, error, trace};
use core::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Handle to a scheduled delayed task, used only to cancel or move it.
///
/// Tokens come from a process-wide counter and are never reused, so a token
/// kept after its task fired or was cancelled simply matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskToken(u64);

impl TaskToken {
    pub(crate) fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw token value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// A delayed task.
pub type Task = Box<dyn FnOnce(&mut TaskScheduler)>;
/// A descriptor handler, called with the ready conditions.
pub type BackgroundHandler = Box<dyn FnMut(&mut TaskScheduler, Condition)>;
/// A trigger handler, called with the data attached by the firing.
pub type TriggerHandler = Box<dyn FnMut(&mut TaskScheduler, Option<TriggerData>)>;

/// Single-threaded cooperative scheduler.
pub struct TaskScheduler {
    delay_queue: DelayQueue<Task>,
    handlers: HandlerSet<BackgroundHandler>,
    triggers: TriggerBank<TriggerHandler>,
    poller: Box<dyn Poller>,
    config: SchedulerConfig,
    watches: Vec<Watch>,
    events: Events,
    dispatch_keys: Vec<HandlerKey>,
}

impl TaskScheduler {
    /// A builder with the system clock and, on unix, the OS poller.
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Delayed tasks
    // ---------------------------------------------------------------------

    /// Runs `task` once, `microseconds` from now. Negative delays run on the
    /// next step.
    pub fn schedule_delayed_task<F>(&mut self, microseconds: i64, task: F) -> TaskToken
    where
        F: FnOnce(&mut Self) + 'static,
    {
        self.schedule_after(DelayInterval::from_micros(microseconds), task)
    }

    /// Runs `task` once, after `delay`.
    pub fn schedule_after<F>(&mut self, delay: DelayInterval, task: F) -> TaskToken
    where
        F: FnOnce(&mut Self) + 'static,
    {
        let token = self
            .delay_queue
            .add_entry(DelayQueueEntry::new(delay, Box::new(task) as Task));
        trace!(token = %token, delay = %delay, "delayed task scheduled");
        token
    }

    /// Cancels the task in `token`, if it is still pending, and sets `token`
    /// to `None` either way. Returns true if a task was cancelled.
    pub fn unschedule_delayed_task(&mut self, token: &mut Option<TaskToken>) -> bool {
        let Some(t) = token.take() else {
            return false;
        };
        let removed = self.delay_queue.remove_entry(t).is_some();
        trace!(token = %t, removed, "delayed task unscheduled");
        removed
    }

    /// Cancels whatever `token` refers to and schedules `task` in its place,
    /// storing the new token.
    pub fn reschedule_delayed_task<F>(
        &mut self,
        token: &mut Option<TaskToken>,
        microseconds: i64,
        task: F,
    ) where
        F: FnOnce(&mut Self) + 'static,
    {
        self.unschedule_delayed_task(token);
        *token = Some(self.schedule_delayed_task(microseconds, task));
    }

    /// Moves a pending task to fire `microseconds` from now, keeping its
    /// callback and token. Returns false if it is no longer pending.
    pub fn adjust_delayed_task(&mut self, token: TaskToken, microseconds: i64) -> bool {
        self.delay_queue
            .update_entry(token, DelayInterval::from_micros(microseconds))
    }

    /// Returns true if the task has neither fired nor been cancelled.
    #[must_use]
    pub fn is_task_pending(&self, token: TaskToken) -> bool {
        self.delay_queue.contains(token)
    }

    /// Number of pending delayed tasks.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.delay_queue.len()
    }

    /// Time until the earliest pending task is due.
    pub fn time_to_next_alarm(&mut self) -> DelayInterval {
        self.delay_queue.time_to_next_alarm()
    }

    // ---------------------------------------------------------------------
    // Descriptor handlers
    // ---------------------------------------------------------------------

    /// Watches `descriptor` for `conditions`, replacing any existing
    /// registration. An empty condition set removes the watch.
    pub fn set_background_handling<F>(
        &mut self,
        descriptor: DescriptorId,
        conditions: Condition,
        handler: F,
    ) where
        F: FnMut(&mut Self, Condition) + 'static,
    {
        if conditions.is_empty() {
            self.handlers.clear_handler(descriptor);
            return;
        }
        self.handlers
            .assign_handler(descriptor, conditions, Box::new(handler));
    }

    /// Watches `descriptor` for readability.
    pub fn turn_on_background_read_handling<F>(&mut self, descriptor: DescriptorId, handler: F)
    where
        F: FnMut(&mut Self, Condition) + 'static,
    {
        self.set_background_handling(descriptor, Condition::READABLE, handler);
    }

    /// Stops watching `descriptor`. Returns false if it was not watched.
    pub fn disable_background_handling(&mut self, descriptor: DescriptorId) -> bool {
        self.handlers.clear_handler(descriptor)
    }

    /// Transfers the watch on `old` to `new`, e.g. after the descriptor was
    /// duplicated. Returns false if `old` was not watched.
    pub fn move_socket_handling(&mut self, old: DescriptorId, new: DescriptorId) -> bool {
        self.handlers.move_handler(old, new)
    }

    /// Number of watched descriptors.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Conditions `descriptor` is watched for, if any.
    #[must_use]
    pub fn watched_conditions(&self, descriptor: DescriptorId) -> Option<Condition> {
        self.handlers
            .lookup(descriptor)
            .map(HandlerDescriptor::conditions)
    }

    // ---------------------------------------------------------------------
    // Event triggers
    // ---------------------------------------------------------------------

    /// Allocates a trigger slot for `handler`. Returns
    /// [`EventTriggerId::NONE`] when all [`MAX_EVENT_TRIGGERS`] are in use.
    pub fn create_event_trigger<F>(&mut self, handler: F) -> EventTriggerId
    where
        F: FnMut(&mut Self, Option<TriggerData>) + 'static,
    {
        self.triggers.create(Box::new(handler))
    }

    /// Frees the trigger(s) in `id`; a pending firing is discarded.
    pub fn delete_event_trigger(&mut self, id: EventTriggerId) {
        self.triggers.delete(id);
    }

    /// Fires the trigger(s) in `id` from the scheduler thread.
    pub fn trigger_event(&self, id: EventTriggerId, data: Option<TriggerData>) {
        self.triggers.fire(id, data);
    }

    /// A handle other threads can use to fire triggers.
    #[must_use]
    pub fn trigger_handle(&self) -> TriggerHandle {
        self.triggers.handle()
    }

    // ---------------------------------------------------------------------
    // Loop
    // ---------------------------------------------------------------------

    /// Runs one poll/dispatch cycle, waiting at most `max_delay` (in
    /// addition to the configured cap) for descriptor readiness.
    ///
    /// Returns the number of callbacks run.
    pub fn single_step(&mut self, max_delay: Option<DelayInterval>) -> Result<usize> {
        let mut timeout = self.delay_queue.time_to_next_alarm();
        for cap in [max_delay, self.config.max_poll_wait].into_iter().flatten() {
            timeout = timeout.min(cap);
        }
        if self.triggers.has_pending() {
            timeout = DelayInterval::ZERO;
        }

        self.watches.clear();
        self.watches.extend(self.handlers.iter().map(|h| Watch {
            descriptor: h.descriptor(),
            conditions: h.conditions(),
        }));
        match self
            .poller
            .poll(&self.watches, timeout.to_timeout(), &mut self.events)
        {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => self.events.clear(),
            Err(e) => {
                error!(error = %e, "readiness poll failed");
                return Err(Error::Poll(e));
            }
        }

        let mut dispatched = self.dispatch_ready_handlers();
        dispatched += self.dispatch_triggers();
        dispatched += self.dispatch_alarms();
        Ok(dispatched)
    }

    /// Calls [`single_step`](Self::single_step) until `stop` is set. The flag
    /// is checked before every step; a callback that sets it ends the loop
    /// after the current step.
    pub fn do_event_loop(&mut self, stop: &AtomicBool) -> Result<()> {
        debug!("event loop started");
        while !stop.load(Ordering::Acquire) {
            self.single_step(None)?;
        }
        debug!("event loop stopped");
        Ok(())
    }

    /// Runs the handler of every ready descriptor registered when the step
    /// began, in ring order. Registrations cleared by an earlier callback are
    /// skipped; ones added during the walk wait for the next step.
    fn dispatch_ready_handlers(&mut self) -> usize {
        if self.events.is_empty() {
            return 0;
        }
        let events = std::mem::replace(&mut self.events, Events::with_capacity(0));
        let mut keys = std::mem::take(&mut self.dispatch_keys);
        keys.clear();
        keys.extend(self.handlers.keys());
        let mut dispatched = 0;

        for &key in &keys {
            let Some(watch) = self.handlers.get(key) else {
                continue;
            };
            let Some(observed) = events.readiness(watch.descriptor()) else {
                continue;
            };
            let ready = observed & watch.conditions();
            if ready.is_empty() {
                continue;
            }
            trace!(
                descriptor = %watch.descriptor(),
                ready = ?ready,
                "dispatching descriptor handler"
            );
            let Some(mut handler) = self.handlers.take_handler(key) else {
                continue;
            };
            handler(self, ready);
            self.handlers.restore_handler(key, handler);
            dispatched += 1;
        }

        self.dispatch_keys = keys;
        self.events = events;
        dispatched
    }

    fn dispatch_triggers(&mut self) -> usize {
        let pending = self.triggers.take_pending();
        if pending.is_none() {
            return 0;
        }
        let mut dispatched = 0;
        for (id, data) in self.triggers.firings(pending) {
            let Some(mut handler) = self.triggers.take_handler(id) else {
                trace!(trigger = ?id, "fired trigger has no handler");
                continue;
            };
            trace!(trigger = ?id, "dispatching trigger handler");
            handler(self, data);
            self.triggers.restore_handler(id, handler);
            dispatched += 1;
        }
        dispatched
    }

    fn dispatch_alarms(&mut self) -> usize {
        let limit = match self.config.alarm_policy {
            AlarmPolicy::OnePerStep => 1,
            AlarmPolicy::DrainDue { max } => max,
        };
        let mut dispatched = 0;
        while dispatched < limit {
            let Some(entry) = self.delay_queue.handle_alarm() else {
                break;
            };
            trace!(token = %entry.token(), "firing delayed task");
            let task = entry.into_payload();
            task(self);
            dispatched += 1;
        }
        dispatched
    }
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("pending_tasks", &self.delay_queue.len())
            .field("handlers", &self.handlers.len())
            .field("triggers", &self.triggers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
