#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;
use tasksched::poller::LabPoller;
use tasksched::time::VirtualClock;
use tasksched::{SchedulerBuilder, TaskScheduler};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "TASKSCHED_PROPTEST_SEED";

/// Build a ProptestConfig, fixing the seed under CI or when
/// `TASKSCHED_PROPTEST_SEED` is set.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    std::env::var("CI").ok().map(|_| DEFAULT_PROPTEST_SEED)
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// A scheduler on a virtual clock and a lab poller, plus handles to both.
pub struct LabHarness {
    pub scheduler: TaskScheduler,
    pub clock: VirtualClock,
    pub lab: LabPoller,
}

impl LabHarness {
    /// Default config; the poller does not move the clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_builder(SchedulerBuilder::new())
    }

    /// Starts from `builder`, adding the virtual clock and lab poller.
    #[must_use]
    pub fn with_builder(builder: SchedulerBuilder) -> Self {
        init_test_logging();
        let clock = VirtualClock::new();
        let lab = LabPoller::new();
        let scheduler = builder
            .clock(clock.clone())
            .poller(lab.clone())
            .build()
            .expect("lab scheduler");
        Self {
            scheduler,
            clock,
            lab,
        }
    }

    /// Runs one step without blocking and returns the callbacks run.
    pub fn step(&mut self) -> usize {
        self.scheduler
            .single_step(Some(tasksched::DelayInterval::ZERO))
            .expect("lab step")
    }
}

/// Shared log of labels pushed by callbacks.
#[derive(Clone, Default)]
pub struct FiredLog(Rc<RefCell<Vec<&'static str>>>);

impl FiredLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A task callback that records `label`.
    pub fn task(&self, label: &'static str) -> impl FnOnce(&mut TaskScheduler) + 'static {
        let log = self.clone();
        move |_| log.push(label)
    }

    pub fn push(&self, label: &'static str) {
        self.0.borrow_mut().push(label);
    }

    #[must_use]
    pub fn entries(&self) -> Vec<&'static str> {
        self.0.borrow().clone()
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
