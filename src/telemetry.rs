use crate::{
    error::Error,
    types::{IndexSet, TaskName},
};
use core::{cell::RefCell, time::Duration};
use derive_more::Debug;
use std::{sync::Arc, time::Instant};

/// Source of timestamps for telemetry.
///
/// Timestamps are offsets from an arbitrary origin; only differences matter.
pub trait Clock {
    /// Current offset from the clock's origin.
    fn now(&self) -> Duration;
}

/// [`Clock`] backed by [`Instant`], measured from its construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Receives the telemetry of an invocation once it has settled.
pub trait TelemetrySink {
    /// Called once per run with one entry per task, in task-set order.
    fn consume(&self, entries: &[TelemetryEntry]);
}

impl<F: Fn(&[TelemetryEntry])> TelemetrySink for F {
    fn consume(&self, entries: &[TelemetryEntry]) {
        self(entries);
    }
}

/// How a task concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// The task produced a value.
    Fulfilled,
    /// The task failed with a genuine error.
    Rejected,
    /// Stopped by a flow-control marker (the flow ended).
    Aborted,
}

impl OutcomeKind {
    pub(crate) fn of<T, E>(result: &Result<T, Error<E>>) -> Self {
        match result {
            Ok(_) => Self::Fulfilled,
            Err(error) if error.is_flow_signal() => Self::Aborted,
            Err(_) => Self::Rejected,
        }
    }
}

/// Interval during which a task was suspended on a dependency lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitInterval {
    /// When the lookup first suspended.
    pub start: Duration,
    /// When the lookup resolved or was dropped.
    pub end: Duration,
}

/// Timing and dependency record of a single task.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEntry {
    /// Task the entry belongs to.
    pub name: TaskName,
    /// When the task body was invoked.
    pub start: Duration,
    /// `None` only while the task is still running.
    pub end: Option<Duration>,
    /// How the task concluded, `None` while it is still running.
    pub outcome: Option<OutcomeKind>,
    /// Distinct names the task looked up, in first-lookup order.
    pub dependencies: IndexSet<TaskName>,
    /// Every suspension on a lookup.
    pub waits: Vec<WaitInterval>,
}

impl TelemetryEntry {
    pub(crate) fn new(name: TaskName) -> Self {
        Self {
            name,
            start: Duration::ZERO,
            end: None,
            outcome: None,
            dependencies: IndexSet::default(),
            waits: Vec::new(),
        }
    }

    /// Time between start and end, zero while still running.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end
            .map_or(Duration::ZERO, |end| end.saturating_sub(self.start))
    }

    /// Total time spent suspended on lookups, counting overlaps once.
    #[must_use]
    pub fn waited(&self) -> Duration {
        let mut waits = self.waits.clone();
        waits.sort_unstable_by_key(|wait| wait.start);
        let mut total = Duration::ZERO;
        let mut covered = Duration::ZERO;
        for wait in waits {
            let start = wait.start.max(covered);
            if wait.end > start {
                total += wait.end - start;
                covered = wait.end;
            }
        }
        total
    }
}

/// Per-invocation collector, indexed like the task set.
#[derive(Debug)]
pub(crate) struct Recorder {
    #[debug(skip)]
    clock: Arc<dyn Clock>,
    entries: RefCell<Vec<TelemetryEntry>>,
}

impl Recorder {
    pub(crate) fn new(clock: Arc<dyn Clock>, entries: Vec<TelemetryEntry>) -> Self {
        Self {
            clock,
            entries: RefCell::new(entries),
        }
    }

    pub(crate) fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Applies `update` to the entry of `task`, unless the entries have
    /// already been taken.
    fn update(&self, task: usize, update: impl FnOnce(&mut TelemetryEntry)) {
        if let Some(entry) = self.entries.borrow_mut().get_mut(task) {
            update(entry);
        }
    }

    pub(crate) fn start(&self, task: usize) {
        let now = self.now();
        self.update(task, |entry| entry.start = now);
    }

    pub(crate) fn finish(&self, task: usize, outcome: OutcomeKind) {
        let now = self.now();
        self.update(task, |entry| {
            entry.end = Some(now);
            entry.outcome = Some(outcome);
        });
    }

    pub(crate) fn depend(&self, task: usize, dependency: &str) {
        self.update(task, |entry| {
            if !entry.dependencies.contains(dependency) {
                entry.dependencies.insert(TaskName::from(dependency));
            }
        });
    }

    pub(crate) fn wait(&self, task: usize, start: Duration) {
        let end = self.now();
        self.update(task, |entry| entry.waits.push(WaitInterval { start, end }));
    }

    pub(crate) fn take_entries(&self) -> Vec<TelemetryEntry> {
        self.entries.take()
    }
}
