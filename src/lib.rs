//! Concurrent task executor that resolves inter-task dependencies on demand.
//!
//! Given a set of named asynchronous tasks that may ask for each other's
//! results, this crate runs all of them at once and lets each task wait for
//! a sibling only at the moment it needs the sibling's value. No dependency
//! graph is declared upfront:
//! - Every task body is invoked immediately, back to back.
//! - A task asks for a sibling through its [`Context`](task::Context); the
//!   lookup resolves at once if the sibling has settled, and otherwise
//!   suspends until it does.
//! - Each task's outcome is recorded exactly once and shared by every
//!   lookup, so a task body never runs twice.
//! - Lookups that would close a wait-for cycle fail instead of deadlocking.
//!
//! Three entry modes share one engine:
//! - [`run`]: fail-fast. The first failure cancels the shared signal and
//!   becomes the run's error.
//! - [`run_settled`]: settle-all. Every task's [`Outcome`](types::Outcome) is
//!   reported and failures never cancel.
//! - [`run_flow`]: early exit. The first task to call
//!   [`Context::end`](task::Context::end) decides the result; lookups still
//!   pending at that point fail instead of hanging.
//!
//! Key modules:
//! - `task`: the [`TaskSet`](task::TaskSet) and the per-task `Context`.
//! - `executor`: launching tasks, resolving lookups, applying the policy.
//! - `signal`: the shared, cause-carrying cancellation token.
//! - `telemetry` and `report`: optional timing capture and its timeline.
//! - `config`: per-invocation [`Options`](config::Options).
//!
//! Quick start:
//!
//! ```
//! use ctg::{config::Options, task::TaskSet};
//!
//! # futures::executor::block_on(async {
//! let tasks = TaskSet::<u32, std::io::ErrorKind>::new()
//!     .task("base", |_| async { Ok(1) })
//!     .task("sum", |cx| async move { Ok(cx.get("base").await? + 10) });
//! let values = ctg::run(tasks, Options::default()).await.unwrap();
//! assert_eq!(values["sum"], 11);
//! # });
//! ```
//!
//! Scheduling is cooperative: the combined future polls every task itself
//! on the caller's task, so "parallel" means interleaved progress at
//! suspension points. Cancellation is advisory; tasks observe
//! [`Context::signal`](task::Context::signal) and abort their own work.

/// Per-invocation options: debug telemetry, external signal, clock and sink.
pub mod config;
/// Errors raised by tasks and by the executor.
pub mod error;
/// The dependency-resolving executor and its three entry modes.
///
/// Task launch lives in `setup`; lookups, settlement and the flow ending
/// live in `execute`.
pub mod executor;
/// Text timeline rendering of collected telemetry.
pub mod report;
/// Shared cancellation token with a cause and one-shot listeners.
pub mod signal;
mod sync;
/// Task sets and the context handed to each task.
pub mod task;
/// Per-task timing, wait intervals and looked-up dependencies.
pub mod telemetry;
/// Task names, outcomes and hash-map aliases.
pub mod types;
mod utils;

use crate::{
    config::Options,
    error::Error,
    executor::Executor,
    task::TaskSet,
    types::{IndexMap, Outcome, TaskName},
};

/// Runs `tasks` under the fail-fast policy.
///
/// Resolves to every task's value, or to the first error any task failed
/// with. The first failure cancels the shared signal at once; the result
/// itself is produced after every task has concluded.
pub async fn run<T, E>(
    tasks: TaskSet<T, E>,
    options: Options<E>,
) -> Result<IndexMap<TaskName, T>, Error<E>>
where
    T: Clone + 'static,
    E: Clone + Send + 'static,
{
    Executor::new(tasks).options(options).run().await
}

/// Runs `tasks` under the settle-all policy and reports every outcome.
pub async fn run_settled<T, E>(
    tasks: TaskSet<T, E>,
    options: Options<E>,
) -> IndexMap<TaskName, Outcome<T, E>>
where
    T: Clone + 'static,
    E: Clone + Send + 'static,
{
    Executor::new(tasks).options(options).run_settled().await
}

/// Runs `tasks` until all conclude, resolving to the value the flow was
/// first ended with, or `None` if no task ended it.
pub async fn run_flow<T, E, R>(
    tasks: TaskSet<T, E, R>,
    options: Options<E>,
) -> Result<Option<R>, Error<E>>
where
    T: Clone + 'static,
    E: Clone + Send + 'static,
    R: 'static,
{
    Executor::new(tasks).options(options).run_flow().await
}
