mod execute;
mod setup;

pub use execute::Lookup;

use crate::{
    config::Options,
    error::Error,
    signal::{CancelView, CancellationToken},
    task::TaskSet,
    telemetry::{Recorder, TelemetryEntry},
    types::{IndexMap, IndexSet, Outcome, TaskName},
};
use core::{cell::RefCell, convert::Infallible, mem};
use derive_more::Debug;
use futures::{channel::oneshot, future::join_all};
use tracing::{Instrument, debug, debug_span};

/// How task failures shape the combined result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Policy {
    /// First failure rejects the run and cancels the shared signal.
    FailFast,
    /// Every outcome is reported; failures never cancel.
    SettleAll,
    /// First task to call `end` decides the result.
    EarlyExit,
}

/// Executor for a set of named, mutually-referencing tasks.
///
/// All tasks start at once; a task that needs a sibling's value asks for it
/// through its [`Context`](crate::task::Context) and is suspended until the
/// sibling settles. No dependency graph is declared upfront.
///
/// The combined future drives every task itself on the caller's task and
/// is therefore `!Send`; await it from a current-thread runtime, a local
/// task set or `futures::executor::block_on`.
#[must_use]
#[derive(Debug)]
pub struct Executor<T, E, R = Infallible> {
    tasks: TaskSet<T, E, R>,
    options: Options<E>,
}

pub(crate) type Waiter<T, E> = oneshot::Sender<Result<T, Error<E>>>;

/// Per-task bookkeeping, indexed like the task set.
#[derive(Debug)]
pub(crate) struct Slot<T, E> {
    /// Recorded at most once.
    #[debug(skip)]
    pub(crate) outcome: Option<Result<T, Error<E>>>,
    /// Lookups waiting for `outcome`, drained when it is recorded.
    #[debug(skip)]
    pub(crate) waiters: Vec<Waiter<T, E>>,
    /// Tasks this task is currently waiting on, one entry per pending lookup.
    pub(crate) awaiting: Vec<usize>,
    /// Set once the task called `end`.
    pub(crate) halted: bool,
}

impl<T, E> Default for Slot<T, E> {
    fn default() -> Self {
        Self {
            outcome: None,
            waiters: Vec::new(),
            awaiting: Vec::new(),
            halted: false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct State<T, E, R> {
    pub(crate) slots: Vec<Slot<T, E>>,
    /// First genuine failure, flow-control markers excluded.
    #[debug(skip)]
    pub(crate) first_error: Option<Error<E>>,
    /// Set by the first `end` call.
    #[debug(skip)]
    pub(crate) ended: Option<R>,
    /// The run is over and `slots` has been handed out.
    pub(crate) concluded: bool,
}

/// Shared engine of one invocation.
///
/// Owned through `Rc` by the driver and every task context. Only engine
/// methods mutate `state`, and none of them holds the borrow across a call
/// into task code, a waker, or a cancellation listener.
#[derive(Debug)]
pub(crate) struct Engine<T, E, R> {
    pub(crate) policy: Policy,
    pub(crate) names: IndexSet<TaskName>,
    pub(crate) state: RefCell<State<T, E, R>>,
    pub(crate) signal: CancellationToken<Error<E>>,
    pub(crate) recorder: Option<Recorder>,
}

impl<T, E, R> Engine<T, E, R> {
    pub(crate) fn name(&self, task: usize) -> &TaskName {
        &self.names[task]
    }

    pub(crate) fn signal(&self) -> &CancelView<Error<E>> {
        &self.signal
    }
}

/// Everything left once all tasks have concluded.
struct Settlement<T, E, R> {
    outcomes: Vec<(TaskName, Result<T, Error<E>>)>,
    first_error: Option<Error<E>>,
    ended: Option<R>,
}

impl<T, E, R> Executor<T, E, R>
where
    T: Clone + 'static,
    E: Clone + Send + 'static,
    R: 'static,
{
    /// Executor for `tasks` with default [`Options`].
    pub fn new(tasks: TaskSet<T, E, R>) -> Self {
        Self {
            tasks,
            options: Options::default(),
        }
    }

    /// Replaces the options of the run.
    pub fn options(mut self, options: Options<E>) -> Self {
        self.options = options;
        self
    }

    /// Starts every task and waits until all of them have concluded.
    async fn execute(self, policy: Policy) -> Settlement<T, E, R> {
        let Self { tasks, options } = self;
        let span = debug_span!("execute", ?policy, tasks = tasks.len());
        async move {
            let engine = Engine::new(&tasks, policy, &options);
            // Released as soon as every task has concluded.
            let forward = options
                .signal
                .as_ref()
                .map(|external| engine.forward(external));
            join_all(engine.clone().launch(tasks)).await;
            drop(forward);

            let (state, entries) = engine.conclude();
            if let Some(entries) = entries {
                options.sink.consume(&entries);
            }
            let State {
                slots,
                first_error,
                ended,
                ..
            } = state;
            let outcomes = engine
                .names
                .iter()
                .cloned()
                .zip(slots)
                .map(|(name, slot)| {
                    // Every slot is settled once its driver has returned.
                    let outcome = slot.outcome.unwrap_or_else(|| Err(Error::already_ended()));
                    (name, outcome)
                })
                .collect();
            debug!(failed = first_error.is_some(), "all tasks concluded");
            Settlement {
                outcomes,
                first_error,
                ended,
            }
        }
        .instrument(span)
        .await
    }

    /// Returns every task's outcome, independent of failures.
    pub async fn run_settled(self) -> IndexMap<TaskName, Outcome<T, E>> {
        self.execute(Policy::SettleAll)
            .await
            .outcomes
            .into_iter()
            .map(|(name, result)| (name, Outcome::from(result)))
            .collect()
    }

    /// Resolves to the value `end` was first called with, or `None` if no
    /// task ended the flow. Fails with the first genuine task error.
    pub async fn run_flow(self) -> Result<Option<R>, Error<E>> {
        let Settlement {
            first_error,
            ended,
            ..
        } = self.execute(Policy::EarlyExit).await;
        match first_error {
            Some(error) => Err(error),
            None => Ok(ended),
        }
    }
}

impl<T, E> Executor<T, E>
where
    T: Clone + 'static,
    E: Clone + Send + 'static,
{
    /// Returns every task's value, or the first error any task failed with.
    ///
    /// A failure cancels the shared signal right away, but the result is
    /// only produced after every task has concluded.
    pub async fn run(self) -> Result<IndexMap<TaskName, T>, Error<E>> {
        let Settlement {
            outcomes,
            first_error,
            ..
        } = self.execute(Policy::FailFast).await;
        if let Some(error) = first_error {
            return Err(error);
        }
        outcomes
            .into_iter()
            .map(|(name, result)| result.map(|value| (name, value)))
            .collect()
    }
}

impl<T, E, R> Engine<T, E, R> {
    /// Takes the final state and telemetry out of the engine.
    ///
    /// Contexts and lookups may outlive the run; the engine they keep alive
    /// answers them as if the flow had ended.
    fn conclude(&self) -> (State<T, E, R>, Option<Vec<TelemetryEntry>>) {
        let state = mem::replace(&mut *self.state.borrow_mut(), State {
            slots: Vec::new(),
            first_error: None,
            ended: None,
            concluded: true,
        });
        let entries = self.recorder.as_ref().map(Recorder::take_entries);
        (state, entries)
    }
}
