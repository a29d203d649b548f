use crate::{
    error::Error,
    executor::{Engine, Lookup},
    signal::CancelView,
    types::{IndexMap, TaskName},
};
use core::{convert::Infallible, fmt};
use futures::future::{FutureExt, LocalBoxFuture};
use std::{future::Future, rc::Rc};

pub(crate) type TaskFuture<T, E> = LocalBoxFuture<'static, Result<T, Error<E>>>;
pub(crate) type TaskFn<T, E, R> = Box<dyn FnOnce(Context<T, E, R>) -> TaskFuture<T, E>>;

/// Named tasks of one invocation.
///
/// Every task receives its own [`Context`] and produces a single value of
/// type `T` or fails with an [`Error<E>`]. `R` is the value a task may end a
/// flow with; with the default `Infallible` no task can end the flow, which
/// is what `run` and `run_settled` expect.
///
/// Iteration and result maps follow insertion order.
pub struct TaskSet<T, E, R = Infallible> {
    pub(crate) entries: IndexMap<TaskName, Option<TaskFn<T, E, R>>>,
}

impl<T, E, R> TaskSet<T, E, R>
where
    T: 'static,
    E: 'static,
    R: 'static,
{
    /// Empty task set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: IndexMap::default(),
        }
    }

    /// Adds a task, replacing any previous task with the same name.
    pub fn insert<F, Fut>(&mut self, name: impl Into<TaskName>, task: F) -> &mut Self
    where
        F: FnOnce(Context<T, E, R>) -> Fut + 'static,
        Fut: Future<Output = Result<T, Error<E>>> + 'static,
    {
        let task: TaskFn<T, E, R> = Box::new(move |cx| task(cx).boxed_local());
        self.entries.insert(name.into(), Some(task));
        self
    }

    /// By-value form of [`TaskSet::insert`].
    #[must_use]
    pub fn task<F, Fut>(mut self, name: impl Into<TaskName>, task: F) -> Self
    where
        F: FnOnce(Context<T, E, R>) -> Fut + 'static,
        Fut: Future<Output = Result<T, Error<E>>> + 'static,
    {
        self.insert(name, task);
        self
    }

    /// Reserves `name` without a body.
    ///
    /// The task fails with [`Error::NotCallable`] while the others run
    /// normally; lookups of it observe that error.
    pub fn declare(&mut self, name: impl Into<TaskName>) -> &mut Self {
        self.entries.insert(name.into(), None);
        self
    }

    /// Number of tasks, declared ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no task has been added or declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Task names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &TaskName> {
        self.entries.keys()
    }
}

impl<T: 'static, E: 'static, R: 'static> Default for TaskSet<T, E, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E, R> fmt::Debug for TaskSet<T, E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|(name, task)| (name, if task.is_some() { "task" } else { "declared" })),
            )
            .finish()
    }
}

/// Execution context handed to a task body.
///
/// Bundles the task's private view of its siblings (see [`Context::get`]),
/// the shared cancellation signal and, in flow mode, [`Context::end`].
pub struct Context<T, E, R = Infallible> {
    pub(crate) engine: Rc<Engine<T, E, R>>,
    pub(crate) task: usize,
}

impl<T, E, R> Context<T, E, R>
where
    T: Clone + 'static,
    E: Clone + 'static,
    R: 'static,
{
    /// Name of the task owning this context.
    #[must_use]
    pub fn name(&self) -> &TaskName {
        self.engine.name(self.task)
    }

    /// Looks up the outcome of the sibling task `name`.
    ///
    /// Resolves immediately if the sibling has settled and otherwise waits
    /// for it; the sibling's body runs once no matter how many tasks ask.
    /// Fails with [`Error::UnknownTask`] for names outside the task set and
    /// with [`Error::Cycle`] when waiting would deadlock.
    pub fn get(&self, name: &str) -> Lookup<T, E, R> {
        self.engine.request(self.task, name)
    }

    /// Shared cancellation signal of the invocation.
    #[must_use]
    pub fn signal(&self) -> &CancelView<Error<E>> {
        self.engine.signal()
    }

    /// Ends the flow with `value` if no task has done so yet.
    ///
    /// Always returns an error the task is expected to return with; the
    /// executor also stops polling the task once the current poll finishes,
    /// so nothing after `end` outlives the next suspension point.
    pub fn end<U>(&self, value: R) -> Result<U, Error<E>> {
        self.engine.end(self.task, value);
        Err(Error::ended())
    }
}

impl<T, E, R> Clone for Context<T, E, R> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            task: self.task,
        }
    }
}

impl<T, E, R> fmt::Debug for Context<T, E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("task", self.engine.name(self.task))
            .finish_non_exhaustive()
    }
}
