use crate::types::TaskName;
use derive_more::Display;
use thiserror::Error;

/// Error observed by a task lookup or returned from a combined run.
///
/// Errors produced by task bodies are carried in [`Error::Task`] unchanged;
/// the remaining variants are raised by the executor itself.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error<E> {
    /// The task body failed with its own error.
    #[error("{0}")]
    Task(E),
    /// A lookup named a task absent from the task set.
    #[error("unknown task `{0}`")]
    UnknownTask(TaskName),
    /// The task was declared without a body.
    #[error("task `{0}` has no callable body")]
    NotCallable(TaskName),
    /// Waiting on `dependency` from `task` would close a wait-for cycle.
    #[error("task `{task}` waiting on `{dependency}` closes a dependency cycle")]
    Cycle {
        /// Requesting task.
        task: TaskName,
        /// Requested task, already (transitively) waiting on `task`.
        dependency: TaskName,
    },
    /// Flow-control marker. Never surfaces from a combined run.
    #[error("{0}")]
    Flow(FlowSignal),
}

impl<E> Error<E> {
    /// Returns `true` for the executor's internal flow-control markers.
    #[must_use]
    pub fn is_flow_signal(&self) -> bool {
        matches!(self, Self::Flow(_))
    }

    /// Returns the task's own error, if this is one.
    #[must_use]
    pub fn as_task(&self) -> Option<&E> {
        match self {
            Self::Task(error) => Some(error),
            _ => None,
        }
    }
}

impl<E> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Self::Task(error)
    }
}

/// Flow-control marker raised in `run_flow` mode.
///
/// Has no public constructor: it only originates from `Context::end` and
/// from lookups issued after the flow has ended.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{0}")]
pub struct FlowSignal(pub(crate) FlowMarker);

impl FlowSignal {
    /// `true` when the holder is the task that ended the flow.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.0 == FlowMarker::Ended
    }

    /// `true` when the flow had already been ended by another task.
    #[must_use]
    pub fn is_already_ended(&self) -> bool {
        self.0 == FlowMarker::AlreadyEnded
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowMarker {
    #[display("flow ended by this task")]
    Ended,
    #[display("flow already ended")]
    AlreadyEnded,
}

impl<E> Error<E> {
    pub(crate) fn ended() -> Self {
        Self::Flow(FlowSignal(FlowMarker::Ended))
    }

    pub(crate) fn already_ended() -> Self {
        Self::Flow(FlowSignal(FlowMarker::AlreadyEnded))
    }
}
