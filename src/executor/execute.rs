use crate::{
    error::Error,
    executor::{Engine, Policy},
    telemetry::OutcomeKind,
};
use core::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use futures::{
    FutureExt,
    channel::oneshot::{self, Canceled},
};
use std::{future::Future, mem, rc::Rc};
use tracing::{debug, trace};

/// Future returned by [`Context::get`](crate::task::Context::get).
///
/// Resolves to the sibling's value or error. While pending, the requesting
/// task counts as waiting on the sibling for cycle detection and telemetry.
#[must_use = "futures do nothing unless polled"]
pub struct Lookup<T, E, R> {
    state: LookupState<T, E, R>,
}

enum LookupState<T, E, R> {
    Ready(Option<Result<T, Error<E>>>),
    Waiting {
        receiver: oneshot::Receiver<Result<T, Error<E>>>,
        wait: Wait<T, E, R>,
    },
}

/// Registration of a pending lookup; dropping it ends the wait.
struct Wait<T, E, R> {
    engine: Rc<Engine<T, E, R>>,
    requester: usize,
    target: usize,
    suspended_at: Option<Duration>,
}

impl<T, E, R> Drop for Wait<T, E, R> {
    fn drop(&mut self) {
        self.engine
            .finish_wait(self.requester, self.target, self.suspended_at.take());
    }
}

// No field is ever pinned.
impl<T, E, R> Unpin for Lookup<T, E, R> {}

impl<T, E, R> Future for Lookup<T, E, R> {
    type Output = Result<T, Error<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let result = match &mut this.state {
            LookupState::Ready(result) => result.take(),
            LookupState::Waiting { receiver, wait } => match receiver.poll_unpin(cx) {
                Poll::Ready(Ok(result)) => Some(result),
                // The producer was abandoned because the flow ended.
                Poll::Ready(Err(Canceled)) => Some(Err(Error::already_ended())),
                Poll::Pending => {
                    if wait.suspended_at.is_none() {
                        wait.suspended_at = wait.engine.now();
                    }
                    return Poll::Pending;
                }
            },
        };
        // Ends the wait, if any, before handing out the result.
        this.state = LookupState::Ready(None);
        match result {
            Some(result) => Poll::Ready(result),
            None => panic!("`Lookup` polled after completion"),
        }
    }
}

impl<T, E, R> fmt::Debug for Lookup<T, E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            LookupState::Ready(Some(_)) => "ready",
            LookupState::Ready(None) => "done",
            LookupState::Waiting { .. } => "waiting",
        };
        f.debug_struct("Lookup").field("state", &state).finish()
    }
}

impl<T, E, R> Engine<T, E, R> {
    pub(crate) fn now(&self) -> Option<Duration> {
        self.recorder.as_ref().map(|recorder| recorder.now())
    }

    pub(crate) fn is_halted(&self, task: usize) -> bool {
        self.state
            .borrow()
            .slots
            .get(task)
            .is_some_and(|slot| slot.halted)
    }

    /// Whether `end` was called or the run is already over.
    fn is_over(&self) -> bool {
        let state = self.state.borrow();
        state.ended.is_some() || state.concluded
    }

    fn finish_wait(&self, requester: usize, target: usize, suspended_at: Option<Duration>) {
        let mut state = self.state.borrow_mut();
        // Gone once the run has concluded.
        if let Some(slot) = state.slots.get_mut(requester) {
            let awaiting = &mut slot.awaiting;
            if let Some(pos) = awaiting.iter().position(|&task| task == target) {
                awaiting.swap_remove(pos);
            }
        }
        drop(state);
        if let (Some(recorder), Some(start)) = (&self.recorder, suspended_at) {
            recorder.wait(requester, start);
        }
    }

    /// Whether `from` (transitively) waits on `to`.
    fn waits_on(&self, from: usize, to: usize) -> bool {
        let state = self.state.borrow();
        let mut visited = vec![false; state.slots.len()];
        let mut stack = vec![from];
        while let Some(task) = stack.pop() {
            if task == to {
                return true;
            }
            if !mem::replace(&mut visited[task], true) {
                stack.extend_from_slice(&state.slots[task].awaiting);
            }
        }
        false
    }
}

impl<T, E, R> Engine<T, E, R>
where
    T: Clone,
    E: Clone,
{
    /// Resolves a lookup of `name` issued by `requester`.
    pub(crate) fn request(self: &Rc<Self>, requester: usize, name: &str) -> Lookup<T, E, R> {
        let ready = |result: Result<T, Error<E>>| Lookup {
            state: LookupState::Ready(Some(result)),
        };
        if let Some(recorder) = &self.recorder {
            recorder.depend(requester, name);
        }
        let Some(target) = self.names.get_index_of(name) else {
            debug!(task = %self.names[requester], dependency = name, "unknown dependency");
            return ready(Err(Error::UnknownTask(name.into())));
        };
        if self.is_over() {
            return ready(Err(Error::already_ended()));
        }
        if let Some(outcome) = &self.state.borrow().slots[target].outcome {
            return ready(outcome.clone());
        }
        if self.waits_on(target, requester) {
            let task = self.names[requester].clone();
            let dependency = self.names[target].clone();
            debug!(%task, %dependency, "dependency cycle");
            return ready(Err(Error::Cycle { task, dependency }));
        }

        let (sender, receiver) = oneshot::channel();
        {
            let mut state = self.state.borrow_mut();
            state.slots[target].waiters.push(sender);
            state.slots[requester].awaiting.push(target);
        }
        trace!(task = %self.names[requester], dependency = name, "waiting on dependency");
        Lookup {
            state: LookupState::Waiting {
                receiver,
                wait: Wait {
                    engine: self.clone(),
                    requester,
                    target,
                    suspended_at: None,
                },
            },
        }
    }

    /// Records the outcome of `task` and releases its waiters.
    ///
    /// Under fail-fast and early-exit the first genuine failure is kept as
    /// the run's error and cancels the shared signal.
    pub(crate) fn settle(&self, task: usize, result: Result<T, Error<E>>) {
        let kind = OutcomeKind::of(&result);
        let (waiters, cancel) = {
            let mut state = self.state.borrow_mut();
            let slot = &mut state.slots[task];
            if slot.outcome.is_some() {
                return;
            }
            slot.outcome = Some(result.clone());
            let waiters = mem::take(&mut slot.waiters);
            let mut cancel = None;
            if let Err(error) = &result {
                if !error.is_flow_signal() && state.first_error.is_none() {
                    state.first_error = Some(error.clone());
                    if self.policy != Policy::SettleAll {
                        cancel = Some(error.clone());
                    }
                }
            }
            (waiters, cancel)
        };
        debug!(task = %self.names[task], outcome = ?kind, "task settled");
        if let Some(recorder) = &self.recorder {
            recorder.finish(task, kind);
        }
        for waiter in waiters {
            // A dropped receiver means the lookup was abandoned.
            let _ = waiter.send(result.clone());
        }
        if let Some(cause) = cancel {
            if self.signal.cancel(cause) {
                debug!(task = %self.names[task], "signal cancelled by task failure");
            }
        }
    }
}

impl<T, E, R> Engine<T, E, R> {
    /// Handles `Context::end` from `task`.
    ///
    /// The first call records `value` and fails every pending lookup; any
    /// call halts the calling task. Ignored once the run has concluded.
    pub(crate) fn end(&self, task: usize, value: R) {
        let abandoned: Vec<_> = {
            let mut state = self.state.borrow_mut();
            if state.concluded {
                return;
            }
            state.slots[task].halted = true;
            if state.ended.is_some() {
                return;
            }
            state.ended = Some(value);
            state
                .slots
                .iter_mut()
                .flat_map(|slot| mem::take(&mut slot.waiters))
                .collect()
        };
        debug!(task = %self.names[task], pending = abandoned.len(), "flow ended");
        // Dropping the senders fails the pending lookups.
        drop(abandoned);
    }
}
