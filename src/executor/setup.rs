use crate::{
    config::Options,
    error::Error,
    executor::{Engine, Policy, Slot, State},
    signal::{CancellationToken, Subscription},
    task::{Context, TaskFuture, TaskSet},
    telemetry::{Recorder, TelemetryEntry},
    types::IndexSet,
};
use core::{cell::RefCell, future::Future, task::Poll};
use futures::future::{self, FutureExt};
use std::rc::Rc;
use tracing::debug;
use unzip3::Unzip3;

impl<T, E, R> Engine<T, E, R>
where
    T: Clone + 'static,
    E: Clone + Send + 'static,
    R: 'static,
{
    /// Allocates one slot (and one telemetry entry in debug mode) per task,
    /// in task-set order.
    pub(super) fn new(tasks: &TaskSet<T, E, R>, policy: Policy, options: &Options<E>) -> Rc<Self> {
        let (names, slots, entries): (IndexSet<_>, Vec<_>, Vec<_>) = tasks
            .names()
            .map(|name| (name.clone(), Slot::default(), TelemetryEntry::new(name.clone())))
            .unzip3();
        Rc::new(Self {
            policy,
            names,
            state: RefCell::new(State {
                slots,
                first_error: None,
                ended: None,
                concluded: false,
            }),
            signal: CancellationToken::new(),
            recorder: options
                .debug
                .then(|| Recorder::new(options.clock.clone(), entries)),
        })
    }

    /// Propagates cancellation of `external` into the invocation's signal.
    ///
    /// An already-cancelled `external` cancels the signal before any task
    /// starts. Dropping the returned subscription detaches from `external`.
    pub(super) fn forward(&self, external: &CancellationToken<Error<E>>) -> Subscription<Error<E>> {
        let signal = self.signal.clone();
        external.on_cancel(move |cause| {
            if signal.cancel(cause.clone()) {
                debug!("external signal cancelled");
            }
        })
    }

    /// Invokes every task body back to back and returns one driver per task.
    ///
    /// A driver polls its task's future until it concludes, records the
    /// outcome, and stops early if the task ended the flow.
    pub(super) fn launch(self: Rc<Self>, tasks: TaskSet<T, E, R>) -> Vec<impl Future<Output = ()>> {
        tasks
            .entries
            .into_iter()
            .enumerate()
            .map(|(task, (name, task_fn))| {
                if let Some(recorder) = &self.recorder {
                    recorder.start(task);
                }
                debug!(task = %name, "task started");
                let body = match task_fn {
                    Some(task_fn) => task_fn(Context {
                        engine: self.clone(),
                        task,
                    }),
                    None => future::ready(Err(Error::NotCallable(name))).boxed_local(),
                };
                Self::drive(self.clone(), task, body)
            })
            .collect()
    }

    fn drive(engine: Rc<Self>, task: usize, mut body: TaskFuture<T, E>) -> impl Future<Output = ()> {
        let halting = {
            let engine = engine.clone();
            future::poll_fn(move |cx| {
                let polled = body.as_mut().poll(cx);
                // `end` was called during this poll: the task goes no further.
                if engine.is_halted(task) {
                    return Poll::Ready(Err(Error::ended()));
                }
                polled
            })
        };
        async move {
            let result = halting.await;
            engine.settle(task, result);
        }
    }
}
