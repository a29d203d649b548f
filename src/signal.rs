use crate::{
    sync::{Arc, AtomicBool, AtomicU64, Mutex, Ordering, lock},
    types::IndexMap,
};
use core::{
    fmt,
    pin::Pin,
    task::{Context, Poll, Waker},
};
use derive_more::Deref;

/// Shared, monotonic cancellation signal carrying an optional cause.
///
/// Cloning yields another handle to the same signal. Only the token can
/// cancel; tasks receive the read-only [`CancelView`] it dereferences to.
#[derive(Deref)]
pub struct CancellationToken<C> {
    view: CancelView<C>,
}

/// Read and subscribe access to a [`CancellationToken`].
pub struct CancelView<C> {
    inner: Arc<Inner<C>>,
}

struct Inner<C> {
    cancelled: AtomicBool,
    next_listener: AtomicU64,
    state: Mutex<State<C>>,
}

struct State<C> {
    reason: Option<C>,
    listeners: IndexMap<u64, Listener<C>>,
}

enum Listener<C> {
    Wake(Waker),
    Call(Box<dyn FnOnce(&C) + Send>),
}

impl<C> CancellationToken<C> {
    /// Token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            view: CancelView {
                inner: Arc::new(Inner {
                    cancelled: AtomicBool::new(false),
                    next_listener: AtomicU64::new(0),
                    state: Mutex::new(State {
                        reason: None,
                        listeners: IndexMap::default(),
                    }),
                }),
            },
        }
    }

    /// Cancels the token with `cause`.
    ///
    /// Returns `false` if the token was already cancelled, in which case the
    /// first cause is kept and no listener runs again.
    pub fn cancel(&self, cause: C) -> bool
    where
        C: Clone,
    {
        let listeners = {
            let mut state = lock(&self.inner.state);
            if state.reason.is_some() {
                return false;
            }
            state.reason = Some(cause.clone());
            self.inner.cancelled.store(true, Ordering::Release);
            core::mem::take(&mut state.listeners)
        };
        // Listeners run outside the lock so they may inspect the token.
        for (_, listener) in listeners {
            match listener {
                Listener::Wake(waker) => waker.wake(),
                Listener::Call(callback) => callback(&cause),
            }
        }
        true
    }

    /// Returns an owned read-only view of this token.
    #[must_use]
    pub fn view(&self) -> CancelView<C> {
        self.view.clone()
    }
}

impl<C> CancelView<C> {
    /// `true` once the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cause the token was cancelled with, if it has been.
    #[must_use]
    pub fn reason(&self) -> Option<C>
    where
        C: Clone,
    {
        lock(&self.inner.state).reason.clone()
    }

    /// Future that completes once the token is cancelled.
    #[must_use]
    pub fn cancelled(&self) -> Cancelled<C> {
        Cancelled {
            inner: self.inner.clone(),
            listener: None,
        }
    }

    /// Registers a one-shot listener for the cancellation transition.
    ///
    /// Runs `listener` right away if the token is already cancelled. The
    /// listener is released when the returned [`Subscription`] is dropped.
    pub fn on_cancel(&self, listener: impl FnOnce(&C) + Send + 'static) -> Subscription<C>
    where
        C: Clone,
    {
        let mut state = lock(&self.inner.state);
        if let Some(reason) = state.reason.clone() {
            drop(state);
            listener(&reason);
            return Subscription {
                inner: None,
                id: 0,
            };
        }
        let id = self.inner.next_id();
        state.listeners.insert(id, Listener::Call(Box::new(listener)));
        Subscription {
            inner: Some(self.inner.clone()),
            id,
        }
    }
}

impl<C> Inner<C> {
    fn next_id(&self) -> u64 {
        self.next_listener.fetch_add(1, Ordering::Relaxed)
    }

    fn remove(&self, id: u64) {
        lock(&self.state).listeners.swap_remove(&id);
    }
}

impl<C> Default for CancellationToken<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for CancellationToken<C> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
        }
    }
}

impl<C> Clone for CancelView<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> fmt::Debug for CancellationToken<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<C> fmt::Debug for CancelView<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelView")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`CancelView::cancelled`].
#[must_use = "futures do nothing unless polled"]
pub struct Cancelled<C> {
    inner: Arc<Inner<C>>,
    listener: Option<u64>,
}

impl<C> Future for Cancelled<C> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.inner.cancelled.load(Ordering::Acquire) {
            this.listener = None;
            return Poll::Ready(());
        }
        let mut state = lock(&this.inner.state);
        if state.reason.is_some() {
            this.listener = None;
            return Poll::Ready(());
        }
        match this.listener {
            Some(id) => {
                if let Some(Listener::Wake(waker)) = state.listeners.get_mut(&id) {
                    waker.clone_from(cx.waker());
                }
            }
            None => {
                let id = this.inner.next_id();
                state
                    .listeners
                    .insert(id, Listener::Wake(cx.waker().clone()));
                this.listener = Some(id);
            }
        }
        Poll::Pending
    }
}

impl<C> Drop for Cancelled<C> {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.inner.remove(id);
        }
    }
}

/// Registration created by [`CancelView::on_cancel`]; dropping it releases
/// the listener.
#[must_use = "dropping a subscription releases its listener immediately"]
pub struct Subscription<C> {
    inner: Option<Arc<Inner<C>>>,
    id: u64,
}

impl<C> Drop for Subscription<C> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.remove(self.id);
        }
    }
}

impl<C> fmt::Debug for Subscription<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.inner.is_some())
            .finish()
    }
}
