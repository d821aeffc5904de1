//! Waiting for messages from async code.
//!
//! A [`WaitHandle`] is a manual listener that buffers every message of one
//! type, and at the same time a suspension point: awaiting
//! [`WaitHandle::wait`] parks the task until at least one message has been
//! buffered. Dispatch never blocks on the waiter. When the task resumes it
//! sees everything buffered so far, which may be several messages if more
//! than one `raise` ran before the scheduler polled it again.
//!
//! ```rust
//! use tether_events::EventBus;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Loaded(u32);
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let waiter = bus.listen_wait::<Loaded>();
//!
//! bus.raise(Loaded(1));
//! let messages = waiter.wait().await;
//! assert_eq!(messages, vec![Loaded(1)]);
//! # }
//! ```

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use tracing::trace;

use crate::bus::EventBus;
use crate::subscription::Subscription;

struct WaitState<M> {
    messages: Option<Vec<M>>,
    waker: Option<Waker>,
    disposed: bool,
}

fn lock<M>(state: &Mutex<WaitState<M>>) -> MutexGuard<'_, WaitState<M>> {
    state.lock().expect("lock poisoned")
}

/// Buffers every `M` raised after its creation until disposed.
///
/// Dropping the handle disposes it.
pub struct WaitHandle<M> {
    state: Arc<Mutex<WaitState<M>>>,
    subscription: Subscription,
}

impl<M: Clone + Send + 'static> WaitHandle<M> {
    pub(crate) fn new(bus: &EventBus) -> Self {
        let state = Arc::new(Mutex::new(WaitState {
            messages: None,
            waker: None,
            disposed: false,
        }));

        let sink = Arc::clone(&state);
        let subscription = bus.listen_manual(move |message: &M| {
            let waker = {
                let mut state = lock(&sink);
                if state.disposed {
                    return;
                }
                state
                    .messages
                    .get_or_insert_with(Vec::new)
                    .push(message.clone());
                state.waker.take()
            };
            if let Some(waker) = waker {
                trace!(message_type = std::any::type_name::<M>(), "Waking waiter");
                waker.wake();
            }
        });

        Self {
            state,
            subscription,
        }
    }

    /// All buffered messages in arrival order, or `None` before the first.
    #[must_use]
    pub fn messages(&self) -> Option<Vec<M>> {
        lock(&self.state).messages.clone()
    }

    /// The first buffered message.
    #[must_use]
    pub fn first(&self) -> Option<M> {
        lock(&self.state)
            .messages
            .as_ref()
            .and_then(|messages| messages.first().cloned())
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state).messages.as_ref().map_or(0, Vec::len)
    }

    /// Whether nothing has been buffered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Suspend until at least one message is buffered.
    ///
    /// Resolves with a copy of the whole buffer. Resolves immediately if a
    /// message is already buffered. Never resolves after disposal unless a
    /// message was buffered before it.
    pub fn wait(&self) -> Wait<'_, M> {
        Wait { handle: self }
    }

    /// Unregister the underlying listener. Later calls are no-ops.
    ///
    /// The buffer is kept; nothing new is added to it.
    pub fn dispose(&self) {
        lock(&self.state).disposed = true;
        self.subscription.dispose();
    }

    /// Whether this handle has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.subscription.is_disposed()
    }
}

impl<M> fmt::Debug for WaitHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffered = self
            .state
            .lock()
            .map(|s| s.messages.as_ref().map_or(0, Vec::len))
            .unwrap_or_default();
        f.debug_struct("WaitHandle")
            .field("subscription", &self.subscription)
            .field("buffered", &buffered)
            .finish()
    }
}

/// Future returned by [`WaitHandle::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Wait<'a, M> {
    handle: &'a WaitHandle<M>,
}

impl<M: Clone> Future for Wait<'_, M> {
    type Output = Vec<M>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = lock(&self.handle.state);
        if let Some(messages) = state.messages.as_ref().filter(|m| !m.is_empty()) {
            return Poll::Ready(messages.clone());
        }
        if !state.disposed {
            state.waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<'a, M: Clone + Send + 'static> IntoFuture for &'a WaitHandle<M> {
    type Output = Vec<M>;
    type IntoFuture = Wait<'a, M>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait()
    }
}
