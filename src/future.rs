//! The read-only side of a value that becomes available at most once.
//!
//! A [`Future`] can be asked for its current completion, or handed a
//! continuation that runs on a chosen [`Executor`] once the completion is
//! known. Every continuation runs exactly once. A continuation registered on
//! a pending future is owned by that future until it fires or is cancelled
//! through the returned [`CompletionHandler`].
use crate::{promise, Error, Executor, Fallible, MutableFuture, ReleaseKey, Releasable};
use std::{
    sync::{Arc, Mutex, PoisonError, Weak},
    task::{Context, Poll, Waker},
};

/// A continuation waiting for a completion value.
pub type Continuation<T> = Box<dyn FnOnce(Fallible<T>) + Send + 'static>;

/// A shared, type-erased future.
pub type DynFuture<T> = Arc<dyn Future<Success = T>>;

pub trait Future: Send + Sync {
    type Success: Clone + Send + 'static;

    /// The completion, or `None` while pending. Once `Some`, it never changes.
    fn completion(&self) -> Option<Fallible<Self::Success>>;

    /// Registers `block` to receive the completion through `executor`.
    ///
    /// Returns `None` when the future was already complete, in which case
    /// `block` has already been handed to `executor`. Otherwise returns a
    /// token that can cancel this registration before it fires.
    fn make_completion_handler(
        &self,
        executor: Arc<dyn Executor>,
        block: Continuation<Self::Success>,
    ) -> Option<CompletionHandler>;

    /// Keeps `releasable` alive until this future completes. A completed
    /// future drops it right away.
    fn insert_to_release_pool(&self, releasable: Releasable);
}

impl<F: Future + ?Sized> Future for Arc<F> {
    type Success = F::Success;

    fn completion(&self) -> Option<Fallible<Self::Success>> {
        (**self).completion()
    }

    fn make_completion_handler(
        &self,
        executor: Arc<dyn Executor>,
        block: Continuation<Self::Success>,
    ) -> Option<CompletionHandler> {
        (**self).make_completion_handler(executor, block)
    }

    fn insert_to_release_pool(&self, releasable: Releasable) {
        (**self).insert_to_release_pool(releasable)
    }
}

/// Something that hands out registrations and can take them back.
pub(crate) trait Registry: Send + Sync {
    /// Removes the registration without firing it. Returns false if it
    /// already fired or was already removed.
    fn unregister(&self, key: ReleaseKey) -> bool;

    fn is_registered(&self, key: ReleaseKey) -> bool;
}

/// Token for a continuation registered on a pending future or channel.
///
/// Dropping the token leaves the registration in place.
pub struct CompletionHandler {
    registry: Weak<dyn Registry>,
    key: ReleaseKey,
}

impl CompletionHandler {
    pub(crate) fn new(registry: Weak<dyn Registry>, key: ReleaseKey) -> Self {
        CompletionHandler { registry, key }
    }

    /// Cancels the registration. The continuation never fires and is
    /// released; other registrations are unaffected. Returns false when it
    /// had already fired or been cancelled.
    pub fn cancel(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.unregister(self.key),
            None => false,
        }
    }

    /// Whether the continuation is still waiting to fire.
    pub fn is_pending(&self) -> bool {
        self.registry
            .upgrade()
            .map_or(false, |registry| registry.is_registered(self.key))
    }
}

impl std::fmt::Debug for CompletionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandler")
            .field("key", &self.key)
            .finish()
    }
}

/// Convenience registrations available on every [`Future`].
pub trait FutureExt: Future {
    fn on_complete<F>(&self, executor: Arc<dyn Executor>, block: F) -> Option<CompletionHandler>
    where
        F: FnOnce(Fallible<Self::Success>) + Send + 'static,
    {
        self.make_completion_handler(executor, Box::new(block))
    }

    fn on_success<F>(&self, executor: Arc<dyn Executor>, block: F) -> Option<CompletionHandler>
    where
        F: FnOnce(Self::Success) + Send + 'static,
    {
        self.on_complete(executor, move |value| {
            if let Ok(success) = value {
                block(success)
            }
        })
    }

    fn on_failure<F>(&self, executor: Arc<dyn Executor>, block: F) -> Option<CompletionHandler>
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.on_complete(executor, move |value| {
            if let Err(err) = value {
                block(err)
            }
        })
    }

    /// A future completing with `transform` applied to this future's success,
    /// or with this future's failure. Cancelling this future cancels the
    /// mapped one.
    fn map<U, F>(&self, executor: Arc<dyn Executor>, transform: F) -> MutableFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Self::Success) -> U + Send + 'static,
    {
        let (producer, mapped) = promise::new::<U>();
        let handler = self.on_complete(executor, move |value| {
            producer.complete(value.map(transform));
        });
        if let Some(handler) = handler {
            mapped.insert_to_release_pool(Box::new(handler));
        }
        mapped
    }

    /// Adapts this future into a [`std::future::Future`].
    ///
    /// # Examples
    ///
    /// ```
    /// use future_core::{promise, FutureExt, Promise};
    /// use futures::executor::block_on;
    /// use std::thread;
    /// let (producer, future) = promise::new::<String>();
    /// let waiting = future.wait();
    /// let task = thread::spawn(move || block_on(waiting));
    /// producer.resolve("🍓".into());
    /// assert_eq!(task.join().unwrap(), Ok("🍓".to_string()));
    /// ```
    fn wait(&self) -> Wait<Self::Success> {
        let slot = Arc::new(Mutex::new(WaitSlot {
            value: None,
            waker: Err(WakerState::Fresh),
        }));
        let filler = slot.clone();
        self.on_complete(Arc::new(crate::Immediate), move |value| {
            let mut slot = filler.lock().unwrap_or_else(PoisonError::into_inner);
            slot.value = Some(value);
            if let Ok(waker) = std::mem::replace(&mut slot.waker, Err(WakerState::Tainted)) {
                waker.wake()
            }
        });
        Wait { slot }
    }
}

impl<F: Future + ?Sized> FutureExt for F {}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Tainted,
}

#[derive(Debug)]
struct WaitSlot<T> {
    value: Option<Fallible<T>>,
    waker: Result<Waker, WakerState>,
}

/// An [`std::future::Future`] resolving to a core future's completion.
#[derive(Debug)]
pub struct Wait<T> {
    slot: Arc<Mutex<WaitSlot<T>>>,
}

impl<T> std::future::Future for Wait<T> {
    type Output = Fallible<T>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => match slot.waker {
                // polled again after yielding the value
                Err(WakerState::Tainted) => Poll::Ready(Err(Error::Cancelled)),
                _ => {
                    slot.waker = Ok(cx.waker().clone());
                    Poll::Pending
                }
            },
        }
    }
}
