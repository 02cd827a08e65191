//! A write-once future completed by a producer.
//!
//! [`Producer`] is the write side and may be cloned and shared between
//! threads. [`MutableFuture`] is the read side and may be cloned too. The
//! first completion wins. Later ones are ignored and never cause a second
//! delivery. When the last producer is dropped while the future is still
//! pending, the future completes with [`Error::Cancelled`] so nobody waits
//! forever.
use crate::{
    executor::dispatch_each,
    future::{CompletionHandler, Continuation, Future, Registry},
    Config, Error, Executor, Fallible, Promise, ReleaseKey, ReleasePool, Releasable,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, Weak,
};
use tracing::{debug, trace};

/// Creates a pending future and its producer using [`Config::default`].
///
/// # Examples
///
/// ```
/// use future_core::{promise, Future, FutureExt, Immediate};
/// use std::{sync::Arc, thread};
/// let (producer, future) = promise::new::<String>();
/// let (tx, rx) = std::sync::mpsc::channel();
/// future.on_complete(Arc::new(Immediate), move |value| tx.send(value).unwrap());
/// thread::spawn(move || producer.succeed("Hi".into()));
/// assert_eq!(rx.recv().unwrap(), Ok("Hi".to_string()));
/// ```
pub fn new<T>() -> (Producer<T>, MutableFuture<T>)
where
    T: Clone + Send + 'static,
{
    with_config(&Config::default())
}

/// Creates a pending future whose default executor comes from `config`.
pub fn with_config<T>(config: &Config) -> (Producer<T>, MutableFuture<T>)
where
    T: Clone + Send + 'static,
{
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            completion: None,
            handlers: ReleasePool::new(),
            retained: ReleasePool::new(),
        }),
        producers: AtomicUsize::new(1),
        executor: config.executor.clone(),
    });
    (
        Producer {
            shared: shared.clone(),
        },
        MutableFuture { shared },
    )
}

/// The write side of a [`MutableFuture`].
#[derive(Debug)]
pub struct Producer<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
}

/// The read side of a promise.
#[derive(Debug)]
pub struct MutableFuture<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    // live producer handles; reaching zero while pending cancels the future.
    producers: AtomicUsize,
    executor: Arc<dyn Executor>,
}

struct State<T> {
    // write-once. the handler pools are drained in the same critical section that sets it.
    completion: Option<Fallible<T>>,
    handlers: ReleasePool<Handler<T>>,
    retained: ReleasePool<Releasable>,
}

struct Handler<T> {
    executor: Arc<dyn Executor>,
    block: Continuation<T>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // continuations never run under this lock, a poisoned state is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn complete(&self, value: Fallible<T>) -> bool {
        let (handlers, retained) = {
            let mut state = self.lock();
            if state.completion.is_some() {
                trace!("future already completed, ignoring completion");
                return false;
            }
            state.completion = Some(value.clone());
            (state.handlers.drain(), state.retained.drain())
        };
        // every handler is handed off even if one panics on an inline executor
        dispatch_each(handlers, |Handler { executor, block }| {
            let value = value.clone();
            executor.execute(Box::new(move || block(value)));
        });
        drop(retained);
        true
    }

    fn register(self: &Arc<Self>, executor: Arc<dyn Executor>, block: Continuation<T>) -> Option<CompletionHandler> {
        let mut state = self.lock();
        match state.completion.clone() {
            Some(value) => {
                drop(state);
                executor.execute(Box::new(move || block(value)));
                None
            }
            None => {
                let key = state.handlers.insert(Handler { executor, block });
                let weak: Weak<Self> = Arc::downgrade(self);
                let registry: Weak<dyn Registry> = weak;
                Some(CompletionHandler::new(registry, key))
            }
        }
    }
}

impl<T: Clone + Send + 'static> Registry for Shared<T> {
    fn unregister(&self, key: ReleaseKey) -> bool {
        let removed = self.lock().handlers.remove(key);
        // dropped outside the lock, the closure may own producers of other futures
        match removed {
            Some(handler) => {
                trace!("completion handler cancelled");
                drop(handler);
                true
            }
            None => false,
        }
    }

    fn is_registered(&self, key: ReleaseKey) -> bool {
        self.lock().handlers.contains(key)
    }
}

impl<T> std::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Shared")
            .field("completed", &state.completion.is_some())
            .field("handlers", &state.handlers.len())
            .field("retained", &state.retained.len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Producer<T> {
    /// Completes the future. Returns false when it was already complete, in
    /// which case nothing is delivered.
    pub fn complete(&self, value: Fallible<T>) -> bool {
        self.shared.complete(value)
    }

    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, err: Error) -> bool {
        self.complete(Err(err))
    }

    pub fn cancel(&self) -> bool {
        self.complete(Err(Error::Cancelled))
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().completion.is_some()
    }

    /// Another read handle on the future this producer completes.
    pub fn future(&self) -> MutableFuture<T> {
        MutableFuture {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Clone for Producer<T> {
    fn clone(&self) -> Self {
        self.shared.producers.fetch_add(1, Ordering::Relaxed);
        Producer {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Producer<T> {
    /// If this is the last producer of an unresolved future, cancel it.
    fn drop(&mut self) {
        if self.shared.producers.fetch_sub(1, Ordering::AcqRel) == 1
            && self.shared.complete(Err(Error::Cancelled))
        {
            debug!("last producer dropped before completion, future cancelled");
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> for Producer<T> {
    type Waiter = MutableFuture<T>;

    fn new() -> (Self, Self::Waiter) {
        new()
    }

    fn resolve(self, value: T) {
        self.succeed(value);
    }

    fn reject(self, err: Error) {
        self.fail(err);
    }
}

impl<T: Clone + Send + 'static> MutableFuture<T> {
    /// Registers `block` on the executor this future was configured with.
    pub fn when_complete<F>(&self, block: F) -> Option<CompletionHandler>
    where
        F: FnOnce(Fallible<T>) + Send + 'static,
    {
        self.shared.register(self.shared.executor.clone(), Box::new(block))
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().completion.is_some()
    }
}

impl<T: Clone + Send + 'static> Clone for MutableFuture<T> {
    fn clone(&self) -> Self {
        MutableFuture {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Future for MutableFuture<T> {
    type Success = T;

    fn completion(&self) -> Option<Fallible<T>> {
        self.shared.lock().completion.clone()
    }

    fn make_completion_handler(
        &self,
        executor: Arc<dyn Executor>,
        block: Continuation<T>,
    ) -> Option<CompletionHandler> {
        self.shared.register(executor, block)
    }

    fn insert_to_release_pool(&self, releasable: Releasable) {
        let mut state = self.shared.lock();
        if state.completion.is_none() {
            state.retained.insert(releasable);
        } else {
            drop(state);
            drop(releasable);
        }
    }
}
