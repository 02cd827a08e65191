//! Futures that are complete from the moment they exist.
use crate::{
    future::{CompletionHandler, Continuation, DynFuture, Future},
    Error, Executor, Fallible, Releasable,
};
use std::sync::Arc;

/// A future holding an already-known completion.
///
/// Has no lock, no handler registry and no release pool: every registration
/// is handed straight to its executor.
///
/// # Examples
///
/// ```
/// use future_core::{future_success, Future, FutureExt, Immediate};
/// use std::sync::Arc;
/// let future = future_success(42);
/// let token = future.on_complete(Arc::new(Immediate), |value| assert_eq!(value, Ok(42)));
/// assert!(token.is_none());
/// assert_eq!(future.completion(), Some(Ok(42)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantFuture<T> {
    value: Fallible<T>,
}

impl<T> ConstantFuture<T> {
    pub fn new(value: Fallible<T>) -> Self {
        ConstantFuture { value }
    }

    pub fn success(value: T) -> Self {
        Self::new(Ok(value))
    }

    pub fn failure(err: Error) -> Self {
        Self::new(Err(err))
    }

    pub fn cancelled() -> Self {
        Self::failure(Error::Cancelled)
    }

    pub fn value(&self) -> &Fallible<T> {
        &self.value
    }
}

impl<T> Future for ConstantFuture<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Success = T;

    fn completion(&self) -> Option<Fallible<T>> {
        Some(self.value.clone())
    }

    fn make_completion_handler(
        &self,
        executor: Arc<dyn Executor>,
        block: Continuation<T>,
    ) -> Option<CompletionHandler> {
        let value = self.value.clone();
        executor.execute(Box::new(move || block(value)));
        None
    }

    fn insert_to_release_pool(&self, releasable: Releasable) {
        // nothing is pending, so nothing needs to outlive this call
        drop(releasable);
    }
}

pub fn future<T>(value: Fallible<T>) -> ConstantFuture<T> {
    ConstantFuture::new(value)
}

pub fn future_success<T>(value: T) -> ConstantFuture<T> {
    ConstantFuture::success(value)
}

pub fn future_failure<T>(err: Error) -> ConstantFuture<T> {
    ConstantFuture::failure(err)
}

/// A future failed with [`Error::Cancelled`].
pub fn cancelled_future<T>() -> ConstantFuture<T> {
    ConstantFuture::cancelled()
}

/// Runs a fallible factory of futures. An error returned before a future
/// exists becomes an already-failed future, so callers only ever deal with
/// the future's failure path.
///
/// # Examples
///
/// ```
/// use future_core::{try_future, Error, Future};
/// let future = try_future(|| -> Result<future_core::ConstantFuture<u8>, Error> {
///     Err(Error::msg("bad input"))
/// });
/// assert_eq!(future.completion(), Some(Err(Error::msg("bad input"))));
/// ```
pub fn try_future<T, F, B>(block: B) -> DynFuture<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Success = T> + 'static,
    B: FnOnce() -> Result<F, Error>,
{
    match block() {
        Ok(future) => Arc::new(future),
        Err(err) => Arc::new(ConstantFuture::failure(err)),
    }
}
