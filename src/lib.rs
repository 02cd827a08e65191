//! Write-once futures, their producers, and multi-value channels.
//!
//! A [`Future`] holds a [`Fallible`] value that becomes known at most once.
//! Consumers attach continuations that run on an [`Executor`] they choose,
//! and every continuation runs exactly once: right away if the value is
//! already there, or when the producer completes the future. Cancellation
//! travels the same path as any other failure, as [`Error::Cancelled`].
//!
//! ```
//! use future_core::{promise, Future, FutureExt, Immediate, Promise};
//! use std::sync::Arc;
//! let (producer, future) = promise::new::<u32>();
//! let doubled = future.map(Arc::new(Immediate), |v| v * 2);
//! producer.resolve(21);
//! assert_eq!(doubled.completion(), Some(Ok(42)));
//! ```
pub mod channel;
pub mod promise;

mod config;
mod constant;
mod error;
mod executor;
mod future;
mod release_pool;

pub use channel::{Channel, Event};
pub use config::Config;
pub use constant::{cancelled_future, future, future_failure, future_success, try_future, ConstantFuture};
pub use error::{Error, Fallible};
pub use executor::{Executor, Immediate, Job, Manual, SerialQueue};
pub use future::{CompletionHandler, Continuation, DynFuture, Future, FutureExt, Wait};
pub use promise::MutableFuture;
pub use release_pool::{ReleaseKey, ReleasePool, Releasable};

/// The producing half of a single-value promise.
pub trait Promise<T> {
    type Waiter;

    fn new() -> (Self, Self::Waiter)
    where
        Self: Sized;

    fn resolve(self, value: T);

    fn reject(self, err: Error);
}
