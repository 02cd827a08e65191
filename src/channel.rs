//! A channel delivers an ordered, unbounded sequence of updates to every
//! observer registered at the time of each push, optionally ending with a
//! completion. The [`Producer`] may be cloned and used from any thread.
//!
//! Each observer owns a mailbox drained by at most one job at a time on the
//! observer's executor, so an observer sees updates in push order whatever
//! executor it picked. Observers registering late only get the updates kept
//! in the channel's buffer, then live ones.
//!
use crate::{
    executor::dispatch_each,
    future::{CompletionHandler, Continuation, Future, Registry},
    promise, Config, Error, Executor, Fallible, MutableFuture, ReleaseKey, ReleasePool, Releasable,
};
use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak,
    },
};
use tracing::{debug, error, trace};

/// What an observer of a [`Channel`] receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<T> {
    Update(T),
    /// End of stream. Always the last event an observer sees.
    Completion(Fallible<()>),
}

type Observe<T> = Box<dyn FnMut(Event<T>) + Send + 'static>;

/// Creates a channel keeping the `buffer_size` most recent updates for
/// observers that register later.
///
/// # Examples
///
/// ```
/// use future_core::{channel, Immediate};
/// use std::sync::{Arc, Mutex};
/// let (producer, updates) = channel::new::<i32>(0);
/// producer.push_all([1, 2, 3]);
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// updates.on_update(Arc::new(Immediate), move |v| sink.lock().unwrap().push(v));
/// producer.push_all([4, 5]);
/// assert_eq!(*seen.lock().unwrap(), vec![4, 5]);
/// ```
pub fn new<T>(buffer_size: usize) -> (Producer<T>, Channel<T>)
where
    T: Clone + Send + 'static,
{
    with_config(&Config::default().with_channel_buffer_size(buffer_size))
}

/// Creates a channel with the buffer size and default executor of `config`.
pub fn with_config<T>(config: &Config) -> (Producer<T>, Channel<T>)
where
    T: Clone + Send + 'static,
{
    let (completer, completion) = promise::with_config::<()>(config);
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buffer: VecDeque::with_capacity(config.channel_buffer_size),
            capacity: config.channel_buffer_size,
            observers: ReleasePool::new(),
            completion: None,
        }),
        producers: AtomicUsize::new(1),
        executor: config.executor.clone(),
        completer,
        completion,
    });
    (
        Producer {
            shared: shared.clone(),
        },
        Channel { shared },
    )
}

/// The push side of a [`Channel`].
pub struct Producer<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
}

/// The observable side of a channel. Its [`Future`] completion is the end of
/// the stream.
pub struct Channel<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
}

struct Shared<T: Clone + Send + 'static> {
    state: Mutex<State<T>>,
    producers: AtomicUsize,
    executor: Arc<dyn Executor>,
    // end-of-stream, shared with plain completion handlers.
    completer: promise::Producer<()>,
    completion: MutableFuture<()>,
}

struct State<T> {
    // the most recent updates, at most `capacity` of them.
    buffer: VecDeque<T>,
    capacity: usize,
    observers: ReleasePool<Arc<Observer<T>>>,
    // write-once, observers are drained when it is set.
    completion: Option<Fallible<()>>,
}

struct Observer<T> {
    executor: Arc<dyn Executor>,
    mailbox: Mutex<Mailbox<T>>,
    block: Mutex<Option<Observe<T>>>,
    cancelled: AtomicBool,
}

struct Mailbox<T> {
    events: VecDeque<Event<T>>,
    // a drain job is queued or running.
    scheduled: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Send + 'static> Observer<T> {
    fn new(executor: Arc<dyn Executor>, block: Observe<T>) -> Self {
        Observer {
            executor,
            mailbox: Mutex::new(Mailbox {
                events: VecDeque::new(),
                scheduled: false,
            }),
            block: Mutex::new(Some(block)),
            cancelled: AtomicBool::new(false),
        }
    }

    // queue an event. returns true if the caller must schedule a drain.
    fn enqueue(&self, event: Event<T>) -> bool {
        let mut mailbox = lock(&self.mailbox);
        mailbox.events.push_back(event);
        !std::mem::replace(&mut mailbox.scheduled, true)
    }

    fn schedule(self: &Arc<Self>) {
        let observer = self.clone();
        self.executor.execute(Box::new(move || observer.drain()));
    }

    fn drain(&self) {
        let mut panicked = None;
        loop {
            let event = {
                let mut mailbox = lock(&self.mailbox);
                if self.cancelled.load(Ordering::Acquire) {
                    mailbox.events.clear();
                    mailbox.scheduled = false;
                    drop(mailbox);
                    lock(&self.block).take();
                    break;
                }
                match mailbox.events.pop_front() {
                    Some(event) => event,
                    None => {
                        mailbox.scheduled = false;
                        break;
                    }
                }
            };
            let last = matches!(event, Event::Completion(_));
            let mut block = lock(&self.block);
            // a cancel may land between popping the event and taking the block
            if self.cancelled.load(Ordering::Acquire) {
                continue;
            }
            if let Some(observe) = block.as_mut() {
                // keep draining after a panic, `scheduled` must not stay set
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| observe(event))) {
                    error!("channel observer panicked");
                    panicked.get_or_insert(payload);
                }
            }
            if last {
                block.take();
            }
        }
        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        // a running drain holds the block and drops it once it sees the flag
        match self.block.try_lock() {
            Ok(mut block) => drop(block.take()),
            Err(TryLockError::Poisoned(poisoned)) => drop(poisoned.into_inner().take()),
            Err(TryLockError::WouldBlock) => {}
        }
    }
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        lock(&self.state)
    }

    fn push(&self, value: T) -> bool {
        let scheduled = {
            let mut state = self.lock();
            if state.completion.is_some() {
                trace!("channel already completed, dropping update");
                return false;
            }
            if state.capacity > 0 {
                if state.buffer.len() == state.capacity {
                    state.buffer.pop_front();
                }
                state.buffer.push_back(value.clone());
            }
            // enqueued under the channel lock so every mailbox sees the same push order
            let scheduled: Vec<_> = state
                .observers
                .iter()
                .filter(|observer| observer.enqueue(Event::Update(value.clone())))
                .cloned()
                .collect();
            scheduled
        };
        dispatch_each(scheduled, |observer| observer.schedule());
        true
    }

    fn complete(&self, value: Fallible<()>) -> bool {
        let observers = {
            let mut state = self.lock();
            if state.completion.is_some() {
                trace!("channel already completed, ignoring completion");
                return false;
            }
            state.completion = Some(value.clone());
            state.observers.drain()
        };
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            dispatch_each(observers, |observer| {
                if observer.enqueue(Event::Completion(value.clone())) {
                    observer.schedule();
                }
            })
        }));
        self.completer.complete(value);
        if let Err(payload) = delivered {
            panic::resume_unwind(payload);
        }
        true
    }

    fn register(self: &Arc<Self>, executor: Arc<dyn Executor>, block: Observe<T>) -> Option<CompletionHandler> {
        let observer = Arc::new(Observer::new(executor, block));
        let (handler, schedule) = {
            let mut state = self.lock();
            let mut schedule = false;
            for value in state.buffer.iter() {
                schedule |= observer.enqueue(Event::Update(value.clone()));
            }
            let handler = match state.completion.clone() {
                Some(value) => {
                    schedule |= observer.enqueue(Event::Completion(value));
                    None
                }
                None => {
                    let key = state.observers.insert(observer.clone());
                    let weak: Weak<Self> = Arc::downgrade(self);
                    let registry: Weak<dyn Registry> = weak;
                    Some(CompletionHandler::new(registry, key))
                }
            };
            (handler, schedule)
        };
        if schedule {
            observer.schedule();
        }
        handler
    }
}

impl<T: Clone + Send + 'static> Registry for Shared<T> {
    fn unregister(&self, key: ReleaseKey) -> bool {
        let removed = self.lock().observers.remove(key);
        match removed {
            Some(observer) => {
                trace!("channel observer cancelled");
                observer.cancel();
                true
            }
            None => false,
        }
    }

    fn is_registered(&self, key: ReleaseKey) -> bool {
        self.lock().observers.contains(key)
    }
}

impl<T: Clone + Send + 'static> Producer<T> {
    /// Delivers `value` to every current observer. Returns false once the
    /// channel has completed.
    pub fn push(&self, value: T) -> bool {
        self.shared.push(value)
    }

    pub fn push_all<I: IntoIterator<Item = T>>(&self, values: I) {
        for value in values {
            if !self.push(value) {
                return;
            }
        }
    }

    /// Ends the stream. Returns false when it had already ended.
    pub fn complete(&self, value: Fallible<()>) -> bool {
        self.shared.complete(value)
    }

    pub fn finish(&self) -> bool {
        self.complete(Ok(()))
    }

    pub fn fail(&self, err: Error) -> bool {
        self.complete(Err(err))
    }

    /// Teardown: delivers [`Error::Cancelled`] to every pending observer.
    pub fn cancel(&self) -> bool {
        self.complete(Err(Error::Cancelled))
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().completion.is_some()
    }

    pub fn channel(&self) -> Channel<T> {
        Channel {
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
    fn drop(&mut self) {
        if self.shared.producers.fetch_sub(1, Ordering::AcqRel) == 1
            && self.shared.complete(Err(Error::Cancelled))
        {
            debug!("last channel producer dropped before completion, channel cancelled");
        }
    }
}

impl<T: Clone + Send + 'static> Channel<T> {
    /// Registers `block` for every later update and the completion.
    ///
    /// Returns `None` when the channel had already completed; `block` then
    /// still receives the buffered updates and the completion.
    pub fn make_handler<F>(&self, executor: Arc<dyn Executor>, block: F) -> Option<CompletionHandler>
    where
        F: FnMut(Event<T>) + Send + 'static,
    {
        self.shared.register(executor, Box::new(block))
    }

    pub fn on_update<F>(&self, executor: Arc<dyn Executor>, mut block: F) -> Option<CompletionHandler>
    where
        F: FnMut(T) + Send + 'static,
    {
        self.make_handler(executor, move |event| {
            if let Event::Update(value) = event {
                block(value)
            }
        })
    }

    /// Like [`Channel::on_update`], on the executor this channel was
    /// configured with.
    pub fn when_update<F>(&self, block: F) -> Option<CompletionHandler>
    where
        F: FnMut(T) + Send + 'static,
    {
        self.on_update(self.shared.executor.clone(), block)
    }

    /// The updates a newly registered observer would be replayed.
    pub fn buffered(&self) -> Vec<T> {
        self.shared.lock().buffer.iter().cloned().collect()
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.lock().capacity
    }
}

impl<T: Clone + Send + 'static> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Future for Channel<T> {
    type Success = ();

    fn completion(&self) -> Option<Fallible<()>> {
        // the channel state is set before observers or handlers hear about it
        self.shared.lock().completion.clone()
    }

    fn make_completion_handler(
        &self,
        executor: Arc<dyn Executor>,
        block: Continuation<()>,
    ) -> Option<CompletionHandler> {
        self.shared.completion.make_completion_handler(executor, block)
    }

    fn insert_to_release_pool(&self, releasable: Releasable) {
        self.shared.completion.insert_to_release_pool(releasable)
    }
}

impl<T: Clone + Send + 'static> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Channel")
            .field("buffered", &state.buffer.len())
            .field("observers", &state.observers.len())
            .field("completed", &state.completion.is_some())
            .finish()
    }
}

impl<T: Clone + Send + 'static> std::fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("producers", &self.shared.producers.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Event;
    use crate::{channel, Config, Error, Future, FutureExt, Immediate, Manual};
    use std::{
        panic::{self, AssertUnwindSafe},
        sync::{Arc, Mutex},
    };

    fn collect<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<Event<T>>>>, impl FnMut(Event<T>) + Send + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |event| sink.lock().unwrap().push(event))
    }

    #[test]
    fn test_unbuffered_channel_skips_history() {
        let (producer, updates) = channel::new::<i32>(0);
        producer.push_all([1, 2, 3]);
        let (log, block) = collect();
        assert!(updates.make_handler(Arc::new(Immediate), block).is_some());
        producer.push_all([4, 5]);
        assert_eq!(*log.lock().unwrap(), vec![Event::Update(4), Event::Update(5)]);
    }

    #[test]
    fn test_buffer_replays_most_recent() {
        let (producer, updates) = channel::new::<i32>(2);
        producer.push_all([1, 2, 3]);
        assert_eq!(updates.buffered(), vec![2, 3]);
        let (log, block) = collect();
        updates.make_handler(Arc::new(Immediate), block);
        producer.push(4);
        assert_eq!(
            *log.lock().unwrap(),
            vec![Event::Update(2), Event::Update(3), Event::Update(4)]
        );
        assert_eq!(updates.buffered(), vec![3, 4]);
    }

    #[test]
    fn test_completion_is_last_and_once() {
        let (producer, updates) = channel::new::<i32>(0);
        let (log, block) = collect();
        updates.make_handler(Arc::new(Immediate), block);
        producer.push(1);
        assert!(producer.finish());
        assert!(!producer.finish());
        assert!(!producer.push(2));
        assert_eq!(
            *log.lock().unwrap(),
            vec![Event::Update(1), Event::Completion(Ok(()))]
        );
        assert_eq!(updates.completion(), Some(Ok(())));
    }

    #[test]
    fn test_register_after_completion_gets_buffer_and_completion() {
        let (producer, updates) = channel::new::<i32>(1);
        producer.push(7);
        producer.fail(Error::msg("done badly"));
        let (log, block) = collect();
        assert!(updates.make_handler(Arc::new(Immediate), block).is_none());
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Event::Update(7),
                Event::Completion(Err(Error::msg("done badly")))
            ]
        );
    }

    #[test]
    fn test_cancelled_observer_gets_nothing_more() {
        let manual = Arc::new(Manual::new());
        let (producer, updates) = channel::new::<i32>(0);
        let (cancelled_log, block) = collect();
        let handler = updates.make_handler(manual.clone(), block).unwrap();
        let (other_log, block) = collect();
        updates.make_handler(manual.clone(), block);
        producer.push(1);
        assert!(handler.cancel());
        producer.push(2);
        manual.run_pending();
        assert!(cancelled_log.lock().unwrap().is_empty());
        assert_eq!(*other_log.lock().unwrap(), vec![Event::Update(1), Event::Update(2)]);
    }

    #[test]
    fn test_observer_can_cancel_itself() {
        let (producer, updates) = channel::new::<i32>(0);
        let token: Arc<Mutex<Option<crate::CompletionHandler>>> = Arc::new(Mutex::new(None));
        let slot = token.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = updates.on_update(Arc::new(Immediate), move |v| {
            sink.lock().unwrap().push(v);
            if let Some(handler) = slot.lock().unwrap().take() {
                handler.cancel();
            }
        });
        *token.lock().unwrap() = handler;
        producer.push_all([1, 2, 3]);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_dropping_producers_cancels_observers() {
        let (producer, updates) = channel::new::<i32>(0);
        let (log, block) = collect();
        updates.make_handler(Arc::new(Immediate), block);
        let cancelled = Arc::new(Mutex::new(None));
        let slot = cancelled.clone();
        updates.on_complete(Arc::new(Immediate), move |v| *slot.lock().unwrap() = Some(v));
        let other = producer.clone();
        drop(producer);
        assert!(log.lock().unwrap().is_empty());
        drop(other);
        assert_eq!(
            *log.lock().unwrap(),
            vec![Event::Completion(Err(Error::Cancelled))]
        );
        assert_eq!(*cancelled.lock().unwrap(), Some(Err(Error::Cancelled)));
    }

    #[test]
    fn test_observer_pushing_into_own_channel() {
        let (producer, updates) = channel::new::<i32>(0);
        let echo = producer.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        updates.on_update(Arc::new(Immediate), move |v| {
            sink.lock().unwrap().push(v);
            if v < 3 {
                echo.push(v + 1);
            }
        });
        producer.push(1);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        // ending the stream drops the observer and the producer it captured
        assert!(producer.finish());
        assert_eq!(updates.completion(), Some(Ok(())));
    }

    #[test]
    fn test_completion_visible_to_observer_receiving_it() {
        let (producer, updates) = channel::new::<i32>(0);
        let reader = updates.clone();
        let observed = Arc::new(Mutex::new(None));
        let slot = observed.clone();
        updates.make_handler(Arc::new(Immediate), move |event| {
            if let Event::Completion(_) = event {
                *slot.lock().unwrap() = Some(reader.completion());
            }
        });
        producer.finish();
        assert_eq!(*observed.lock().unwrap(), Some(Some(Ok(()))));
    }

    #[test]
    fn test_panicking_observer_keeps_receiving() {
        let (producer, updates) = channel::new::<i32>(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        updates.make_handler(Arc::new(Immediate), move |event| {
            sink.lock().unwrap().push(event.clone());
            if event == Event::Update(1) {
                panic!("observer failed on first update");
            }
        });
        let (other_log, block) = collect();
        updates.make_handler(Arc::new(Immediate), block);
        assert!(panic::catch_unwind(AssertUnwindSafe(|| producer.push(1))).is_err());
        producer.push(2);
        producer.finish();
        let expected = vec![Event::Update(1), Event::Update(2), Event::Completion(Ok(()))];
        assert_eq!(*seen.lock().unwrap(), expected);
        assert_eq!(*other_log.lock().unwrap(), expected);
    }

    #[test]
    fn test_config_buffer_and_executor() {
        let manual = Arc::new(Manual::new());
        let config = Config::default()
            .with_executor(manual.clone())
            .with_channel_buffer_size(3);
        let (producer, updates) = channel::with_config::<&'static str>(&config);
        assert_eq!(updates.buffer_size(), 3);
        producer.push("a");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        updates.when_update(move |v| sink.lock().unwrap().push(v));
        producer.push("b");
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(manual.run_pending(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_release_pool_lives_until_end_of_stream() {
        let (producer, updates) = channel::new::<i32>(0);
        let resource = Arc::new(());
        updates.insert_to_release_pool(Box::new(resource.clone()));
        producer.push(1);
        assert_eq!(Arc::strong_count(&resource), 2);
        producer.finish();
        assert_eq!(Arc::strong_count(&resource), 1);
    }
}
