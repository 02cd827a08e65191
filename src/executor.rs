//! Places and policies for running continuations.
//!
//! Nothing in this crate spawns threads on its own. Every continuation is
//! handed to an [`Executor`], which runs it exactly once per `execute` call,
//! either right away or later according to its policy.
use std::{
    collections::VecDeque,
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{channel, Sender},
        Arc, Mutex, PoisonError,
    },
    thread,
};
use tracing::{error, warn};

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    /// Run `job` exactly once, now or later.
    fn execute(&self, job: Job);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }
}

/// Calls `dispatch` for every item even if some of the calls panic, then
/// resumes the first panic.
pub(crate) fn dispatch_each<I, F>(items: I, mut dispatch: F)
where
    I: IntoIterator,
    F: FnMut(I::Item),
{
    let mut panicked = None;
    for item in items {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| dispatch(item))) {
            panicked.get_or_insert(payload);
        }
    }
    if let Some(payload) = panicked {
        panic::resume_unwind(payload);
    }
}

/// Runs every job on the calling thread before `execute` returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Executor for Immediate {
    fn execute(&self, job: Job) {
        job()
    }
}

/// Queues jobs until someone calls [`Manual::run_pending`].
///
/// # Examples
///
/// ```
/// use future_core::{future_success, FutureExt, Manual};
/// use std::sync::Arc;
/// let manual = Arc::new(Manual::new());
/// future_success(1).on_complete(manual.clone(), |value| println!("{:?}", value));
/// assert_eq!(manual.pending(), 1);
/// assert_eq!(manual.run_pending(), 1);
/// ```
#[derive(Default)]
pub struct Manual {
    jobs: Mutex<VecDeque<Job>>,
}

impl Manual {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Runs queued jobs in FIFO order, including jobs queued by the jobs
    /// being run, until the queue is empty. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // the lock must not be held while a job runs, jobs may execute more jobs
            let job = self
                .jobs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Executor for Manual {
    fn execute(&self, job: Job) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
    }
}

/// A dedicated worker thread running jobs one after another in submission
/// order. The worker exits once the queue is dropped and drained.
pub struct SerialQueue {
    label: String,
    sender: Mutex<Sender<Job>>,
}

impl SerialQueue {
    pub fn new(label: impl Into<String>) -> io::Result<Self> {
        let label = label.into();
        let (tx, rx) = channel::<Job>();
        let worker_label = label.clone();
        thread::Builder::new().name(label.clone()).spawn(move || {
            for job in rx {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!(queue = %worker_label, "job panicked on serial queue");
                }
            }
        })?;
        Ok(SerialQueue {
            label,
            sender: Mutex::new(tx),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Executor for SerialQueue {
    fn execute(&self, job: Job) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.send(job).is_err() {
            warn!(queue = %self.label, "serial queue worker is gone, dropping job");
        }
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue").field("label", &self.label).finish()
    }
}
