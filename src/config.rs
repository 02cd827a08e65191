use crate::{Executor, Immediate};
use std::sync::Arc;

/// Defaults handed to promises and channels at construction.
///
/// There is no process-wide default executor: whatever a future or channel
/// uses when no executor is given comes from the `Config` it was built with.
#[derive(Clone)]
pub struct Config {
    /// Executor used by `on_complete` / `on_update` registrations.
    pub executor: Arc<dyn Executor>,
    /// How many of the most recent updates a channel replays to a new observer.
    pub channel_buffer_size: usize,
}

impl Config {
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            executor: Arc::new(Immediate),
            channel_buffer_size: 0,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("channel_buffer_size", &self.channel_buffer_size)
            .finish_non_exhaustive()
    }
}
