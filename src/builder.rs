//! Reactor builder with fluent API.

use crate::buffer::DEFAULT_CHUNK_SIZE;
use crate::reactor::MioReactor;
use std::io;

/// Settings for a [`MioReactor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Capacity of every pooled chunk.
    pub chunk_size: usize,
    /// Chunks allocated into the pool up front.
    pub preallocate: usize,
    /// Upper bound on chunks retained for reuse. `None` keeps all of them.
    pub max_free: Option<usize>,
    /// Capacity of the mio event buffer per poll.
    pub events_capacity: usize,
    /// Set TCP_NODELAY on accepted and connected streams.
    pub tcp_nodelay: bool,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            preallocate: 0,
            max_free: None,
            events_capacity: 1024,
            tcp_nodelay: true,
        }
    }
}

/// Builder for creating a reactor with custom configuration.
///
/// # Example
///
/// ```
/// use chunkio::ReactorBuilder;
///
/// let reactor = ReactorBuilder::new()
///     .chunk_size(8 * 1024)
///     .preallocate(64)
///     .max_free(Some(256))
///     .build()?;
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReactorBuilder {
    config: ReactorConfig,
}

impl ReactorBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity of each pooled chunk.
    ///
    /// Default: 4KB
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the number of chunks allocated when the reactor is built.
    ///
    /// Default: 0
    pub fn preallocate(mut self, count: usize) -> Self {
        self.config.preallocate = count;
        self
    }

    /// Cap the number of free chunks the pool keeps around.
    pub fn max_free(mut self, max_free: Option<usize>) -> Self {
        self.config.max_free = max_free;
        self
    }

    /// Set the number of readiness events collected per poll.
    ///
    /// Default: 1024
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.config.events_capacity = capacity;
        self
    }

    /// Enable or disable TCP_NODELAY on new streams.
    ///
    /// Default: true
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.config.tcp_nodelay = enabled;
        self
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    /// Build the reactor.
    pub fn build(self) -> io::Result<MioReactor> {
        MioReactor::with_config(&self.config)
    }
}
