//! Recycling allocator for fixed-size chunks.
//!
//! Connections check chunks out of the pool while they hold queued data and
//! return them once the data is drained. Returned chunks are kept on a free
//! list and handed out again, so a steady-state connection does not allocate.
//!
//! The pool is owned by the reactor and shared by every connection on it.
//! All methods take `&self`; state lives behind `Cell`/`RefCell`.
//!
//! Thread-safety: the pool is NOT thread-safe. It is confined to the reactor
//! thread.

use crate::buffer::{ChunkBuffer, DEFAULT_CHUNK_SIZE};
use std::cell::{Cell, RefCell};

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Chunks currently checked out.
    pub outstanding: usize,
    /// Chunks sitting on the free list.
    pub free: usize,
    /// Chunks allocated over the life of the pool.
    pub allocated: usize,
    /// Chunks dropped on release because the free list was full.
    pub discarded: usize,
    /// Highest `outstanding` value observed.
    pub peak_outstanding: usize,
}

/// A pool of fixed-size [`ChunkBuffer`]s.
#[derive(Debug)]
pub struct BufferPool {
    chunk_size: usize,
    /// Upper bound on retained free chunks. `None` keeps everything.
    max_free: Option<usize>,
    free_list: RefCell<Vec<ChunkBuffer>>,
    outstanding: Cell<usize>,
    allocated: Cell<usize>,
    discarded: Cell<usize>,
    peak_outstanding: Cell<usize>,
}

impl BufferPool {
    /// Create an empty pool handing out chunks of `chunk_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be positive");
        Self {
            chunk_size,
            max_free: None,
            free_list: RefCell::new(Vec::new()),
            outstanding: Cell::new(0),
            allocated: Cell::new(0),
            discarded: Cell::new(0),
            peak_outstanding: Cell::new(0),
        }
    }

    /// Create a pool with 4 KiB chunks and no preallocation.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }

    /// Create a pool and fill its free list with `count` chunks up front.
    pub fn with_preallocated(chunk_size: usize, count: usize) -> Self {
        let pool = Self::new(chunk_size);
        {
            let mut free = pool.free_list.borrow_mut();
            free.reserve(count);
            for _ in 0..count {
                free.push(ChunkBuffer::new(chunk_size));
            }
        }
        pool.allocated.set(count);
        pool
    }

    /// Cap the number of chunks retained on the free list.
    pub fn max_free(mut self, max_free: Option<usize>) -> Self {
        self.max_free = max_free;
        self
    }

    /// Capacity of every chunk this pool hands out.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Check out an empty chunk, reusing a free one when available.
    pub fn acquire(&self) -> ChunkBuffer {
        let buf = match self.free_list.borrow_mut().pop() {
            Some(buf) => buf,
            None => {
                self.allocated.set(self.allocated.get() + 1);
                ChunkBuffer::new(self.chunk_size)
            }
        };
        let outstanding = self.outstanding.get() + 1;
        self.outstanding.set(outstanding);
        if outstanding > self.peak_outstanding.get() {
            self.peak_outstanding.set(outstanding);
        }
        buf
    }

    /// Return a chunk to the pool. Its cursors are reset.
    ///
    /// # Panics
    ///
    /// Panics if the chunk was not sized by this pool.
    pub fn release(&self, mut buf: ChunkBuffer) {
        assert_eq!(
            buf.capacity(),
            self.chunk_size,
            "released chunk does not belong to this pool"
        );
        debug_assert!(self.outstanding.get() > 0, "release without acquire");
        self.outstanding.set(self.outstanding.get().saturating_sub(1));

        let mut free = self.free_list.borrow_mut();
        if self.max_free.is_some_and(|max| free.len() >= max) {
            self.discarded.set(self.discarded.get() + 1);
            return;
        }
        buf.reset();
        free.push(buf);
    }

    /// Chunks currently checked out.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding.get()
    }

    /// Chunks available for reuse.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_list.borrow().len()
    }

    /// Chunks allocated over the life of the pool.
    pub fn allocated(&self) -> usize {
        self.allocated.get()
    }

    pub fn peak_outstanding(&self) -> usize {
        self.peak_outstanding.get()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            outstanding: self.outstanding.get(),
            free: self.free_count(),
            allocated: self.allocated.get(),
            discarded: self.discarded.get(),
            peak_outstanding: self.peak_outstanding.get(),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::with_defaults()
    }
}
