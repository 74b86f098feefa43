//! chunkio - buffered, callback-driven TCP connections on a single-threaded
//! reactor.
//!
//! The crate turns a non-blocking socket into a [`Connection`] with an input
//! and an output queue of pooled fixed-size chunks, and provides the two ways
//! of obtaining one: an [`Acceptor`] loop and a one-shot [`Connector`].
//!
//! # Features
//!
//! - **Chunked buffering**: bytes live in fixed-capacity [`ChunkBuffer`]s
//!   recycled through a per-reactor [`BufferPool`]
//! - **Strict ordering**: chunk boundaries are invisible; bytes are delivered
//!   and written in FIFO order
//! - **One operation per direction**: at most one read and one write in
//!   flight per connection
//! - **Deferred release**: pending operations keep their connection alive
//! - **Pluggable reactor**: everything runs against the [`Reactor`] trait;
//!   [`MioReactor`] is the epoll/kqueue implementation
//!
//! # Quick Start
//!
//! ```no_run
//! use chunkio::{Connector, MioReactor, ReactorRef};
//! use std::rc::Rc;
//!
//! let reactor = Rc::new(MioReactor::new()?);
//! let handle: ReactorRef = reactor.clone();
//!
//! let connector = Connector::new(handle);
//! connector.init_address("127.0.0.1", 7878);
//! connector.set_conn_handler(|status, conn| {
//!     if let Err(e) = status {
//!         eprintln!("connect failed: {e}");
//!         return;
//!     }
//!     conn.set_read_handler(|conn| {
//!         let mut reply = vec![0u8; conn.input_len()];
//!         conn.read(&mut reply);
//!         println!("{}", String::from_utf8_lossy(&reply));
//!     });
//!     conn.set_close_handler(|_| println!("closed"));
//!     conn.start();
//!     conn.send(b"hello");
//! });
//! connector.connect();
//!
//! reactor.run()?;
//! # Ok::<(), std::io::Error>(())
//! ```

mod acceptor;
mod buffer;
mod buffer_pool;
mod builder;
mod connection;
mod connector;
mod error;
mod handler;
mod types;

pub mod config;
pub mod logging;
pub mod reactor;

// Re-exports
pub use acceptor::{Acceptor, DEFAULT_BACKLOG};
pub use buffer::{ChunkBuffer, DEFAULT_CHUNK_SIZE};
pub use buffer_pool::{BufferPool, PoolStats};
pub use builder::{ReactorBuilder, ReactorConfig};
pub use connection::{Connection, ConnectionHandler, Handler, WeakConnection};
pub use connector::Connector;
pub use error::{Error, Result};
pub use reactor::{
    AcceptCompletion, ConnectCompletion, IoCompletion, MioReactor, Reactor, ReactorRef, Task,
};
pub use types::{ListenerId, SocketId};
