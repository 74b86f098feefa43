//! Completion-based reactor abstraction.
//!
//! Connections, acceptors and connectors never touch sockets directly. They
//! issue asynchronous operations against a [`Reactor`] and resume from the
//! completion callbacks it dispatches. Every method takes `&self` so that a
//! completion may issue further operations on the same reactor.
//!
//! Completion rules every implementation follows:
//!
//! 1. A completion never runs inside the call that issued it. It runs on a
//!    later dispatch turn of the reactor thread.
//! 2. Each issued operation completes exactly once.
//! 3. Closing a socket or listener completes its pending operations with
//!    [`ErrorKind::ConnectionAborted`](std::io::ErrorKind::ConnectionAborted).
//! 4. An operation on an unknown or closed socket completes with
//!    `NotConnected`. A second operation of the same kind on a socket while
//!    one is pending completes with `WouldBlock`.

mod mio;

pub use self::mio::MioReactor;

use crate::buffer::ChunkBuffer;
use crate::buffer_pool::BufferPool;
use crate::types::{ListenerId, SocketId};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

/// Completion of a read or write: the byte count transferred and the buffer
/// that was moved into the operation. Cursors are left untouched.
pub type IoCompletion = Box<dyn FnOnce(io::Result<usize>, ChunkBuffer)>;

/// Completion of an accept: the newly registered stream.
pub type AcceptCompletion = Box<dyn FnOnce(io::Result<SocketId>)>;

/// Completion of an outbound connect: the connected, registered stream.
pub type ConnectCompletion = Box<dyn FnOnce(io::Result<SocketId>)>;

/// Deferred unit of work run on the next dispatch turn.
pub type Task = Box<dyn FnOnce()>;

/// Shared handle to a reactor.
pub type ReactorRef = Rc<dyn Reactor>;

/// The asynchronous I/O facility the transport runs on.
pub trait Reactor {
    /// Pool every connection on this reactor acquires chunks from.
    fn buffer_pool(&self) -> &BufferPool;

    /// Adopt a bound, listening socket.
    fn register_listener(&self, listener: std::net::TcpListener) -> io::Result<ListenerId>;

    /// Adopt an already connected stream.
    fn register_stream(&self, stream: std::net::TcpStream) -> io::Result<SocketId>;

    /// Accept one inbound connection.
    fn async_accept(&self, listener: ListenerId, done: AcceptCompletion);

    /// Open an outbound connection to `addr`.
    fn async_connect(&self, addr: SocketAddr, done: ConnectCompletion);

    /// Read into the writable region of `buf`. End of stream is reported as
    /// `UnexpectedEof`.
    fn async_read_some(&self, socket: SocketId, buf: ChunkBuffer, done: IoCompletion);

    /// Write from the unread region of `buf`. A short count is a partial
    /// write, not an error.
    fn async_write_some(&self, socket: SocketId, buf: ChunkBuffer, done: IoCompletion);

    /// Shut down both directions of a stream.
    fn shutdown(&self, socket: SocketId) -> io::Result<()>;

    /// Close a stream, aborting its pending operations.
    fn close(&self, socket: SocketId) -> io::Result<()>;

    /// Close a listener, aborting its pending accept.
    fn close_listener(&self, listener: ListenerId) -> io::Result<()>;

    fn local_addr(&self, socket: SocketId) -> io::Result<SocketAddr>;

    fn peer_addr(&self, socket: SocketId) -> io::Result<SocketAddr>;

    fn listener_addr(&self, listener: ListenerId) -> io::Result<SocketAddr>;

    /// Queue `task` to run on the next dispatch turn.
    fn post(&self, task: Task);
}

pub(crate) fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is not open")
}

pub(crate) fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "operation aborted by close")
}

pub(crate) fn busy() -> io::Error {
    io::Error::new(
        io::ErrorKind::WouldBlock,
        "an operation of this kind is already pending",
    )
}
