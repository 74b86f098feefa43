//! Buffered, callback-driven TCP connection.
//!
//! A [`Connection`] owns one socket on a reactor and two FIFO queues of
//! pooled chunks: inbound bytes not yet consumed by the application and
//! outbound bytes not yet written to the network. At most one read and one
//! write are in flight at any time.
//!
//! The connection is a cheap handle over shared state. Every pending
//! operation captures a clone of the handle, so the state outlives all of its
//! completions even after the application has dropped its own handles.
//!
//! # Lifecycle
//!
//! ```text
//!  accept/connect ──► unstarted ──start()──► reading ◄──┐
//!                                              │        │ readable handler,
//!                                              │        │ re-arm
//!                                              ├────────┘
//!                       read/write error ──────┴──► closed handler (once)
//! ```

use crate::buffer::ChunkBuffer;
use crate::handler::HandlerSlot;
use crate::reactor::{IoCompletion, ReactorRef, not_connected};
use crate::types::SocketId;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};

/// Notification installed with the `set_*_handler` methods.
pub type Handler = dyn FnMut(&Connection);

/// Outcome of an accept or connect, installed on acceptors and connectors.
///
/// The connection must not be used when the status is an error.
pub type ConnectionHandler = dyn FnMut(io::Result<()>, Connection);

#[derive(Default)]
struct Queues {
    input: VecDeque<ChunkBuffer>,
    output: VecDeque<ChunkBuffer>,
    /// Sum of `len()` over `input`.
    input_len: usize,
    /// Sum of `len()` over `output`.
    output_len: usize,
}

struct Inner {
    reactor: ReactorRef,
    socket: Cell<Option<SocketId>>,
    recv_in_flight: Cell<bool>,
    send_in_flight: Cell<bool>,
    started: Cell<bool>,
    /// Set once a read or write failed; no further operations are issued.
    failed: Cell<bool>,
    queues: RefCell<Queues>,
    on_readable: HandlerSlot<Handler>,
    on_writable: HandlerSlot<Handler>,
    on_closed: HandlerSlot<Handler>,
}

/// Handle to a buffered connection. Clones share the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Rc<Inner>,
}

/// Non-owning handle to a [`Connection`].
///
/// Handlers that need to refer back to their own connection outside of the
/// callback argument should hold one of these to avoid a reference cycle.
#[derive(Clone)]
pub struct WeakConnection {
    inner: Weak<Inner>,
}

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}

impl Connection {
    /// Create a connection with no socket yet. Acceptors and connectors
    /// attach the socket once their operation completes.
    pub(crate) fn new(reactor: ReactorRef) -> Self {
        Self {
            inner: Rc::new(Inner {
                reactor,
                socket: Cell::new(None),
                recv_in_flight: Cell::new(false),
                send_in_flight: Cell::new(false),
                started: Cell::new(false),
                failed: Cell::new(false),
                queues: RefCell::new(Queues::default()),
                on_readable: HandlerSlot::new(),
                on_writable: HandlerSlot::new(),
                on_closed: HandlerSlot::new(),
            }),
        }
    }

    /// Wrap a socket already registered with `reactor`.
    pub fn from_socket(reactor: ReactorRef, socket: SocketId) -> Self {
        let conn = Self::new(reactor);
        conn.attach(socket);
        conn
    }

    /// Register a connected standard library stream and wrap it.
    pub fn from_std(reactor: ReactorRef, stream: std::net::TcpStream) -> io::Result<Self> {
        let socket = reactor.register_stream(stream)?;
        Ok(Self::from_socket(reactor, socket))
    }

    pub(crate) fn attach(&self, socket: SocketId) {
        debug_assert!(self.inner.socket.get().is_none(), "socket already attached");
        self.inner.socket.set(Some(socket));
    }

    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn reactor(&self) -> &ReactorRef {
        &self.inner.reactor
    }

    pub fn socket_id(&self) -> Option<SocketId> {
        self.inner.socket.get()
    }

    /// True while the socket has not been closed.
    pub fn is_open(&self) -> bool {
        self.inner.socket.get().is_some()
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.get()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let socket = self.inner.socket.get().ok_or_else(not_connected)?;
        self.inner.reactor.local_addr(socket)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        let socket = self.inner.socket.get().ok_or_else(not_connected)?;
        self.inner.reactor.peer_addr(socket)
    }

    /// Called after new bytes were appended to the input queue.
    pub fn set_read_handler(&self, handler: impl FnMut(&Connection) + 'static) {
        self.inner.on_readable.set(Box::new(handler));
    }

    /// Called after every completed write.
    pub fn set_write_handler(&self, handler: impl FnMut(&Connection) + 'static) {
        self.inner.on_writable.set(Box::new(handler));
    }

    /// Called once when a read or write fails. All handlers are dropped
    /// afterwards.
    pub fn set_close_handler(&self, handler: impl FnMut(&Connection) + 'static) {
        self.inner.on_closed.set(Box::new(handler));
    }

    /// Unread inbound bytes.
    pub fn input_len(&self) -> usize {
        self.inner.queues.borrow().input_len
    }

    /// Queued outbound bytes not yet handed to the network.
    pub fn output_len(&self) -> usize {
        self.inner.queues.borrow().output_len
    }

    /// Arm the read loop.
    pub fn start(&self) {
        self.inner.started.set(true);
        self.recv_from_net();
    }

    /// Copy the first `dst.len()` unread bytes into `dst` without consuming
    /// them.
    ///
    /// # Panics
    ///
    /// Panics if `dst` is longer than [`input_len`](Self::input_len).
    pub fn copy(&self, dst: &mut [u8]) {
        let queues = self.inner.queues.borrow();
        assert!(
            dst.len() <= queues.input_len,
            "copy of {} bytes exceeds input length {}",
            dst.len(),
            queues.input_len
        );
        let mut filled = 0;
        for buf in &queues.input {
            if filled == dst.len() {
                break;
            }
            filled += buf.peek_into(&mut dst[filled..]);
        }
    }

    /// Copy the first `dst.len()` unread bytes into `dst` and consume them.
    ///
    /// # Panics
    ///
    /// Panics if `dst` is longer than [`input_len`](Self::input_len).
    pub fn read(&self, dst: &mut [u8]) {
        self.copy(dst);
        self.consume(dst.len());
    }

    /// Discard the first `len` unread bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`input_len`](Self::input_len).
    pub fn consume(&self, len: usize) {
        let pool = self.inner.reactor.buffer_pool();
        let mut queues = self.inner.queues.borrow_mut();
        assert!(
            len <= queues.input_len,
            "consume of {} bytes exceeds input length {}",
            len,
            queues.input_len
        );
        queues.input_len -= len;

        let mut remaining = len;
        while remaining > 0 {
            let Some(front) = queues.input.front_mut() else {
                break;
            };
            let n = remaining.min(front.len());
            front.consume(n);
            remaining -= n;
            if front.is_empty() {
                if let Some(buf) = queues.input.pop_front() {
                    pool.release(buf);
                }
            }
        }
    }

    /// Append `src` to the output queue and start writing if idle.
    ///
    /// Spare room in the last queued chunk is filled before new chunks are
    /// taken from the pool.
    pub fn send(&self, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        {
            let pool = self.inner.reactor.buffer_pool();
            let mut queues = self.inner.queues.borrow_mut();
            let mut rest = src;
            if let Some(tail) = queues.output.back_mut() {
                let n = tail.put_slice(rest);
                rest = &rest[n..];
            }
            while !rest.is_empty() {
                let mut buf = pool.acquire();
                let n = buf.put_slice(rest);
                rest = &rest[n..];
                queues.output.push_back(buf);
            }
            queues.output_len += src.len();
        }
        self.send_to_net();
    }

    /// Shut down and close the socket. Does nothing if it is already closed.
    ///
    /// Pending operations complete with an error, which fires the closed
    /// handler.
    pub fn close(&self) {
        let Some(socket) = self.inner.socket.take() else {
            return;
        };
        let reactor = &self.inner.reactor;
        if let Err(e) = reactor.shutdown(socket) {
            if e.kind() == io::ErrorKind::NotConnected {
                debug!(%socket, error = %e, "shutdown on disconnected socket");
            } else {
                warn!(%socket, error = %e, "shutdown failed");
            }
        }
        if let Err(e) = reactor.close(socket) {
            debug!(%socket, error = %e, "close failed");
        }
        debug!(%socket, "connection closed");
    }

    fn recv_from_net(&self) {
        let inner = &self.inner;
        if inner.recv_in_flight.get() || inner.failed.get() {
            return;
        }

        let buf = inner.reactor.buffer_pool().acquire();
        inner.recv_in_flight.set(true);

        let conn = self.clone();
        let done: IoCompletion = Box::new(move |result, buf| conn.on_recv(result, buf));
        match inner.socket.get() {
            Some(socket) => inner.reactor.async_read_some(socket, buf, done),
            None => inner
                .reactor
                .post(Box::new(move || done(Err(not_connected()), buf))),
        }
    }

    fn on_recv(&self, result: io::Result<usize>, mut buf: ChunkBuffer) {
        let inner = &self.inner;
        inner.recv_in_flight.set(false);
        match result {
            Ok(n) => {
                buf.commit(n);
                trace!(socket = ?inner.socket.get(), bytes = n, "received");
                self.enqueue_input(buf);
                inner.on_readable.invoke(|handler| handler(self));
                self.recv_from_net();
            }
            Err(e) => {
                inner.reactor.buffer_pool().release(buf);
                self.fail("read", e);
            }
        }
    }

    /// Append freshly read bytes to the input queue. Spare room in the tail
    /// chunk is filled first so small reads do not each pin a whole chunk.
    ///
    /// Cost: every read lands in its own pooled chunk, so while a read is in
    /// flight the connection holds one chunk beyond its queued data, and
    /// bytes that fit the tail are copied a second time here.
    fn enqueue_input(&self, mut buf: ChunkBuffer) {
        let pool = self.inner.reactor.buffer_pool();
        let mut queues = self.inner.queues.borrow_mut();
        queues.input_len += buf.len();
        if let Some(tail) = queues.input.back_mut()
            && tail.space() > 0
        {
            let n = tail.put_slice(buf.readable());
            buf.consume(n);
        }
        if buf.is_empty() {
            pool.release(buf);
        } else {
            queues.input.push_back(buf);
        }
    }

    fn send_to_net(&self) {
        let inner = &self.inner;
        if inner.send_in_flight.get() || inner.failed.get() {
            return;
        }
        let buf = {
            let mut queues = inner.queues.borrow_mut();
            let Some(buf) = queues.output.pop_front() else {
                return;
            };
            queues.output_len -= buf.len();
            buf
        };
        inner.send_in_flight.set(true);

        let conn = self.clone();
        let done: IoCompletion = Box::new(move |result, buf| conn.on_send(result, buf));
        match inner.socket.get() {
            Some(socket) => inner.reactor.async_write_some(socket, buf, done),
            None => inner
                .reactor
                .post(Box::new(move || done(Err(not_connected()), buf))),
        }
    }

    fn on_send(&self, result: io::Result<usize>, mut buf: ChunkBuffer) {
        let inner = &self.inner;
        inner.send_in_flight.set(false);
        match result {
            Ok(n) => {
                buf.consume(n);
                trace!(socket = ?inner.socket.get(), bytes = n, "sent");
                if buf.is_empty() {
                    inner.reactor.buffer_pool().release(buf);
                } else {
                    // Partial write: the remainder goes out next.
                    let mut queues = inner.queues.borrow_mut();
                    queues.output_len += buf.len();
                    queues.output.push_front(buf);
                }
                inner.on_writable.invoke(|handler| handler(self));
                self.send_to_net();
            }
            Err(e) => {
                inner.reactor.buffer_pool().release(buf);
                self.fail("write", e);
            }
        }
    }

    /// Terminal failure of a read or write. The closed handler runs at most
    /// once per connection.
    fn fail(&self, op: &'static str, error: io::Error) {
        let inner = &self.inner;
        if inner.failed.replace(true) {
            return;
        }
        debug!(socket = ?inner.socket.get(), op, error = %error, "connection failed");
        self.close();

        drop(inner.on_readable.clear());
        drop(inner.on_writable.clear());
        inner.on_closed.invoke(|handler| handler(self));
        drop(inner.on_closed.clear());
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queues = self.inner.queues.borrow();
        f.debug_struct("Connection")
            .field("socket", &self.inner.socket.get())
            .field("started", &self.inner.started.get())
            .field("input_len", &queues.input_len)
            .field("output_len", &queues.output_len)
            .field("recv_in_flight", &self.inner.recv_in_flight.get())
            .field("send_in_flight", &self.inner.send_in_flight.get())
            .finish()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let pool = self.reactor.buffer_pool();
        let queues = self.queues.get_mut();
        for buf in queues.input.drain(..).chain(queues.output.drain(..)) {
            pool.release(buf);
        }
        queues.input_len = 0;
        queues.output_len = 0;

        if let Some(socket) = self.socket.take() {
            if let Err(e) = self.reactor.close(socket) {
                debug!(%socket, error = %e, "close on drop failed");
            }
        }
    }
}
