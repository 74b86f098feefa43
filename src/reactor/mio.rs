//! Mio-based reactor using epoll/kqueue.
//!
//! Readiness from mio is edge-triggered, so each socket caches a readable and
//! a writable flag. An operation is attempted immediately when its flag is
//! set and otherwise parked until the next readiness event for that socket.
//! Finished operations are queued and their completions dispatched in FIFO
//! order once the socket state is no longer borrowed.

use super::{
    AcceptCompletion, ConnectCompletion, IoCompletion, Reactor, Task, aborted, busy,
    not_connected,
};
use crate::buffer::ChunkBuffer;
use crate::buffer_pool::BufferPool;
use crate::builder::{ReactorBuilder, ReactorConfig};
use crate::types::{ListenerId, SocketId};
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Token offset for listeners to avoid collision with streams.
const LISTENER_TOKEN_OFFSET: usize = 1 << 30;

struct PendingIo {
    buf: ChunkBuffer,
    done: IoCompletion,
}

/// Stream state for the mio reactor.
struct SocketEntry {
    stream: MioTcpStream,
    /// Generation counter to detect stale SocketIds after slot reuse.
    generation: u32,
    readable: bool,
    writable: bool,
    /// Set while an outbound connect has not resolved.
    connecting: Option<ConnectCompletion>,
    read: Option<PendingIo>,
    write: Option<PendingIo>,
}

struct ListenerEntry {
    listener: MioTcpListener,
    generation: u32,
    readable: bool,
    accept: Option<AcceptCompletion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Read,
    Write,
    Connect,
    Accept,
}

/// A parked operation whose socket was reported ready.
#[derive(Debug, Clone, Copy)]
struct Attempt {
    kind: OpKind,
    slot: usize,
    generation: u32,
}

struct Inner {
    poll: Poll,
    events: Events,
    sockets: Slab<SocketEntry>,
    listeners: Slab<ListenerEntry>,
    next_generation: u32,
    attempts: VecDeque<Attempt>,
    tcp_nodelay: bool,
}

/// Single-threaded reactor driving streams and listeners through mio.
///
/// Share it as an `Rc<MioReactor>` and hand clones to connections as a
/// [`ReactorRef`](super::ReactorRef); drive it from the owning thread with
/// [`poll_once`](Self::poll_once) or [`run`](Self::run).
///
/// ```no_run
/// use chunkio::{MioReactor, ReactorRef};
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// let reactor = Rc::new(MioReactor::new()?);
/// let handle: ReactorRef = reactor.clone();
/// // ... create acceptors and connectors with `handle` ...
/// # let _ = handle;
/// reactor.poll_once(Some(Duration::from_millis(100)))?;
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct MioReactor {
    inner: RefCell<Inner>,
    ready: RefCell<VecDeque<Task>>,
    pool: BufferPool,
    stopped: Cell<bool>,
}

impl MioReactor {
    /// Create a reactor with default settings.
    pub fn new() -> io::Result<Self> {
        Self::with_config(&ReactorConfig::default())
    }

    /// Start building a reactor with custom settings.
    pub fn builder() -> ReactorBuilder {
        ReactorBuilder::new()
    }

    pub fn with_config(config: &ReactorConfig) -> io::Result<Self> {
        if config.chunk_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk_size must be positive",
            ));
        }
        let pool = BufferPool::with_preallocated(config.chunk_size, config.preallocate)
            .max_free(config.max_free);
        Ok(Self {
            inner: RefCell::new(Inner {
                poll: Poll::new()?,
                events: Events::with_capacity(config.events_capacity.max(1)),
                sockets: Slab::with_capacity(64),
                listeners: Slab::with_capacity(4),
                next_generation: 0,
                attempts: VecDeque::new(),
                tcp_nodelay: config.tcp_nodelay,
            }),
            ready: RefCell::new(VecDeque::with_capacity(256)),
            pool,
            stopped: Cell::new(false),
        })
    }

    /// Poll for readiness once, perform every operation that became ready and
    /// dispatch the resulting completions.
    ///
    /// Blocks for at most `timeout` (forever with `None`), or not at all when
    /// completions are already waiting. Returns the number of completions
    /// dispatched.
    pub fn poll_once(&self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout = if self.has_ready_work() {
            Some(Duration::ZERO)
        } else {
            timeout
        };

        {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            match inner.poll.poll(&mut inner.events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }

            // Collect event info first to avoid borrow issues
            let events: Vec<_> = inner
                .events
                .iter()
                .map(|e| {
                    (
                        e.token().0,
                        e.is_readable(),
                        e.is_writable(),
                        e.is_read_closed() || e.is_write_closed() || e.is_error(),
                    )
                })
                .collect();

            for (token, readable, writable, closed) in events {
                inner.mark_ready(token, readable, writable, closed);
            }

            let mut ready = self.ready.borrow_mut();
            inner.process_attempts(&mut ready);
        }

        Ok(self.dispatch())
    }

    /// Drive the reactor until [`stop`](Self::stop) is called or nothing is
    /// left to wait for.
    pub fn run(&self) -> io::Result<()> {
        while !self.stopped.get() && self.has_pending_work() {
            self.poll_once(None)?;
        }
        self.stopped.set(false);
        Ok(())
    }

    /// Ask [`run`](Self::run) to return after the current turn.
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    /// True if any operation is outstanding or any completion is queued.
    pub fn has_pending_work(&self) -> bool {
        if self.has_ready_work() {
            return true;
        }
        let inner = self.inner.borrow();
        inner
            .sockets
            .iter()
            .any(|(_, s)| s.read.is_some() || s.write.is_some() || s.connecting.is_some())
            || inner.listeners.iter().any(|(_, l)| l.accept.is_some())
    }

    pub fn socket_count(&self) -> usize {
        self.inner.borrow().sockets.len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    /// Close every socket and listener and deliver the aborted completions.
    ///
    /// Pending completions hold their connections, which hold the reactor, so
    /// this is how a reactor with outstanding operations is torn down.
    pub fn close_all(&self) {
        let (sockets, listeners): (Vec<_>, Vec<_>) = {
            let inner = self.inner.borrow();
            (
                inner
                    .sockets
                    .iter()
                    .map(|(slot, s)| SocketId::with_generation(slot, s.generation))
                    .collect(),
                inner
                    .listeners
                    .iter()
                    .map(|(slot, l)| ListenerId::with_generation(slot, l.generation))
                    .collect(),
            )
        };
        for id in sockets {
            let _ = Reactor::close(self, id);
        }
        for id in listeners {
            let _ = self.close_listener(id);
        }
        while !self.ready.borrow().is_empty() {
            self.dispatch();
        }
    }

    fn has_ready_work(&self) -> bool {
        !self.ready.borrow().is_empty() || !self.inner.borrow().attempts.is_empty()
    }

    /// Run the completions queued before this call. Completions queued while
    /// dispatching wait for the next turn.
    fn dispatch(&self) -> usize {
        let queued = self.ready.borrow().len();
        let mut count = 0;
        for _ in 0..queued {
            let task = self.ready.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    fn defer(&self, task: Task) {
        self.ready.borrow_mut().push_back(task);
    }

    fn next_generation(inner: &mut Inner) -> u32 {
        let generation = inner.next_generation;
        inner.next_generation = inner.next_generation.wrapping_add(1);
        generation
    }
}

impl Inner {
    fn socket_mut(&mut self, id: SocketId) -> Option<&mut SocketEntry> {
        self.sockets
            .get_mut(id.slot())
            .filter(|s| s.generation == id.generation())
    }

    fn socket(&self, id: SocketId) -> Option<&SocketEntry> {
        self.sockets
            .get(id.slot())
            .filter(|s| s.generation == id.generation())
    }

    fn listener(&self, id: ListenerId) -> Option<&ListenerEntry> {
        self.listeners
            .get(id.slot())
            .filter(|l| l.generation == id.generation())
    }

    fn insert_stream(&mut self, mut stream: MioTcpStream, connecting: bool) -> io::Result<SocketId> {
        let generation = MioReactor::next_generation(self);
        let slot = self.sockets.vacant_key();

        self.poll.registry().register(
            &mut stream,
            Token(slot),
            Interest::READABLE | Interest::WRITABLE,
        )?;

        // Data may already be waiting on adopted streams, so start optimistic.
        // A pending connect must wait for its first writable event.
        self.sockets.insert(SocketEntry {
            stream,
            generation,
            readable: !connecting,
            writable: !connecting,
            connecting: None,
            read: None,
            write: None,
        });
        Ok(SocketId::with_generation(slot, generation))
    }

    fn mark_ready(&mut self, token: usize, readable: bool, writable: bool, closed: bool) {
        if token >= LISTENER_TOKEN_OFFSET {
            let slot = token - LISTENER_TOKEN_OFFSET;
            if let Some(listener) = self.listeners.get_mut(slot) {
                listener.readable = true;
                if listener.accept.is_some() {
                    self.attempts.push_back(Attempt {
                        kind: OpKind::Accept,
                        slot,
                        generation: listener.generation,
                    });
                }
            }
            return;
        }

        let Some(sock) = self.sockets.get_mut(token) else {
            return;
        };
        let generation = sock.generation;

        if sock.connecting.is_some() {
            self.attempts.push_back(Attempt {
                kind: OpKind::Connect,
                slot: token,
                generation,
            });
            return;
        }

        // Hangups and errors surface through the next read or write attempt.
        if readable || closed {
            sock.readable = true;
            if sock.read.is_some() {
                self.attempts.push_back(Attempt {
                    kind: OpKind::Read,
                    slot: token,
                    generation,
                });
            }
        }
        if writable || closed {
            sock.writable = true;
            if sock.write.is_some() {
                self.attempts.push_back(Attempt {
                    kind: OpKind::Write,
                    slot: token,
                    generation,
                });
            }
        }
    }

    /// Drop queued retries for a socket or listener that is going away.
    fn forget_attempts(&mut self, slot: usize, generation: u32, listener: bool) {
        self.attempts.retain(|a| {
            (a.kind == OpKind::Accept) != listener || a.slot != slot || a.generation != generation
        });
    }

    fn process_attempts(&mut self, ready: &mut VecDeque<Task>) {
        let attempts = std::mem::take(&mut self.attempts);
        for attempt in attempts {
            match attempt.kind {
                OpKind::Read => self.try_read(attempt, ready),
                OpKind::Write => self.try_write(attempt, ready),
                OpKind::Connect => self.try_connect(attempt, ready),
                OpKind::Accept => self.try_accept(attempt, ready),
            }
        }
    }

    fn try_read(&mut self, attempt: Attempt, ready: &mut VecDeque<Task>) {
        let Some(sock) = self.sockets.get_mut(attempt.slot) else {
            return;
        };
        if sock.generation != attempt.generation || !sock.readable {
            return;
        }
        let Some(mut op) = sock.read.take() else {
            return;
        };

        let result = loop {
            match sock.stream.read(op.buf.writable_mut()) {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(n) => break Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    sock.readable = false;
                    sock.read = Some(op);
                    return;
                }
                Err(e) => break Err(e),
            }
        };

        trace!(slot = attempt.slot, result = ?result, "read completed");
        let PendingIo { buf, done } = op;
        ready.push_back(Box::new(move || done(result, buf)));
    }

    fn try_write(&mut self, attempt: Attempt, ready: &mut VecDeque<Task>) {
        let Some(sock) = self.sockets.get_mut(attempt.slot) else {
            return;
        };
        if sock.generation != attempt.generation || !sock.writable {
            return;
        }
        let Some(op) = sock.write.take() else {
            return;
        };

        let result = loop {
            match sock.stream.write(op.buf.readable()) {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => break Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    sock.writable = false;
                    sock.write = Some(op);
                    return;
                }
                Err(e) => break Err(e),
            }
        };

        trace!(slot = attempt.slot, result = ?result, "write completed");
        let PendingIo { buf, done } = op;
        ready.push_back(Box::new(move || done(result, buf)));
    }

    fn try_connect(&mut self, attempt: Attempt, ready: &mut VecDeque<Task>) {
        let Some(sock) = self.sockets.get_mut(attempt.slot) else {
            return;
        };
        if sock.generation != attempt.generation || sock.connecting.is_none() {
            return;
        }

        let outcome = match sock.stream.take_error() {
            Ok(Some(e)) | Err(e) => Err(e),
            Ok(None) => match sock.stream.peer_addr() {
                Ok(_) => Ok(()),
                // Still in progress; wait for the next event.
                Err(e) if e.kind() == io::ErrorKind::NotConnected => return,
                Err(e) => Err(e),
            },
        };

        let Some(done) = sock.connecting.take() else {
            return;
        };
        match outcome {
            Ok(()) => {
                if self.tcp_nodelay {
                    let _ = sock.stream.set_nodelay(true);
                }
                sock.readable = true;
                sock.writable = true;
                let id = SocketId::with_generation(attempt.slot, attempt.generation);
                debug!(socket = %id, "connected");
                ready.push_back(Box::new(move || done(Ok(id))));
            }
            Err(e) => {
                debug!(slot = attempt.slot, error = %e, "connect failed");
                let mut entry = self.sockets.remove(attempt.slot);
                let _ = self.poll.registry().deregister(&mut entry.stream);
                ready.push_back(Box::new(move || done(Err(e))));
            }
        }
    }

    fn try_accept(&mut self, attempt: Attempt, ready: &mut VecDeque<Task>) {
        let accepted = {
            let Some(listener) = self.listeners.get_mut(attempt.slot) else {
                return;
            };
            if listener.generation != attempt.generation || !listener.readable {
                return;
            }
            if listener.accept.is_none() {
                return;
            }
            loop {
                match listener.listener.accept() {
                    Ok(pair) => break Ok(pair),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        listener.readable = false;
                        return;
                    }
                    Err(e) => break Err(e),
                }
            }
        };

        let result = match accepted {
            Ok((stream, addr)) => {
                if self.tcp_nodelay {
                    let _ = stream.set_nodelay(true);
                }
                match self.insert_stream(stream, false) {
                    Ok(id) => {
                        debug!(socket = %id, peer = %addr, "accepted");
                        Ok(id)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                warn!(slot = attempt.slot, error = %e, "accept failed");
                Err(e)
            }
        };

        if let Some(done) = self
            .listeners
            .get_mut(attempt.slot)
            .and_then(|l| l.accept.take())
        {
            ready.push_back(Box::new(move || done(result)));
        }
    }
}

impl Reactor for MioReactor {
    fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    fn register_listener(&self, listener: std::net::TcpListener) -> io::Result<ListenerId> {
        listener.set_nonblocking(true)?;
        let mut listener = MioTcpListener::from_std(listener);

        let mut inner = self.inner.borrow_mut();
        let generation = MioReactor::next_generation(&mut inner);
        let slot = inner.listeners.vacant_key();
        inner.poll.registry().register(
            &mut listener,
            Token(slot + LISTENER_TOKEN_OFFSET),
            Interest::READABLE,
        )?;
        inner.listeners.insert(ListenerEntry {
            listener,
            generation,
            // Connections may be queued before registration.
            readable: true,
            accept: None,
        });
        Ok(ListenerId::with_generation(slot, generation))
    }

    fn register_stream(&self, stream: std::net::TcpStream) -> io::Result<SocketId> {
        stream.set_nonblocking(true)?;
        let stream = MioTcpStream::from_std(stream);
        let mut inner = self.inner.borrow_mut();
        if inner.tcp_nodelay {
            let _ = stream.set_nodelay(true);
        }
        inner.insert_stream(stream, false)
    }

    fn async_accept(&self, listener: ListenerId, done: AcceptCompletion) {
        let mut inner = self.inner.borrow_mut();
        let Some(entry) = inner
            .listeners
            .get_mut(listener.slot())
            .filter(|l| l.generation == listener.generation())
        else {
            drop(inner);
            return self.defer(Box::new(move || done(Err(not_connected()))));
        };
        if entry.accept.is_some() {
            drop(inner);
            return self.defer(Box::new(move || done(Err(busy()))));
        }
        entry.accept = Some(done);
        if entry.readable {
            inner.attempts.push_back(Attempt {
                kind: OpKind::Accept,
                slot: listener.slot(),
                generation: listener.generation(),
            });
        }
    }

    fn async_connect(&self, addr: SocketAddr, done: ConnectCompletion) {
        let stream = match MioTcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(e) => {
                debug!(%addr, error = %e, "connect failed");
                return self.defer(Box::new(move || done(Err(e))));
            }
        };

        let mut inner = self.inner.borrow_mut();
        match inner.insert_stream(stream, true) {
            Ok(id) => {
                inner.sockets[id.slot()].connecting = Some(done);
                trace!(socket = %id, %addr, "connect issued");
            }
            Err(e) => {
                drop(inner);
                self.defer(Box::new(move || done(Err(e))));
            }
        }
    }

    fn async_read_some(&self, socket: SocketId, buf: ChunkBuffer, done: IoCompletion) {
        let mut inner = self.inner.borrow_mut();
        let Some(sock) = inner.socket_mut(socket) else {
            drop(inner);
            return self.defer(Box::new(move || done(Err(not_connected()), buf)));
        };
        if sock.read.is_some() || sock.connecting.is_some() {
            drop(inner);
            return self.defer(Box::new(move || done(Err(busy()), buf)));
        }
        if buf.space() == 0 {
            drop(inner);
            return self.defer(Box::new(move || done(Ok(0), buf)));
        }
        let readable = sock.readable;
        sock.read = Some(PendingIo { buf, done });
        if readable {
            inner.attempts.push_back(Attempt {
                kind: OpKind::Read,
                slot: socket.slot(),
                generation: socket.generation(),
            });
        }
    }

    fn async_write_some(&self, socket: SocketId, buf: ChunkBuffer, done: IoCompletion) {
        let mut inner = self.inner.borrow_mut();
        let Some(sock) = inner.socket_mut(socket) else {
            drop(inner);
            return self.defer(Box::new(move || done(Err(not_connected()), buf)));
        };
        if sock.write.is_some() || sock.connecting.is_some() {
            drop(inner);
            return self.defer(Box::new(move || done(Err(busy()), buf)));
        }
        if buf.is_empty() {
            drop(inner);
            return self.defer(Box::new(move || done(Ok(0), buf)));
        }
        let writable = sock.writable;
        sock.write = Some(PendingIo { buf, done });
        if writable {
            inner.attempts.push_back(Attempt {
                kind: OpKind::Write,
                slot: socket.slot(),
                generation: socket.generation(),
            });
        }
    }

    fn shutdown(&self, socket: SocketId) -> io::Result<()> {
        let inner = self.inner.borrow();
        let sock = inner.socket(socket).ok_or_else(not_connected)?;
        sock.stream.shutdown(Shutdown::Both)
    }

    fn close(&self, socket: SocketId) -> io::Result<()> {
        let (mut entry, result) = {
            let mut inner = self.inner.borrow_mut();
            if inner.socket(socket).is_none() {
                return Err(not_connected());
            }
            let mut entry = inner.sockets.remove(socket.slot());
            inner.forget_attempts(socket.slot(), socket.generation(), false);
            let result = inner.poll.registry().deregister(&mut entry.stream);
            (entry, result)
        };
        debug!(socket = %socket, "closed");

        if let Some(PendingIo { buf, done }) = entry.read.take() {
            self.defer(Box::new(move || done(Err(aborted()), buf)));
        }
        if let Some(PendingIo { buf, done }) = entry.write.take() {
            self.defer(Box::new(move || done(Err(aborted()), buf)));
        }
        if let Some(done) = entry.connecting.take() {
            self.defer(Box::new(move || done(Err(aborted()))));
        }
        result
    }

    fn close_listener(&self, listener: ListenerId) -> io::Result<()> {
        let (mut entry, result) = {
            let mut inner = self.inner.borrow_mut();
            if inner.listener(listener).is_none() {
                return Err(not_connected());
            }
            let mut entry = inner.listeners.remove(listener.slot());
            inner.forget_attempts(listener.slot(), listener.generation(), true);
            let result = inner.poll.registry().deregister(&mut entry.listener);
            (entry, result)
        };
        debug!(listener = %listener, "listener closed");

        if let Some(done) = entry.accept.take() {
            self.defer(Box::new(move || done(Err(aborted()))));
        }
        result
    }

    fn local_addr(&self, socket: SocketId) -> io::Result<SocketAddr> {
        let inner = self.inner.borrow();
        inner
            .socket(socket)
            .ok_or_else(not_connected)?
            .stream
            .local_addr()
    }

    fn peer_addr(&self, socket: SocketId) -> io::Result<SocketAddr> {
        let inner = self.inner.borrow();
        inner
            .socket(socket)
            .ok_or_else(not_connected)?
            .stream
            .peer_addr()
    }

    fn listener_addr(&self, listener: ListenerId) -> io::Result<SocketAddr> {
        let inner = self.inner.borrow();
        inner
            .listener(listener)
            .ok_or_else(not_connected)?
            .listener
            .local_addr()
    }

    fn post(&self, task: Task) {
        self.defer(task);
    }
}
