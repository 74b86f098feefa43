//! Scripted in-memory reactor for driving connections deterministically.
//!
//! Operations issued against the reactor are recorded, never performed. The
//! test decides when and how each one completes. Issuing a second read,
//! write or accept while one is pending panics, so any double issue by the
//! code under test fails loudly.

#![allow(dead_code)]

use chunkio::{
    AcceptCompletion, BufferPool, ChunkBuffer, ConnectCompletion, IoCompletion, ListenerId,
    Reactor, ReactorRef, SocketId, Task,
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

#[derive(Default)]
struct State {
    next_id: usize,
    sockets: HashSet<SocketId>,
    listeners: HashSet<ListenerId>,
    reads: HashMap<SocketId, (ChunkBuffer, IoCompletion)>,
    writes: HashMap<SocketId, (ChunkBuffer, IoCompletion)>,
    accepts: HashMap<ListenerId, AcceptCompletion>,
    connects: VecDeque<(SocketAddr, ConnectCompletion)>,
    shutdowns: HashMap<SocketId, usize>,
    closes: HashMap<SocketId, usize>,
    reads_issued: usize,
    writes_issued: usize,
    accepts_issued: usize,
}

pub struct ScriptedReactor {
    pool: BufferPool,
    state: RefCell<State>,
    posted: RefCell<VecDeque<Task>>,
}

impl ScriptedReactor {
    pub fn new(chunk_size: usize) -> Rc<Self> {
        Rc::new(Self {
            pool: BufferPool::new(chunk_size),
            state: RefCell::new(State::default()),
            posted: RefCell::new(VecDeque::new()),
        })
    }

    pub fn handle(self: &Rc<Self>) -> ReactorRef {
        self.clone()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Register a fresh socket and return its id.
    pub fn open_socket(&self) -> SocketId {
        let mut state = self.state.borrow_mut();
        let id = SocketId::new(state.next_id);
        state.next_id += 1;
        state.sockets.insert(id);
        id
    }

    pub fn is_open(&self, socket: SocketId) -> bool {
        self.state.borrow().sockets.contains(&socket)
    }

    /// Listeners currently registered, oldest first.
    pub fn listeners(&self) -> Vec<ListenerId> {
        let mut ids: Vec<_> = self.state.borrow().listeners.iter().copied().collect();
        ids.sort_by_key(|id| id.slot());
        ids
    }

    pub fn has_pending_read(&self, socket: SocketId) -> bool {
        self.state.borrow().reads.contains_key(&socket)
    }

    pub fn has_pending_write(&self, socket: SocketId) -> bool {
        self.state.borrow().writes.contains_key(&socket)
    }

    pub fn has_pending_accept(&self, listener: ListenerId) -> bool {
        self.state.borrow().accepts.contains_key(&listener)
    }

    pub fn pending_connects(&self) -> usize {
        self.state.borrow().connects.len()
    }

    pub fn reads_issued(&self) -> usize {
        self.state.borrow().reads_issued
    }

    pub fn writes_issued(&self) -> usize {
        self.state.borrow().writes_issued
    }

    pub fn accepts_issued(&self) -> usize {
        self.state.borrow().accepts_issued
    }

    pub fn shutdown_count(&self, socket: SocketId) -> usize {
        self.state.borrow().shutdowns.get(&socket).copied().unwrap_or(0)
    }

    pub fn close_count(&self, socket: SocketId) -> usize {
        self.state.borrow().closes.get(&socket).copied().unwrap_or(0)
    }

    /// Writable room in the buffer of the pending read.
    pub fn pending_read_space(&self, socket: SocketId) -> usize {
        let state = self.state.borrow();
        state.reads.get(&socket).expect("no pending read").0.space()
    }

    /// Bytes the pending write would put on the wire.
    pub fn pending_write_bytes(&self, socket: SocketId) -> Vec<u8> {
        let state = self.state.borrow();
        state
            .writes
            .get(&socket)
            .expect("no pending write")
            .0
            .readable()
            .to_vec()
    }

    /// Complete the pending read as if `data` arrived from the peer.
    pub fn complete_read(&self, socket: SocketId, data: &[u8]) {
        let (mut buf, done) = self.take_read(socket);
        assert!(data.len() <= buf.space(), "data does not fit the read buffer");
        buf.writable_mut()[..data.len()].copy_from_slice(data);
        done(Ok(data.len()), buf);
    }

    pub fn fail_read(&self, socket: SocketId, kind: io::ErrorKind) {
        let (buf, done) = self.take_read(socket);
        done(Err(io::Error::from(kind)), buf);
    }

    /// Complete the pending write with `n` bytes accepted by the network and
    /// return those bytes.
    pub fn complete_write(&self, socket: SocketId, n: usize) -> Vec<u8> {
        let (buf, done) = self.take_write(socket);
        assert!(n <= buf.len(), "cannot write more than the buffer holds");
        let written = buf.readable()[..n].to_vec();
        done(Ok(n), buf);
        written
    }

    /// Complete the pending write in full.
    pub fn complete_write_all(&self, socket: SocketId) -> Vec<u8> {
        let n = self.pending_write_bytes(socket).len();
        self.complete_write(socket, n)
    }

    pub fn fail_write(&self, socket: SocketId, kind: io::ErrorKind) {
        let (buf, done) = self.take_write(socket);
        done(Err(io::Error::from(kind)), buf);
    }

    /// Complete the pending accept with a fresh socket.
    pub fn complete_accept(&self, listener: ListenerId) -> SocketId {
        let done = self.take_accept(listener);
        let socket = self.open_socket();
        done(Ok(socket));
        socket
    }

    pub fn fail_accept(&self, listener: ListenerId, kind: io::ErrorKind) {
        let done = self.take_accept(listener);
        done(Err(io::Error::from(kind)));
    }

    /// Resolve the oldest pending connect. Returns its target address and,
    /// on success, the new socket.
    pub fn complete_connect(&self, result: Result<(), io::ErrorKind>) -> (SocketAddr, Option<SocketId>) {
        let (addr, done) = self
            .state
            .borrow_mut()
            .connects
            .pop_front()
            .expect("no pending connect");
        match result {
            Ok(()) => {
                let socket = self.open_socket();
                done(Ok(socket));
                (addr, Some(socket))
            }
            Err(kind) => {
                done(Err(io::Error::from(kind)));
                (addr, None)
            }
        }
    }

    /// Run posted tasks, including ones posted while running. Returns how
    /// many ran.
    pub fn run_posted(&self) -> usize {
        let mut count = 0;
        loop {
            let task = self.posted.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    count += 1;
                }
                None => return count,
            }
        }
    }

    fn take_read(&self, socket: SocketId) -> (ChunkBuffer, IoCompletion) {
        self.state
            .borrow_mut()
            .reads
            .remove(&socket)
            .expect("no pending read")
    }

    fn take_write(&self, socket: SocketId) -> (ChunkBuffer, IoCompletion) {
        self.state
            .borrow_mut()
            .writes
            .remove(&socket)
            .expect("no pending write")
    }

    fn take_accept(&self, listener: ListenerId) -> AcceptCompletion {
        self.state
            .borrow_mut()
            .accepts
            .remove(&listener)
            .expect("no pending accept")
    }

    fn defer(&self, task: Task) {
        self.posted.borrow_mut().push_back(task);
    }
}

impl Reactor for ScriptedReactor {
    fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    fn register_listener(&self, _listener: std::net::TcpListener) -> io::Result<ListenerId> {
        let mut state = self.state.borrow_mut();
        let id = ListenerId::new(state.next_id);
        state.next_id += 1;
        state.listeners.insert(id);
        Ok(id)
    }

    fn register_stream(&self, _stream: std::net::TcpStream) -> io::Result<SocketId> {
        Ok(self.open_socket())
    }

    fn async_accept(&self, listener: ListenerId, done: AcceptCompletion) {
        let mut state = self.state.borrow_mut();
        if !state.listeners.contains(&listener) {
            drop(state);
            return self.defer(Box::new(move || {
                done(Err(io::Error::from(io::ErrorKind::NotConnected)))
            }));
        }
        assert!(
            !state.accepts.contains_key(&listener),
            "second accept issued on {listener}"
        );
        state.accepts_issued += 1;
        state.accepts.insert(listener, done);
    }

    fn async_connect(&self, addr: SocketAddr, done: ConnectCompletion) {
        self.state.borrow_mut().connects.push_back((addr, done));
    }

    fn async_read_some(&self, socket: SocketId, buf: ChunkBuffer, done: IoCompletion) {
        let mut state = self.state.borrow_mut();
        if !state.sockets.contains(&socket) {
            drop(state);
            return self.defer(Box::new(move || {
                done(Err(io::Error::from(io::ErrorKind::NotConnected)), buf)
            }));
        }
        assert!(
            !state.reads.contains_key(&socket),
            "second read issued on {socket}"
        );
        state.reads_issued += 1;
        state.reads.insert(socket, (buf, done));
    }

    fn async_write_some(&self, socket: SocketId, buf: ChunkBuffer, done: IoCompletion) {
        let mut state = self.state.borrow_mut();
        if !state.sockets.contains(&socket) {
            drop(state);
            return self.defer(Box::new(move || {
                done(Err(io::Error::from(io::ErrorKind::NotConnected)), buf)
            }));
        }
        assert!(
            !state.writes.contains_key(&socket),
            "second write issued on {socket}"
        );
        state.writes_issued += 1;
        state.writes.insert(socket, (buf, done));
    }

    fn shutdown(&self, socket: SocketId) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        *state.shutdowns.entry(socket).or_default() += 1;
        if state.sockets.contains(&socket) {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::NotConnected))
        }
    }

    fn close(&self, socket: SocketId) -> io::Result<()> {
        let (read, write) = {
            let mut state = self.state.borrow_mut();
            *state.closes.entry(socket).or_default() += 1;
            if !state.sockets.remove(&socket) {
                return Err(io::Error::from(io::ErrorKind::NotConnected));
            }
            (state.reads.remove(&socket), state.writes.remove(&socket))
        };
        for (buf, done) in read.into_iter().chain(write) {
            self.defer(Box::new(move || {
                done(Err(io::Error::from(io::ErrorKind::ConnectionAborted)), buf)
            }));
        }
        Ok(())
    }

    fn close_listener(&self, listener: ListenerId) -> io::Result<()> {
        let accept = {
            let mut state = self.state.borrow_mut();
            if !state.listeners.remove(&listener) {
                return Err(io::Error::from(io::ErrorKind::NotConnected));
            }
            state.accepts.remove(&listener)
        };
        if let Some(done) = accept {
            self.defer(Box::new(move || {
                done(Err(io::Error::from(io::ErrorKind::ConnectionAborted)))
            }));
        }
        Ok(())
    }

    fn local_addr(&self, socket: SocketId) -> io::Result<SocketAddr> {
        self.addr_of(socket, 1000)
    }

    fn peer_addr(&self, socket: SocketId) -> io::Result<SocketAddr> {
        self.addr_of(socket, 2000)
    }

    fn listener_addr(&self, listener: ListenerId) -> io::Result<SocketAddr> {
        if self.state.borrow().listeners.contains(&listener) {
            Ok(SocketAddr::from(([127, 0, 0, 1], 7878)))
        } else {
            Err(io::Error::from(io::ErrorKind::NotConnected))
        }
    }

    fn post(&self, task: Task) {
        self.defer(task);
    }
}

impl ScriptedReactor {
    fn addr_of(&self, socket: SocketId, base: u16) -> io::Result<SocketAddr> {
        if self.state.borrow().sockets.contains(&socket) {
            Ok(SocketAddr::from(([127, 0, 0, 1], base + socket.slot() as u16)))
        } else {
            Err(io::Error::from(io::ErrorKind::NotConnected))
        }
    }
}
