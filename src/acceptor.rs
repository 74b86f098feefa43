//! Passive accept loop producing connections.

use crate::connection::{Connection, ConnectionHandler};
use crate::error::{Error, Result};
use crate::handler::HandlerSlot;
use crate::reactor::{AcceptCompletion, ReactorRef, not_connected};
use crate::types::{ListenerId, SocketId};
use socket2::{Domain, Protocol, Socket, Type};
use std::cell::Cell;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use tracing::{debug, warn};

/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 32;

struct Inner {
    reactor: ReactorRef,
    listener: Cell<Option<ListenerId>>,
    backlog: i32,
    accept_in_flight: Cell<bool>,
    handler: HandlerSlot<ConnectionHandler>,
}

/// Listens on a local address and hands every accepted peer, unstarted, to
/// the connection handler.
///
/// Once [`accept`](Self::accept) is called the acceptor re-arms itself after
/// every completion, including failed ones, until it is closed.
///
/// ```no_run
/// use chunkio::{Acceptor, MioReactor, ReactorRef};
/// use std::rc::Rc;
///
/// let reactor = Rc::new(MioReactor::new()?);
/// let handle: ReactorRef = reactor.clone();
///
/// let acceptor = Acceptor::new(handle);
/// acceptor.init_address("127.0.0.1", 7878)?;
/// acceptor.set_conn_handler(|status, conn| {
///     if status.is_ok() {
///         conn.set_read_handler(|conn| {
///             let mut buf = vec![0u8; conn.input_len()];
///             conn.read(&mut buf);
///             conn.send(&buf);
///         });
///         conn.start();
///     }
/// });
/// acceptor.accept();
/// reactor.run()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct Acceptor {
    inner: Rc<Inner>,
}

impl Acceptor {
    pub fn new(reactor: ReactorRef) -> Self {
        Self::with_backlog(reactor, DEFAULT_BACKLOG)
    }

    pub fn with_backlog(reactor: ReactorRef, backlog: i32) -> Self {
        Self {
            inner: Rc::new(Inner {
                reactor,
                listener: Cell::new(None),
                backlog,
                accept_in_flight: Cell::new(false),
                handler: HandlerSlot::new(),
            }),
        }
    }

    /// Open, bind and listen on `ip:port`.
    ///
    /// Any listener from an earlier call is closed first. On error the
    /// acceptor is left without a listener.
    pub fn init_address(&self, ip: &str, port: u16) -> Result<()> {
        let ip: IpAddr = ip.parse().map_err(|e: std::net::AddrParseError| {
            Error::InvalidAddress {
                addr: ip.to_string(),
                reason: e.to_string(),
            }
        })?;
        let addr = SocketAddr::new(ip, port);
        self.close();

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(Error::Open)?;
        socket.set_reuse_address(true).map_err(Error::ReuseAddress)?;
        socket
            .bind(&addr.into())
            .map_err(|source| Error::Bind { addr, source })?;
        socket.listen(self.inner.backlog).map_err(Error::Listen)?;

        let listener = self
            .inner
            .reactor
            .register_listener(socket.into())
            .map_err(Error::Register)?;
        self.inner.listener.set(Some(listener));

        debug!(%addr, %listener, backlog = self.inner.backlog, "listening");
        Ok(())
    }

    pub fn set_conn_handler(&self, handler: impl FnMut(io::Result<()>, Connection) + 'static) {
        self.inner.handler.set(Box::new(handler));
    }

    /// Bound address of the listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let listener = self.inner.listener.get().ok_or_else(not_connected)?;
        self.inner.reactor.listener_addr(listener)
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listener.get().is_some()
    }

    /// Issue one asynchronous accept. Does nothing while one is pending.
    ///
    /// # Panics
    ///
    /// Panics if no connection handler is installed.
    pub fn accept(&self) {
        assert!(
            self.inner.handler.is_set(),
            "accept() requires a connection handler"
        );
        let inner = &self.inner;
        if inner.accept_in_flight.replace(true) {
            return;
        }

        let conn = Connection::new(inner.reactor.clone());
        let acceptor = self.clone();
        let done: AcceptCompletion = Box::new(move |result| acceptor.on_accept(result, conn));
        match inner.listener.get() {
            Some(listener) => inner.reactor.async_accept(listener, done),
            None => inner
                .reactor
                .post(Box::new(move || done(Err(not_connected())))),
        }
    }

    /// Close the listener. The pending accept completes with an error and the
    /// loop is not re-armed.
    pub fn close(&self) {
        let Some(listener) = self.inner.listener.take() else {
            return;
        };
        if let Err(e) = self.inner.reactor.close_listener(listener) {
            debug!(%listener, error = %e, "close listener failed");
        }
    }

    fn on_accept(&self, result: io::Result<SocketId>, conn: Connection) {
        let inner = &self.inner;
        inner.accept_in_flight.set(false);

        let status = match result {
            Ok(socket) => {
                conn.attach(socket);
                Ok(())
            }
            Err(e) => {
                if self.is_listening() {
                    warn!(error = %e, "accept failed");
                }
                Err(e)
            }
        };
        inner.handler.invoke(|handler| handler(status, conn));

        if self.listener_alive() && inner.handler.is_set() {
            self.accept();
        }
    }

    /// The listener may have been closed behind our back by the reactor.
    fn listener_alive(&self) -> bool {
        match self.inner.listener.get() {
            Some(listener) => self.inner.reactor.listener_addr(listener).is_ok(),
            None => false,
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            let _ = self.reactor.close_listener(listener);
        }
    }
}
