//! One-shot outbound connect producing a connection.

use crate::connection::{Connection, ConnectionHandler};
use crate::handler::HandlerSlot;
use crate::reactor::{ConnectCompletion, ReactorRef};
use crate::types::SocketId;
use std::cell::RefCell;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use tracing::debug;

struct Inner {
    reactor: ReactorRef,
    target: RefCell<Option<(String, u16)>>,
    handler: HandlerSlot<ConnectionHandler>,
}

/// Connects to a remote endpoint and hands the resulting connection,
/// unstarted, to the connection handler.
///
/// Every [`connect`](Self::connect) call produces exactly one handler
/// invocation. Nothing is retried.
#[derive(Clone)]
pub struct Connector {
    inner: Rc<Inner>,
}

impl Connector {
    pub fn new(reactor: ReactorRef) -> Self {
        Self {
            inner: Rc::new(Inner {
                reactor,
                target: RefCell::new(None),
                handler: HandlerSlot::new(),
            }),
        }
    }

    /// Store the target endpoint. The address is validated by
    /// [`connect`](Self::connect).
    pub fn init_address(&self, ip: &str, port: u16) {
        *self.inner.target.borrow_mut() = Some((ip.to_string(), port));
    }

    pub fn set_conn_handler(&self, handler: impl FnMut(io::Result<()>, Connection) + 'static) {
        self.inner.handler.set(Box::new(handler));
    }

    /// Issue one asynchronous connect.
    ///
    /// # Panics
    ///
    /// Panics if no connection handler is installed.
    pub fn connect(&self) {
        assert!(
            self.inner.handler.is_set(),
            "connect() requires a connection handler"
        );
        let reactor = &self.inner.reactor;
        let conn = Connection::new(reactor.clone());
        let connector = self.clone();
        let done: ConnectCompletion = Box::new(move |result| connector.on_connect(result, conn));

        match self.target_addr() {
            Ok(addr) => {
                debug!(%addr, "connecting");
                reactor.async_connect(addr, done);
            }
            Err(e) => reactor.post(Box::new(move || done(Err(e)))),
        }
    }

    fn target_addr(&self) -> io::Result<SocketAddr> {
        let target = self.inner.target.borrow();
        let Some((ip, port)) = target.as_ref() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no target address configured",
            ));
        };
        let ip: IpAddr = ip.parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid address {ip:?}: {e}"),
            )
        })?;
        Ok(SocketAddr::new(ip, *port))
    }

    fn on_connect(&self, result: io::Result<SocketId>, conn: Connection) {
        let status = match result {
            Ok(socket) => {
                conn.attach(socket);
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "connect failed");
                Err(e)
            }
        };
        self.inner.handler.invoke(|handler| handler(status, conn));
    }
}
