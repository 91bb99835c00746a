//! Server core: hook registry, accept loop, and per-connection serving
//!
//! A [`Server`] owns the ordered hook lists and the two optional
//! authorizers. Registration happens before serving; `listen_and_serve`
//! and `serve` take the server by value, so the registry is frozen once
//! accepting begins. Each accepted socket becomes a [`Connection`] served
//! on its own task; a panic inside that task is caught and logged, close
//! hooks still run, and the accept loop keeps going.

use crate::hooks::{
    CloseHandler, ConnectHandler, FnCloseHandler, FnConnectHandler, FnNoAuthAuthorizer,
    FnUserPassAuthorizer, NoAuthAuthorizer, UserPassAuthorizer,
};
use crate::socks::{connect, handshake};
use anyhow::{Context, Result};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Initial delay after a temporary accept failure.
const ACCEPT_RETRY_MIN: Duration = Duration::from_millis(5);
/// Ceiling for the accept retry delay.
const ACCEPT_RETRY_MAX: Duration = Duration::from_secs(1);

/// Object-safe alias for the duplex byte streams a [`Connection`] wraps.
pub trait SessionStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SessionStream for T {}

/// Per-accepted-socket state.
///
/// Owned by exactly one serving task. Authorizers may attach an opaque
/// datum which connect and close hooks can read back; the core never
/// inspects it.
pub struct Connection {
    stream: Box<dyn SessionStream>,
    peer_addr: SocketAddr,
    data: Option<Box<dyn Any + Send + Sync>>,
}

impl Connection {
    pub(crate) fn new(stream: impl SessionStream + 'static, peer_addr: SocketAddr) -> Self {
        Connection {
            stream: Box::new(stream),
            peer_addr,
            data: None,
        }
    }

    /// Remote address of the client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Attach a datum to the connection, replacing any previous one.
    pub fn set_data<T: Any + Send + Sync>(&mut self, value: T) {
        self.data = Some(Box::new(value));
    }

    /// Borrow the attached datum, if it exists and has type `T`.
    pub fn data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.data.as_ref().and_then(|d| d.downcast_ref())
    }

    /// Remove and return the attached datum, if it has type `T`.
    /// A datum of a different type stays attached.
    pub fn take_data<T: Any + Send + Sync>(&mut self) -> Option<T> {
        let datum = self.data.take()?;
        match datum.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.data = Some(other);
                None
            }
        }
    }

    pub(crate) fn stream_mut(&mut self) -> &mut Box<dyn SessionStream> {
        &mut self.stream
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("has_data", &self.data.is_some())
            .finish()
    }
}

/// SOCKS5 proxy server: hook registry plus accept loop.
#[derive(Default)]
pub struct Server {
    pub(crate) connect_handlers: Vec<Arc<dyn ConnectHandler>>,
    pub(crate) close_handlers: Vec<Arc<dyn CloseHandler>>,
    pub(crate) no_auth: Option<Arc<dyn NoAuthAuthorizer>>,
    pub(crate) userpass: Option<Arc<dyn UserPassAuthorizer>>,
}

impl Server {
    /// Create a server with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a connect hook. Hooks run in registration order, each
    /// receiving the previous hook's (possibly rewritten) target.
    pub fn handle_connect(&mut self, handler: impl ConnectHandler + 'static) {
        self.connect_handlers.push(Arc::new(handler));
    }

    /// Append a connect hook given as a plain closure.
    pub fn handle_connect_fn<F>(&mut self, f: F)
    where
        F: Fn(&mut Connection, String) -> Result<String> + Send + Sync + 'static,
    {
        self.handle_connect(FnConnectHandler(f));
    }

    /// Append a close hook. Hooks run in registration order.
    pub fn handle_close(&mut self, handler: impl CloseHandler + 'static) {
        self.close_handlers.push(Arc::new(handler));
    }

    /// Append a close hook given as a plain closure.
    pub fn handle_close_fn<F>(&mut self, f: F)
    where
        F: Fn(&mut Connection) + Send + Sync + 'static,
    {
        self.handle_close(FnCloseHandler(f));
    }

    /// Set the authorizer consulted when a client offers the
    /// no-authentication method.
    pub fn no_auth_authorizer(&mut self, authorizer: impl NoAuthAuthorizer + 'static) {
        self.no_auth = Some(Arc::new(authorizer));
    }

    /// Set the no-auth authorizer given as a plain closure.
    pub fn no_auth_authorizer_fn<F>(&mut self, f: F)
    where
        F: Fn(&mut Connection) -> Result<()> + Send + Sync + 'static,
    {
        self.no_auth_authorizer(FnNoAuthAuthorizer(f));
    }

    /// Set the authorizer consulted for username/password credentials.
    pub fn userpass_authorizer(&mut self, authorizer: impl UserPassAuthorizer + 'static) {
        self.userpass = Some(Arc::new(authorizer));
    }

    /// Set the username/password authorizer given as a plain closure.
    pub fn userpass_authorizer_fn<F>(&mut self, f: F)
    where
        F: Fn(&mut Connection, &[u8], &[u8]) -> Result<()> + Send + Sync + 'static,
    {
        self.userpass_authorizer(FnUserPassAuthorizer(f));
    }

    /// Bind the listen endpoint and serve until a fatal accept error.
    pub async fn listen_and_serve(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!("listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    ///
    /// Temporary accept failures are retried with exponential backoff
    /// (5 ms doubling up to 1 s); any other accept failure shuts the
    /// loop down. In-flight connections keep running.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let server = Arc::new(self);
        let mut retry_delay = None;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    retry_delay = None;
                    debug!("accepted connection from {peer}");
                    let conn = Connection::new(stream, peer);
                    let server = Arc::clone(&server);
                    tokio::spawn(serve_connection(server, conn));
                }
                Err(e) if is_temporary(&e) => {
                    let delay = retry_delay
                        .map_or(ACCEPT_RETRY_MIN, |d: Duration| (d * 2).min(ACCEPT_RETRY_MAX));
                    retry_delay = Some(delay);
                    warn!("accept error: {e}; retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context("accept loop terminated"));
                }
            }
        }
    }

    async fn serve_session(&self, conn: &mut Connection) -> Result<()> {
        handshake::run(self, conn).await.context("handshake failed")?;
        connect::run(self, conn)
            .await
            .context("command execution failed")?;
        Ok(())
    }

    /// Run the close hooks, then shut the socket down. Called exactly
    /// once per connection, on every path out of the serving task.
    async fn finish(&self, conn: &mut Connection) {
        for handler in &self.close_handlers {
            handler.handle_close(conn).await;
        }
        if let Err(e) = conn.stream_mut().shutdown().await {
            debug!("socket shutdown for {}: {e}", conn.peer_addr());
        }
    }
}

async fn serve_connection(server: Arc<Server>, mut conn: Connection) {
    let peer = conn.peer_addr();
    let session = AssertUnwindSafe(server.serve_session(&mut conn))
        .catch_unwind()
        .await;

    match session {
        Ok(Ok(())) => debug!("session with {peer} finished"),
        Ok(Err(e)) => warn!("session with {peer} failed: {e:#}"),
        Err(panic) => error!("panic serving {peer}: {}", panic_message(panic.as_ref())),
    }

    server.finish(&mut conn).await;
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// The runtime equivalent of a temporary accept error: the loop backs
/// off and keeps accepting instead of shutting down.
fn is_temporary(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
