//! Hook and authorizer contracts
//!
//! The server core delegates every policy decision to user-supplied
//! callbacks: two optional authorizers gate the handshake, an ordered list
//! of connect hooks may rewrite or refuse destinations, and an ordered
//! list of close hooks observes teardown. Implement the traits directly,
//! or register plain closures through the `_fn` methods on
//! [`Server`](crate::server::Server).

use crate::server::Connection;
use anyhow::Result;
use async_trait::async_trait;

/// Invoked after request parsing and before dialing.
///
/// Receives the current `host:port` target and returns the (possibly
/// rewritten) target for the next hook in the chain. Returning
/// [`Socks5Error::NotAllowedByRuleset`](crate::error::Socks5Error::NotAllowedByRuleset)
/// refuses the destination; the client gets reply code `0x02` and the
/// connection closes cleanly. Any other error maps to a general failure.
#[async_trait]
pub trait ConnectHandler: Send + Sync {
    /// Inspect, rewrite, or refuse the destination.
    async fn handle_connect(&self, conn: &mut Connection, host: String) -> Result<String>;
}

/// Invoked exactly once per accepted connection at teardown, before the
/// socket is closed. Runs on every path, including panics in the serving
/// task.
#[async_trait]
pub trait CloseHandler: Send + Sync {
    /// Observe the connection being torn down.
    async fn handle_close(&self, conn: &mut Connection);
}

/// Decides whether a client may proceed without credentials.
///
/// Returning
/// [`Socks5Error::AuthenticationFailed`](crate::error::Socks5Error::AuthenticationFailed)
/// is a policy rejection: if the client also advertised username/password
/// and a [`UserPassAuthorizer`] is registered, the handshake falls through
/// to it. Any other error is fatal for the connection.
#[async_trait]
pub trait NoAuthAuthorizer: Send + Sync {
    /// Authorize the connection, optionally attaching a datum to it.
    async fn authorize(&self, conn: &mut Connection) -> Result<()>;
}

/// Verifies username/password credentials (RFC 1929).
#[async_trait]
pub trait UserPassAuthorizer: Send + Sync {
    /// Authorize the credentials, optionally attaching a datum to the
    /// connection.
    async fn authorize(
        &self,
        conn: &mut Connection,
        username: &[u8],
        password: &[u8],
    ) -> Result<()>;
}

/// Adapter turning a plain closure into a [`ConnectHandler`].
pub struct FnConnectHandler<F>(pub F);

#[async_trait]
impl<F> ConnectHandler for FnConnectHandler<F>
where
    F: Fn(&mut Connection, String) -> Result<String> + Send + Sync,
{
    async fn handle_connect(&self, conn: &mut Connection, host: String) -> Result<String> {
        (self.0)(conn, host)
    }
}

/// Adapter turning a plain closure into a [`CloseHandler`].
pub struct FnCloseHandler<F>(pub F);

#[async_trait]
impl<F> CloseHandler for FnCloseHandler<F>
where
    F: Fn(&mut Connection) + Send + Sync,
{
    async fn handle_close(&self, conn: &mut Connection) {
        (self.0)(conn)
    }
}

/// Adapter turning a plain closure into a [`NoAuthAuthorizer`].
pub struct FnNoAuthAuthorizer<F>(pub F);

#[async_trait]
impl<F> NoAuthAuthorizer for FnNoAuthAuthorizer<F>
where
    F: Fn(&mut Connection) -> Result<()> + Send + Sync,
{
    async fn authorize(&self, conn: &mut Connection) -> Result<()> {
        (self.0)(conn)
    }
}

/// Adapter turning a plain closure into a [`UserPassAuthorizer`].
pub struct FnUserPassAuthorizer<F>(pub F);

#[async_trait]
impl<F> UserPassAuthorizer for FnUserPassAuthorizer<F>
where
    F: Fn(&mut Connection, &[u8], &[u8]) -> Result<()> + Send + Sync,
{
    async fn authorize(
        &self,
        conn: &mut Connection,
        username: &[u8],
        password: &[u8],
    ) -> Result<()> {
        (self.0)(conn, username, password)
    }
}
