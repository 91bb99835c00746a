//! Method negotiation and authentication
//!
//! Implements the greeting/method-selection state machine. Selection
//! policy: no-auth is preferred when its authorizer is registered and the
//! client offers it; a policy rejection from that authorizer falls
//! through to username/password when possible. Deployments lean on this
//! two-stage fallback to run an IP allow-list in front of a password
//! gate.

use crate::error::Socks5Error;
use crate::hooks::UserPassAuthorizer;
use crate::server::{Connection, Server};
use crate::socks::codec::{Greeting, UserPassRequest};
use crate::socks::consts::*;
use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub(crate) async fn run(server: &Server, conn: &mut Connection) -> Result<()> {
    let greeting = Greeting::read_from(conn.stream_mut()).await?;

    if let Some(authorizer) = server.no_auth.as_ref() {
        if greeting.offers(AUTH_METHOD_NONE) {
            match authorizer.authorize(conn).await {
                Ok(()) => {
                    conn.stream_mut()
                        .write_all(&[SOCKS5_VERSION, AUTH_METHOD_NONE])
                        .await?;
                    conn.stream_mut().flush().await?;
                    return Ok(());
                }
                Err(e) if Socks5Error::is_auth_rejection(&e) => {
                    debug!(
                        "no-auth authorizer rejected {}, trying username/password",
                        conn.peer_addr()
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    if let Some(authorizer) = server.userpass.as_ref() {
        if greeting.offers(AUTH_METHOD_PASSWORD) {
            return userpass(authorizer.as_ref(), conn).await;
        }
    }

    conn.stream_mut()
        .write_all(&[SOCKS5_VERSION, AUTH_METHOD_NOT_ACCEPTABLE])
        .await?;
    conn.stream_mut().flush().await?;
    Err(Socks5Error::AuthenticationFailed.into())
}

async fn userpass(authorizer: &dyn UserPassAuthorizer, conn: &mut Connection) -> Result<()> {
    conn.stream_mut()
        .write_all(&[SOCKS5_VERSION, AUTH_METHOD_PASSWORD])
        .await?;
    conn.stream_mut().flush().await?;

    let frame = match UserPassRequest::read_from(conn.stream_mut()).await {
        Ok(frame) => frame,
        Err(e) => {
            let _ = conn
                .stream_mut()
                .write_all(&[AUTH_VERSION, AUTH_STATUS_FAILURE])
                .await;
            return Err(e.into());
        }
    };

    if let Err(e) = authorizer
        .authorize(conn, &frame.username, &frame.password)
        .await
    {
        debug!(
            "username/password authorizer rejected {}: {e:#}",
            conn.peer_addr()
        );
        let _ = conn
            .stream_mut()
            .write_all(&[AUTH_VERSION, AUTH_STATUS_FAILURE])
            .await;
        return Err(Socks5Error::AuthenticationFailed.into());
    }

    conn.stream_mut()
        .write_all(&[AUTH_VERSION, AUTH_STATUS_SUCCESS])
        .await?;
    conn.stream_mut().flush().await?;
    Ok(())
}
