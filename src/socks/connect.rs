//! CONNECT execution
//!
//! Reads the request, walks the connect hooks (which may rewrite or
//! refuse the target), dials the upstream peer, emits the reply, runs the
//! payload splitter on the first client bytes, and then relays
//! bidirectionally until either side is done.

use crate::error::Socks5Error;
use crate::server::{Connection, Server};
use crate::socks::codec::{Reply, Request};
use crate::socks::consts::*;
use crate::socks::splitter::{self, SplitOutcome};
use anyhow::Result;
use std::io;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info};

pub(crate) async fn run(server: &Server, conn: &mut Connection) -> Result<()> {
    let request = match Request::read_from(conn.stream_mut()).await {
        Ok(request) => request,
        Err(e) => {
            // The one codec error that gets a reply before propagating.
            if matches!(e, Socks5Error::AddressTypeNotSupported(_)) {
                let _ = Reply::error(REPLY_ADDRESS_TYPE_NOT_SUPPORTED)
                    .write_to(conn.stream_mut())
                    .await;
            }
            return Err(e.into());
        }
    };

    if request.command != CMD_CONNECT {
        debug!(
            "unsupported command {:#04x} from {}",
            request.command,
            conn.peer_addr()
        );
        Reply::error(REPLY_COMMAND_NOT_SUPPORTED)
            .write_to(conn.stream_mut())
            .await?;
        return Ok(());
    }

    let mut host = request.dest_string();
    for handler in &server.connect_handlers {
        host = match handler.handle_connect(conn, host).await {
            Ok(next) => next,
            Err(e) if Socks5Error::is_ruleset_rejection(&e) => {
                info!("connection from {} refused by ruleset", conn.peer_addr());
                Reply::error(REPLY_CONNECTION_NOT_ALLOWED)
                    .write_to(conn.stream_mut())
                    .await?;
                return Ok(());
            }
            Err(e) => {
                let _ = Reply::error(REPLY_GENERAL_FAILURE)
                    .write_to(conn.stream_mut())
                    .await;
                return Err(e);
            }
        };
    }

    let mut upstream = dial(conn, &host).await?;

    let bound = match upstream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            let _ = Reply::error(REPLY_GENERAL_FAILURE)
                .write_to(conn.stream_mut())
                .await;
            return Err(e.into());
        }
    };

    if let Err(e) = Reply::success(bound).write_to(conn.stream_mut()).await {
        if let Err(e2) = Reply::error(REPLY_GENERAL_FAILURE)
            .write_to(conn.stream_mut())
            .await
        {
            debug!("could not send error reply to {}: {e2}", conn.peer_addr());
        }
        return Err(e.into());
    }

    info!("tunnel established: {} -> {}", conn.peer_addr(), host);

    match splitter::shape_first_flight(conn.stream_mut(), &mut upstream)
        .await
        .map_err(Socks5Error::Relay)?
    {
        SplitOutcome::ClientClosed => return Ok(()),
        SplitOutcome::Relay => {}
    }

    match tokio::io::copy_bidirectional(conn.stream_mut(), &mut upstream).await {
        Ok((to_upstream, to_client)) => {
            debug!(
                "relay for {} done: {to_upstream} bytes out, {to_client} bytes in",
                conn.peer_addr()
            );
            Ok(())
        }
        Err(e) => Err(Socks5Error::Relay(e).into()),
    }
}

/// Resolve and dial the target. A resolution failure maps to
/// host-unreachable, everything else to a general failure.
async fn dial(conn: &mut Connection, host: &str) -> Result<TcpStream> {
    let dest = match resolve(host).await {
        Ok(addr) => addr,
        Err(e) => {
            let _ = Reply::error(REPLY_HOST_UNREACHABLE)
                .write_to(conn.stream_mut())
                .await;
            return Err(Socks5Error::Dial {
                host: host.to_string(),
                source: e,
            }
            .into());
        }
    };

    match TcpStream::connect(dest).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            let _ = Reply::error(REPLY_GENERAL_FAILURE)
                .write_to(conn.stream_mut())
                .await;
            Err(Socks5Error::Dial {
                host: host.to_string(),
                source: e,
            }
            .into())
        }
    }
}

async fn resolve(host: &str) -> io::Result<SocketAddr> {
    lookup_host(host).await?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")
    })
}
