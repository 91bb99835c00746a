//! Configuration-driven policy
//!
//! The collaborators the binary injects into the server core: an IP
//! allow-list acting as the no-auth authorizer, a credential table acting
//! as the username/password authorizer, and a regex deny-list acting as a
//! connect hook. The core only ever sees them through the hook traits.

use crate::config::UserEntry;
use crate::error::Socks5Error;
use crate::hooks::{ConnectHandler, NoAuthAuthorizer, UserPassAuthorizer};
use crate::server::Connection;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::info;

/// A parsed CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNet {
    addr: IpAddr,
    prefix: u8,
}

impl FromStr for IpNet {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .with_context(|| format!("missing prefix length in {s:?}"))?;
        let addr: IpAddr = addr
            .parse()
            .with_context(|| format!("invalid network address in {s:?}"))?;
        let prefix: u8 = prefix
            .parse()
            .with_context(|| format!("invalid prefix length in {s:?}"))?;

        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            bail!("prefix length /{prefix} out of range in {s:?}");
        }

        Ok(IpNet { addr, prefix })
    }
}

impl IpNet {
    /// Whether `ip` falls inside this block. Addresses of a different
    /// family never match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix)
                };
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix)
                };
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

/// No-auth authorizer admitting a client if and only if its remote IP
/// falls inside at least one configured block. An empty list admits
/// nobody, which pushes every client to the password gate.
pub struct IpAllowList {
    blocks: Vec<IpNet>,
}

impl IpAllowList {
    /// Parse a list of CIDR strings.
    pub fn from_strings(cidrs: &[String]) -> Result<Self> {
        let blocks = cidrs
            .iter()
            .map(|cidr| cidr.parse())
            .collect::<Result<Vec<IpNet>>>()?;
        Ok(IpAllowList { blocks })
    }

    /// Whether the address is inside any configured block.
    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        self.blocks.iter().any(|block| block.contains(ip))
    }
}

#[async_trait]
impl NoAuthAuthorizer for IpAllowList {
    async fn authorize(&self, conn: &mut Connection) -> Result<()> {
        let ip = conn.peer_addr().ip();
        if self.is_allowed(ip) {
            info!("IP ok: {ip}");
            Ok(())
        } else {
            info!("IP not allowed: {ip}");
            Err(Socks5Error::AuthenticationFailed.into())
        }
    }
}

/// Username/password authorizer backed by the configured credential
/// table. On success the authenticated username is attached to the
/// connection for the connect and close hooks.
pub struct UserTable {
    users: HashMap<String, String>,
}

impl UserTable {
    /// Build the table from configuration entries.
    pub fn from_entries(entries: &[UserEntry]) -> Self {
        let users = entries
            .iter()
            .map(|entry| (entry.user.clone(), entry.pass.clone()))
            .collect();
        UserTable { users }
    }
}

#[async_trait]
impl UserPassAuthorizer for UserTable {
    async fn authorize(
        &self,
        conn: &mut Connection,
        username: &[u8],
        password: &[u8],
    ) -> Result<()> {
        if self.users.is_empty() {
            return Err(Socks5Error::AuthenticationFailed.into());
        }

        let user = String::from_utf8_lossy(username).into_owned();
        let pass = String::from_utf8_lossy(password);

        match self.users.get(&user) {
            Some(expected) if *expected == pass => {
                info!("user connected: {user:?}");
                conn.set_data(user);
                Ok(())
            }
            Some(_) => {
                info!("user refused, password mismatch: {user:?}");
                Err(Socks5Error::AuthenticationFailed.into())
            }
            None => {
                info!("user refused, no such user: {user:?}");
                Err(Socks5Error::AuthenticationFailed.into())
            }
        }
    }
}

/// Connect hook refusing any destination whose full target string
/// matches one of the configured patterns. Passes the target through
/// unchanged otherwise.
pub struct PatternDenyList {
    patterns: Vec<Regex>,
}

impl PatternDenyList {
    /// Compile a list of regular expressions.
    pub fn from_strings(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid pattern {p:?}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(PatternDenyList { patterns })
    }
}

#[async_trait]
impl ConnectHandler for PatternDenyList {
    async fn handle_connect(&self, conn: &mut Connection, host: String) -> Result<String> {
        for pattern in &self.patterns {
            if pattern.is_match(&host) {
                return Err(Socks5Error::NotAllowedByRuleset.into());
            }
        }

        if let Some(user) = conn.data::<String>() {
            info!("{user} connecting to {host}");
        }
        Ok(host)
    }
}
