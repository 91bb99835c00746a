//! Configuration document loading
//!
//! The server binary is driven by a JSON document looked up in the
//! working directory (or wherever `--config` points). The document only
//! describes policy data; the server core never sees it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Well-known configuration filename looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "socks5-proxy.config";

/// Root configuration document.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// TCP listen endpoint, e.g. `":1080"` or `"0.0.0.0:1080"`.
    pub addr: String,

    /// Credentials admitted by the username/password gate.
    #[serde(default)]
    pub userlist: Vec<UserEntry>,

    /// Regular expressions; destinations whose target string matches any
    /// of them are refused.
    #[serde(default)]
    pub pattern: Vec<String>,

    /// CIDR blocks whose members may connect without credentials.
    #[serde(default)]
    pub ipallow: Vec<String>,
}

/// One username/password pair.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserEntry {
    /// Username.
    pub user: String,
    /// Password.
    pub pass: String,
}

impl Config {
    /// Listen endpoint with the `":port"` shorthand expanded to all
    /// interfaces.
    pub fn listen_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }
}

/// Load the configuration document from a file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse a configuration document from a JSON string.
pub fn parse_config(content: &str) -> Result<Config> {
    serde_json::from_str(content).with_context(|| "failed to parse configuration")
}
