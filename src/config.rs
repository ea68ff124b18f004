// src/config.rs
use std::net::SocketAddr;

use serde::Deserialize;

use crate::account::DEFAULT_ACCOUNT;
use crate::error::{Error, Result};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// WebSocket listen address.
    pub bind: SocketAddr,
    /// Text served until a client sends SET_ACCOUNT.
    pub default_account: String,
    /// Watch PC/SC readers and read T4T tags presented to them.
    pub reader_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3500)),
            default_account: DEFAULT_ACCOUNT.to_string(),
            reader_enabled: false,
        }
    }
}

impl Config {
    /// `T4T_CONFIG` names an optional JSON file; `T4T_BIND`, `T4T_ACCOUNT`
    /// and `T4T_READER` override individual fields.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match var("T4T_CONFIG") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Config(format!("{}: {}", path, e)))?;
                Self::from_json(&raw)?
            }
            None => Self::default(),
        };

        if let Some(bind) = var("T4T_BIND") {
            config.bind = bind
                .parse()
                .map_err(|_| Error::Config(format!("bad T4T_BIND: {}", bind)))?;
        }
        if let Some(account) = var("T4T_ACCOUNT") {
            config.default_account = account;
        }
        if let Some(v) = var("T4T_READER") {
            config.reader_enabled = matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "on");
        }
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }
}
