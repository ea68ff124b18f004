// src/account.rs
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

pub const DEFAULT_ACCOUNT: &str = "00000000";

/// Supplies the text served by each new emulation session.
pub trait AccountSource: Send {
    fn account_text(&self) -> Result<String>;

    fn set_text(&self, text: String) -> Result<()>;
}

/// Account text that can be replaced while the service runs.
/// Sessions already started keep the text they were built with.
#[derive(Debug, Clone)]
pub struct SharedAccount {
    inner: Arc<RwLock<String>>,
}

impl SharedAccount {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(text.into())),
        }
    }
}

impl Default for SharedAccount {
    fn default() -> Self {
        Self::new(DEFAULT_ACCOUNT)
    }
}

impl AccountSource for SharedAccount {
    fn account_text(&self) -> Result<String> {
        self.inner
            .read()
            .map(|text| text.clone())
            .map_err(|e| Error::Account(e.to_string()))
    }

    fn set_text(&self, text: String) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| Error::Account(e.to_string()))?;
        *guard = text;
        Ok(())
    }
}
