//! The shared backend client and its credential slot.
//!
//! A [`BackendClient`] is created with the anonymous key from [`BackendConfig`] and is
//! shared by everything talking to the backend. Operations on an account's bucket need the
//! owner's access token instead. The only way to change the installed credential is
//! [`BackendClient::elevate`], which returns an [`ElevatedClient`] guard: the owner token
//! is installed while the guard lives and the previous credential is put back when it is
//! dropped, whichever way the scope is left.
use std::fmt;

use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;
use url::Url;

use crate::config::BackendConfig;

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// The low-privilege key the client was configured with
    Anonymous(String),
    /// An owner's access token
    Bearer(String),
}

impl Credential {
    pub fn token(&self) -> &str {
        match self {
            Credential::Anonymous(token) | Credential::Bearer(token) => token,
        }
    }

    /// Value of the `Authorization` header sent with this credential.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token())
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, Credential::Bearer(_))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Anonymous(_) => f.write_str("Anonymous([redacted])"),
            Credential::Bearer(_) => f.write_str("Bearer([redacted])"),
        }
    }
}

pub struct BackendClient {
    url: Url,
    credential: Mutex<Credential>,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            url: config.url.clone(),
            credential: Mutex::new(Credential::Anonymous(config.key.clone())),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The credential currently installed.
    ///
    /// Waits while an elevated operation is in flight, so it never observes the owner
    /// token of someone else's operation.
    pub async fn credential(&self) -> Credential {
        self.credential.lock().await.clone()
    }

    /// Install `token` until the returned guard is dropped.
    ///
    /// The guard holds the client's credential lock: at most one elevated operation runs
    /// per client at a time, and other callers wait for it to finish.
    pub async fn elevate(&self, token: &str) -> ElevatedClient<'_> {
        let mut slot = self.credential.lock().await;
        let saved = std::mem::replace(&mut *slot, Credential::Bearer(token.to_string()));
        trace!(url = %self.url, "credential elevated");
        ElevatedClient { url: &self.url, slot, saved: Some(saved) }
    }
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackendClient(url={})", self.url)
    }
}

/// A [`BackendClient`] with an owner token installed.
///
/// Dropping the guard restores the credential that was installed before, on every exit
/// path including `?` propagation, panics and cancelled futures.
pub struct ElevatedClient<'a> {
    url: &'a Url,
    slot: MutexGuard<'a, Credential>,
    saved: Option<Credential>,
}

impl ElevatedClient<'_> {
    pub fn url(&self) -> &Url {
        self.url
    }

    pub fn credential(&self) -> &Credential {
        &self.slot
    }

    pub fn authorization(&self) -> String {
        self.slot.authorization()
    }
}

impl Drop for ElevatedClient<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.slot = saved;
            trace!(url = %self.url, "credential restored");
        }
    }
}

impl fmt::Debug for ElevatedClient<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElevatedClient(url={}, credential={:?})", self.url, *self.slot)
    }
}
