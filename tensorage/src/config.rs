use std::{
    collections::HashMap,
    fmt,
    num::{NonZeroU16, NonZeroUsize},
    path::Path,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::error::TGError;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const BACKEND_URL_VAR: &str = "SUPABASE_URL";
pub const BACKEND_KEY_VAR: &str = "SUPABASE_KEY";

/// Maximum number of elements stored in a single chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    #[error("SUPABASE_KEY environment variable not set and no KEY has been persisted.")]
    MissingBackendKey,
    #[error("invalid backend url `{url}`: {source}")]
    InvalidUrl { url: String, source: url::ParseError },
    #[error("cannot read persisted connection file: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad persisted connection file: {0}")]
    BadPersistedFile(#[from] serde_json::Error),
}

pub type ConfigError = TGError<ConfigErrorKind>;

impl<E> From<E> for ConfigError
where
    E: Into<ConfigErrorKind>,
{
    fn from(value: E) -> Self {
        Self::new(value.into())
    }
}

pub type ConfigResult<A> = Result<A, ConfigError>;

/// Where the backend lives and the low-privilege key used to talk to it before login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: Url,
    pub key: String,
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url.as_str())
            .field("key", &"[redacted]")
            .finish()
    }
}

impl BackendConfig {
    pub fn new(url: &str, key: impl Into<String>) -> ConfigResult<Self> {
        let url = Url::parse(url).map_err(|source| ConfigErrorKind::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self { url, key: key.into() })
    }

    /// Resolve the configuration from, in order of precedence: the explicit arguments,
    /// the persisted connection file (if it exists), the process environment, and the
    /// default local url. There is no default key.
    pub fn resolve(
        url: Option<&str>,
        key: Option<&str>,
        persisted: Option<&Path>,
    ) -> ConfigResult<Self> {
        Self::resolve_with(url, key, persisted, |var| std::env::var(var).ok())
    }

    /// Same as [`BackendConfig::resolve`] with an explicit environment lookup.
    pub fn resolve_with(
        url: Option<&str>,
        key: Option<&str>,
        persisted: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<Self> {
        let persisted = match persisted {
            Some(path) if path.exists() => read_persisted(path)?,
            _ => HashMap::new(),
        };
        let lookup = |var: &str| persisted.get(var).cloned().or_else(|| env(var));

        let url = match url {
            Some(url) => url.to_string(),
            None => lookup(BACKEND_URL_VAR)
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
        };
        let key = match key {
            Some(key) => key.to_string(),
            None => lookup(BACKEND_KEY_VAR).ok_or(ConfigErrorKind::MissingBackendKey)?,
        };
        Self::new(&url, key)
    }

    /// Write url and key to `path` in the format [`BackendConfig::resolve`] reads.
    pub fn persist(&self, path: &Path) -> ConfigResult<()> {
        let values = HashMap::from([
            (BACKEND_URL_VAR, self.url.as_str()),
            (BACKEND_KEY_VAR, self.key.as_str()),
        ]);
        std::fs::write(path, serde_json::to_vec_pretty(&values)?)?;
        Ok(())
    }
}

fn read_persisted(path: &Path) -> ConfigResult<HashMap<String, String>> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of elements per stored chunk
    pub chunk_size: NonZeroUsize,
    /// Replace existing datasets on `set` instead of failing
    pub allow_overwrite: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        #[allow(clippy::expect_used)]
        let chunk_size =
            NonZeroUsize::new(DEFAULT_CHUNK_SIZE).expect("default chunk size is positive");
        Self { chunk_size, allow_overwrite: false }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Chunk uploads in flight at once for a single write. With 1, chunks are written
    /// sequentially in row order.
    pub max_concurrent_uploads: NonZeroU16,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { max_concurrent_uploads: NonZeroU16::MIN }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Options {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub allow_http: bool,
    /// Without static credentials the usual `AWS_*` environment variables are used
    pub credentials: Option<S3StaticCredentials>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for S3StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[redacted]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}
