//! Authenticated backend sessions.
//!
//! Signing in is done by an [`Authenticator`], which is provided by the caller. This module
//! only keeps the resulting tokens next to the shared [`BackendClient`] so the storage
//! context can elevate the client with the owner's access token.
use std::{fmt, path::Path, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::{
    client::BackendClient,
    config::{BackendConfig, ConfigError},
    error::TGError,
};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionErrorKind {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type SessionError = TGError<SessionErrorKind>;

impl<E> From<E> for SessionError
where
    E: Into<SessionErrorKind>,
{
    fn from(value: E) -> Self {
        Self::new(value.into())
    }
}

pub type SessionResult<A> = Result<A, SessionError>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Internal user identifier, also the id of the user's bucket
    pub id: String,
    pub email: String,
}

/// Tokens issued by the authentication service for one login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("user", &self.user)
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The authentication service.
#[async_trait]
pub trait Authenticator: fmt::Debug + Send + Sync {
    async fn sign_in_with_password(
        &self,
        client: &BackendClient,
        email: &str,
        password: &str,
    ) -> SessionResult<AuthSession>;

    async fn sign_up(
        &self,
        client: &BackendClient,
        email: &str,
        password: &str,
    ) -> SessionResult<AuthSession>;

    async fn refresh(
        &self,
        client: &BackendClient,
        refresh_token: &str,
    ) -> SessionResult<AuthSession>;
}

/// A logged-in owner bound to the shared client.
#[derive(Debug)]
pub struct BackendSession {
    client: Arc<BackendClient>,
    authenticator: Arc<dyn Authenticator>,
    auth: RwLock<AuthSession>,
}

impl BackendSession {
    pub fn new(
        client: Arc<BackendClient>,
        authenticator: Arc<dyn Authenticator>,
        auth: AuthSession,
    ) -> Self {
        Self { client, authenticator, auth: RwLock::new(auth) }
    }

    #[instrument(skip(client, authenticator, password))]
    pub async fn login_by_mail(
        client: Arc<BackendClient>,
        authenticator: Arc<dyn Authenticator>,
        email: &str,
        password: &str,
    ) -> SessionResult<Self> {
        let auth =
            authenticator.sign_in_with_password(client.as_ref(), email, password).await?;
        debug!(user_id = %auth.user.id, "logged in");
        Ok(Self::new(client, authenticator, auth))
    }

    pub fn client(&self) -> &Arc<BackendClient> {
        &self.client
    }

    pub async fn user(&self) -> User {
        self.auth.read().await.user.clone()
    }

    pub async fn access_token(&self) -> String {
        self.auth.read().await.access_token.clone()
    }

    /// Exchange the refresh token for a new set of tokens.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> SessionResult<()> {
        let refresh_token = self.auth.read().await.refresh_token.clone();
        let renewed = self.authenticator.refresh(&self.client, &refresh_token).await?;
        *self.auth.write().await = renewed;
        debug!("session refreshed");
        Ok(())
    }
}

/// Resolve the backend configuration, connect, and log in.
pub async fn login(
    authenticator: Arc<dyn Authenticator>,
    email: &str,
    password: &str,
    backend_url: Option<&str>,
    backend_key: Option<&str>,
    persisted: Option<&Path>,
) -> SessionResult<BackendSession> {
    let config = BackendConfig::resolve(backend_url, backend_key, persisted)?;
    let client = Arc::new(BackendClient::new(&config));
    BackendSession::login_by_mail(client, authenticator, email, password).await
}

/// Resolve the backend configuration and register a new account.
pub async fn signup(
    authenticator: Arc<dyn Authenticator>,
    email: &str,
    password: &str,
    backend_url: Option<&str>,
    backend_key: Option<&str>,
    persisted: Option<&Path>,
) -> SessionResult<AuthSession> {
    let config = BackendConfig::resolve(backend_url, backend_key, persisted)?;
    let client = BackendClient::new(&config);
    authenticator.sign_up(&client, email, password).await
}
