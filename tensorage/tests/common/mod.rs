#![allow(dead_code)]
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tensorage::{
    Authenticator, BackendSession, InMemoryDatabase, StoreConfig, TensorStore,
    client::BackendClient,
    login, new_local_filesystem_storage,
    session::{AuthSession, SessionErrorKind, SessionResult, User},
};

/// Accounts registered through `sign_up`, keyed by email.
#[derive(Debug, Default)]
pub(crate) struct LocalAuthenticator {
    accounts: Mutex<HashMap<String, (String, User)>>,
}

impl LocalAuthenticator {
    pub(crate) fn with_account(email: &str, password: &str) -> Self {
        let auth = Self::default();
        auth.register(email, password);
        auth
    }

    #[allow(clippy::unwrap_used)]
    fn register(&self, email: &str, password: &str) -> User {
        let mut accounts = self.accounts.lock().unwrap();
        let user = User { id: format!("user-{}", accounts.len() + 1), email: email.to_string() };
        accounts.insert(email.to_string(), (password.to_string(), user.clone()));
        user
    }

    fn issue(user: User) -> AuthSession {
        AuthSession {
            access_token: format!("access-for-{}", user.id),
            refresh_token: format!("refresh-for-{}", user.id),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            user,
        }
    }
}

#[async_trait]
impl Authenticator for LocalAuthenticator {
    #[allow(clippy::unwrap_used)]
    async fn sign_in_with_password(
        &self,
        _client: &BackendClient,
        email: &str,
        password: &str,
    ) -> SessionResult<AuthSession> {
        match self.accounts.lock().unwrap().get(email) {
            Some((expected, user)) if expected == password => Ok(Self::issue(user.clone())),
            _ => Err(SessionErrorKind::AuthenticationFailed(
                "Invalid login credentials".to_string(),
            )
            .into()),
        }
    }

    async fn sign_up(
        &self,
        _client: &BackendClient,
        email: &str,
        password: &str,
    ) -> SessionResult<AuthSession> {
        Ok(Self::issue(self.register(email, password)))
    }

    #[allow(clippy::unwrap_used)]
    async fn refresh(
        &self,
        _client: &BackendClient,
        refresh_token: &str,
    ) -> SessionResult<AuthSession> {
        let accounts = self.accounts.lock().unwrap();
        accounts
            .values()
            .find(|(_, user)| refresh_token == format!("refresh-for-{}", user.id))
            .map(|(_, user)| Self::issue(user.clone()))
            .ok_or_else(|| {
                SessionErrorKind::AuthenticationFailed("unknown refresh token".to_string())
                    .into()
            })
    }
}

pub(crate) const EMAIL: &str = "analyst@example.com";
pub(crate) const PASSWORD: &str = "correct horse";

pub(crate) async fn make_session() -> Result<Arc<BackendSession>, Box<dyn std::error::Error>> {
    let session = login(
        Arc::new(LocalAuthenticator::with_account(EMAIL, PASSWORD)),
        EMAIL,
        PASSWORD,
        Some("http://localhost:8000"),
        Some("anon-key"),
        None,
    )
    .await?;
    Ok(Arc::new(session))
}

/// A store over an in-memory registry and chunks on the local filesystem under `root`.
pub(crate) async fn make_store(
    root: &Path,
    config: StoreConfig,
) -> Result<TensorStore, Box<dyn std::error::Error>> {
    let storage = new_local_filesystem_storage(make_session().await?, root)?;
    let store = TensorStore::new(
        Arc::new(InMemoryDatabase::new()),
        Arc::new(storage),
        config,
    )
    .await?;
    Ok(store)
}
