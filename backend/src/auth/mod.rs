//! Operator authentication: password login and bearer tokens

pub mod password;
pub mod token;

use chrono::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::models::{Credentials, TokenResponse, UserRecord};
use crate::telemetry::timed;
use crate::tunnel::TunnelProvisioner;

pub use token::{Claims, TokenKeys};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("token encoding failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("user lookup failed: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct AuthService {
    db: Database,
    keys: TokenKeys,
}

impl AuthService {
    pub fn new(db: Database, secret: &str, token_ttl_hours: i64) -> Self {
        Self {
            db,
            keys: TokenKeys::new(secret.as_bytes(), Duration::hours(token_ttl_hours)),
        }
    }

    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<TokenResponse, AuthError> {
        timed("authenticate", self.login(credentials)).await
    }

    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse, AuthError> {
        let user = self
            .db
            .find_user_by_username(&credentials.username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !password::verify_password(&credentials.password, &user.password_hash)? {
            warn!("Rejected login attempt");
            return Err(AuthError::InvalidCredentials);
        }

        let (token, claims) = self.keys.issue(&user.id)?;
        info!(user_id = %user.id, "User authenticated");

        Ok(TokenResponse {
            token,
            expires_at: claims.exp,
        })
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        self.keys.validate(token)
    }

    /// Make sure the configured administrator exists.
    ///
    /// When it does not, every stored user is replaced by it and a tunnel
    /// identity is provisioned under its name. Returns whether it was created.
    pub async fn ensure_default_user(
        &self,
        username: &str,
        password: &str,
        provisioner: &dyn TunnelProvisioner,
    ) -> Result<bool, AuthError> {
        if self.db.find_user_by_username(username).await?.is_some() {
            return Ok(false);
        }

        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: password::hash_password(password)?,
        };
        self.db.replace_users(&user).await?;

        if let Err(e) = provisioner.provision(username).await {
            warn!(username = %username, error = %e, "Could not provision tunnel for administrator");
        }

        info!(username = %username, "Default administrator created");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::{ProvisionedPeer, ProvisioningError};
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Collects formatted log output in memory
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct CountingProvisioner {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TunnelProvisioner for CountingProvisioner {
        async fn provision(&self, _name: &str) -> Result<ProvisionedPeer, ProvisioningError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProvisioningError::KeyGeneration("wg missing".into()));
            }
            Ok(ProvisionedPeer {
                tunnel_address: "10.0.0.2".into(),
                client_config: String::new(),
            })
        }

        async fn client_config(&self, _name: &str) -> Option<String> {
            None
        }
    }

    async fn service() -> AuthService {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.run_migrations().await.unwrap();
        AuthService::new(db, "secret", 12)
    }

    fn credentials(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn test_default_user_created_once() {
        let auth = service().await;
        let provisioner = CountingProvisioner {
            calls: AtomicUsize::new(0),
            fail: false,
        };

        assert!(auth.ensure_default_user("fleetlink", "root", &provisioner).await.unwrap());
        assert!(!auth.ensure_default_user("fleetlink", "root", &provisioner).await.unwrap());
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provisioning_failure_is_not_fatal() {
        let auth = service().await;
        let provisioner = CountingProvisioner {
            calls: AtomicUsize::new(0),
            fail: true,
        };

        assert!(auth.ensure_default_user("fleetlink", "root", &provisioner).await.unwrap());
        assert!(auth.authenticate(&credentials("fleetlink", "root")).await.is_ok());
    }

    #[tokio::test]
    async fn test_authenticate() {
        let auth = service().await;
        let provisioner = CountingProvisioner {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        auth.ensure_default_user("fleetlink", "root", &provisioner).await.unwrap();

        let issued = auth.authenticate(&credentials("fleetlink", "root")).await.unwrap();
        let claims = auth.validate(&issued.token).unwrap();
        assert_eq!(claims.exp, issued.expires_at);

        assert!(matches!(
            auth.authenticate(&credentials("fleetlink", "wrong")).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.authenticate(&credentials("nobody", "root")).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_default_user_password_not_logged() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let auth = service().await;
        let provisioner = CountingProvisioner {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        auth.ensure_default_user("fleetlink", "s3cret-pass", &provisioner)
            .await
            .unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Default administrator created"));
        assert!(output.contains("fleetlink"));
        assert!(!output.contains("s3cret-pass"));
    }
}
