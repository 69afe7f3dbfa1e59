//! Credential checks for incoming CONNECT packets

use crate::broker::config::AuthConfig;
use crate::{MqttError, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, Salt, SaltString};
use argon2::Argon2;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Authentication provider trait
pub trait AuthProvider: Send + Sync {
    /// Checks a username and optional password from a CONNECT packet.
    ///
    /// `Ok(false)` is a rejected credential; `Err` means the check itself
    /// could not be performed.
    fn authenticate<'a>(
        &'a self,
        username: &'a str,
        password: Option<&'a [u8]>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;
}

/// Accepts every supplied credential. Installed through
/// [`MqttBroker::with_auth_provider`](crate::broker::MqttBroker::with_auth_provider).
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAuthProvider;

impl AuthProvider for AllowAllAuthProvider {
    fn authenticate<'a>(
        &'a self,
        _username: &'a str,
        _password: Option<&'a [u8]>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move { Ok(true) })
    }
}

/// Username/password authentication provider with file loading and Argon2 hashing
#[derive(Debug, Default)]
pub struct PasswordAuthProvider {
    /// Map of username to password hash
    users: Arc<RwLock<HashMap<String, String>>>,
    password_file: Option<PathBuf>,
}

impl PasswordAuthProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a password auth provider from a file
    ///
    /// File format: `username:password_hash` (one per line)
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let provider = Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            password_file: Some(path.as_ref().to_path_buf()),
        };
        provider.load_password_file().await?;
        Ok(provider)
    }

    /// Builds a provider from the broker's authentication settings. Entries
    /// from the password file are loaded first; inline users override them.
    pub async fn from_config(config: &AuthConfig) -> Result<Self> {
        let provider = Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            password_file: config.password_file.clone(),
        };
        provider.load_password_file().await?;

        for user in &config.users {
            provider
                .add_user(user.username.clone(), &user.password)
                .await?;
        }

        debug!(users = provider.user_count().await, "Password provider ready");
        Ok(provider)
    }

    /// Loads or reloads the password file
    pub async fn load_password_file(&self) -> Result<()> {
        let Some(ref path) = self.password_file else {
            return Ok(());
        };

        let content = fs::read_to_string(path).await.map_err(|e| {
            MqttError::Configuration(format!(
                "Failed to read password file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut loaded = HashMap::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((username, password_hash)) = line.split_once(':') else {
                warn!("Invalid format in password file at line {}", index + 1);
                continue;
            };

            let username = username.trim();
            if username.is_empty() {
                warn!("Empty username in password file at line {}", index + 1);
                continue;
            }

            loaded.insert(username.to_string(), password_hash.trim().to_string());
        }

        let count = loaded.len();
        self.users.write().await.extend(loaded);

        info!(
            "Loaded {} users from password file: {}",
            count,
            path.display()
        );
        Ok(())
    }

    /// Adds a user with plaintext password (hashes it with Argon2)
    pub async fn add_user(&self, username: String, password: &str) -> Result<()> {
        let password_hash = Self::hash_password(password)?;
        self.users.write().await.insert(username, password_hash);
        Ok(())
    }

    pub async fn remove_user(&self, username: &str) -> bool {
        self.users.write().await.remove(username).is_some()
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn has_user(&self, username: &str) -> bool {
        self.users.read().await.contains_key(username)
    }

    /// Hashes a password into a PHC string with a random salt
    pub fn hash_password(password: &str) -> Result<String> {
        let mut bytes = [0u8; Salt::RECOMMENDED_LENGTH];
        getrandom::fill(&mut bytes).map_err(|e| {
            error!("Failed to generate random salt: {}", e);
            MqttError::AuthenticationFailed
        })?;
        let salt = SaltString::encode_b64(&bytes).map_err(|e| {
            error!("Failed to encode salt: {}", e);
            MqttError::AuthenticationFailed
        })?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| {
                error!("Failed to hash password: {}", e);
                MqttError::AuthenticationFailed
            })
    }

    /// Verifies a password against an Argon2 hash
    pub fn verify_password(password: &[u8], hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| {
            error!("Failed to parse password hash: {}", e);
            MqttError::AuthenticationFailed
        })?;
        Ok(Argon2::default()
            .verify_password(password, &parsed_hash)
            .is_ok())
    }
}

impl AuthProvider for PasswordAuthProvider {
    fn authenticate<'a>(
        &'a self,
        username: &'a str,
        password: Option<&'a [u8]>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let users = self.users.read().await;
            let Some(password_hash) = users.get(username) else {
                warn!("Authentication failed for user: {username} (user not found)");
                return Ok(false);
            };

            match Self::verify_password(password.unwrap_or_default(), password_hash) {
                Ok(true) => {
                    debug!("Authentication successful for user: {username}");
                    Ok(true)
                }
                Ok(false) => {
                    warn!("Authentication failed for user: {username} (wrong password)");
                    Ok(false)
                }
                Err(e) => {
                    error!("Argon2 verification error for user {username}: {e}");
                    Ok(false)
                }
            }
        })
    }
}

/// Builds the credential store from the configured users and password file.
///
/// Supplied usernames are always checked against it; `enabled` only decides
/// whether anonymous CONNECTs are refused.
pub async fn create_auth_provider(config: &AuthConfig) -> Result<Arc<dyn AuthProvider>> {
    Ok(Arc::new(PasswordAuthProvider::from_config(config).await?))
}
