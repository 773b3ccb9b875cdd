//! Account directory.
//!
//! Usernames map to a bcrypt password hash and an optional avatar. The
//! default directory keeps accounts in memory and rewrites a JSON file after
//! every registration.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Account directory errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Username or password was empty.
    #[error("Username and password are required")]
    MissingCredentials,

    /// Username is already registered.
    #[error("Username already exists")]
    UsernameTaken,

    /// No account with that username.
    #[error("User not found")]
    UnknownUser,

    /// Password did not match.
    #[error("Wrong password")]
    WrongPassword,

    /// Password hashing failed.
    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    /// Reading or writing the account file failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl DirectoryError {
    /// Whether the error is the caller's fault rather than the server's.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        !matches!(self, DirectoryError::Hash(_) | DirectoryError::Storage(_))
    }
}

/// Public account information returned on login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub avatar: Option<String>,
}

/// Registration and login lookups.
///
/// Implementations may block (hashing, disk I/O); callers on the async
/// runtime should use `spawn_blocking`.
pub trait UserDirectory: Send + Sync {
    /// Create an account.
    ///
    /// # Errors
    ///
    /// Fails on empty credentials, a taken username, or storage failure.
    fn register(
        &self,
        username: &str,
        password: &str,
        avatar: Option<String>,
    ) -> Result<(), DirectoryError>;

    /// Check credentials and return the account.
    ///
    /// # Errors
    ///
    /// Fails on an unknown username or a wrong password.
    fn login(&self, username: &str, password: &str) -> Result<UserRecord, DirectoryError>;
}

/// Stored form of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUser {
    password_hash: String,
    #[serde(default)]
    avatar: Option<String>,
}

/// Account directory persisted to a JSON file.
#[derive(Debug)]
pub struct JsonFileDirectory {
    path: Option<PathBuf>,
    cost: u32,
    users: RwLock<HashMap<String, StoredUser>>,
}

impl JsonFileDirectory {
    /// Open the directory at `path`, loading existing accounts if the file
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>, cost: u32) -> Result<Self, DirectoryError> {
        let path = path.into();
        let users = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| DirectoryError::Storage(format!("{}: {}", path.display(), e)))?;
            serde_json::from_str(&contents)
                .map_err(|e| DirectoryError::Storage(format!("{}: {}", path.display(), e)))?
        } else {
            HashMap::new()
        };

        info!(path = %path.display(), accounts = users.len(), "Account directory opened");

        Ok(Self {
            path: Some(path),
            cost,
            users: RwLock::new(users),
        })
    }

    /// Create a directory that is never written to disk.
    #[must_use]
    pub fn in_memory(cost: u32) -> Self {
        Self {
            path: None,
            cost,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Get the number of accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Check if there are no accounts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    fn persist(path: &Path, users: &HashMap<String, StoredUser>) -> Result<(), DirectoryError> {
        let contents = serde_json::to_string_pretty(users)
            .map_err(|e| DirectoryError::Storage(e.to_string()))?;

        // Write then rename so a crash never leaves a truncated file
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .and_then(|()| std::fs::rename(&tmp, path))
            .map_err(|e| DirectoryError::Storage(format!("{}: {}", path.display(), e)))
    }
}

impl UserDirectory for JsonFileDirectory {
    fn register(
        &self,
        username: &str,
        password: &str,
        avatar: Option<String>,
    ) -> Result<(), DirectoryError> {
        if username.is_empty() || password.is_empty() {
            return Err(DirectoryError::MissingCredentials);
        }
        if self.users.read().contains_key(username) {
            return Err(DirectoryError::UsernameTaken);
        }

        let password_hash = bcrypt::hash(password, self.cost)?;

        let mut users = self.users.write();
        // Re-check: another registration may have won while we were hashing
        if users.contains_key(username) {
            return Err(DirectoryError::UsernameTaken);
        }
        users.insert(
            username.to_string(),
            StoredUser {
                password_hash,
                avatar,
            },
        );

        if let Some(path) = &self.path {
            if let Err(e) = Self::persist(path, &users) {
                users.remove(username);
                return Err(e);
            }
        }

        debug!(username = %username, "Account registered");
        Ok(())
    }

    fn login(&self, username: &str, password: &str) -> Result<UserRecord, DirectoryError> {
        let stored = self
            .users
            .read()
            .get(username)
            .cloned()
            .ok_or(DirectoryError::UnknownUser)?;

        if !bcrypt::verify(password, &stored.password_hash)? {
            return Err(DirectoryError::WrongPassword);
        }

        Ok(UserRecord {
            username: username.to_string(),
            avatar: stored.avatar,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COST: u32 = 4;

    #[test]
    fn test_register_and_login() {
        let directory = JsonFileDirectory::in_memory(TEST_COST);

        directory
            .register("alice", "secret", Some("data:image/png;base64,AAAA".into()))
            .unwrap();

        let record = directory.login("alice", "secret").unwrap();
        assert_eq!(record.username, "alice");
        assert_eq!(record.avatar.as_deref(), Some("data:image/png;base64,AAAA"));
    }

    #[test]
    fn test_register_rejections() {
        let directory = JsonFileDirectory::in_memory(TEST_COST);

        assert!(matches!(
            directory.register("", "pw", None),
            Err(DirectoryError::MissingCredentials)
        ));
        assert!(matches!(
            directory.register("bob", "", None),
            Err(DirectoryError::MissingCredentials)
        ));

        directory.register("bob", "pw", None).unwrap();
        assert!(matches!(
            directory.register("bob", "other", None),
            Err(DirectoryError::UsernameTaken)
        ));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_login_rejections() {
        let directory = JsonFileDirectory::in_memory(TEST_COST);
        directory.register("carol", "right", None).unwrap();

        assert!(matches!(
            directory.login("dave", "right"),
            Err(DirectoryError::UnknownUser)
        ));
        assert!(matches!(
            directory.login("carol", "wrong"),
            Err(DirectoryError::WrongPassword)
        ));
    }

    #[test]
    fn test_persisted_accounts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");

        let directory = JsonFileDirectory::open(&path, TEST_COST).unwrap();
        assert!(directory.is_empty());
        directory.register("erin", "pw", None).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("erin"));
        assert!(!contents.contains("\"pw\""));

        let reopened = JsonFileDirectory::open(&path, TEST_COST).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.login("erin", "pw").is_ok());
    }

    #[test]
    fn test_open_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            JsonFileDirectory::open(&path, TEST_COST),
            Err(DirectoryError::Storage(_))
        ));
    }
}
