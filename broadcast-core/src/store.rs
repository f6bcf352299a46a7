//! Subscriber snapshots.

use std::{fmt::Debug, io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    error::BroadcastError,
    model::{Location, User},
};

#[async_trait]
pub trait UserStore: Send + Sync + Debug {
    /// Every current subscriber, fully materialized.
    async fn get_all(&self) -> Result<Vec<User>, BroadcastError>;
}

/// Fixed list of users; handy for tests and one-off runs.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: Vec<User>,
}

impl InMemoryUserStore {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_all(&self) -> Result<Vec<User>, BroadcastError> {
        Ok(self.users.clone())
    }
}

/// Users persisted as a JSON array. A missing file means no subscribers.
#[derive(Debug)]
pub struct JsonUserStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonUserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    async fn read(&self) -> Result<Vec<User>, BroadcastError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BroadcastError::UserStore(format!(
                    "Failed to read users file {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_str(&contents).map_err(|e| {
            BroadcastError::UserStore(format!(
                "Failed to parse users file {}: {e}",
                self.path.display()
            ))
        })
    }

    async fn write(&self, users: &[User]) -> Result<(), BroadcastError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BroadcastError::UserStore(format!(
                    "Failed to create users directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let json = serde_json::to_string_pretty(users)
            .map_err(|e| BroadcastError::UserStore(format!("Failed to serialize users: {e}")))?;

        tokio::fs::write(&self.path, json).await.map_err(|e| {
            BroadcastError::UserStore(format!(
                "Failed to write users file {}: {e}",
                self.path.display()
            ))
        })
    }

    /// Register a new subscriber or move an existing one to `location`.
    /// Returns the stored user.
    pub async fn upsert(&self, user_id: &str, location: Location) -> Result<User, BroadcastError> {
        let _guard = self.write_lock.lock().await;
        let mut users = self.read().await?;

        let user = match users.iter_mut().find(|u| u.user_id == user_id) {
            Some(existing) => {
                existing.update_location(location);
                existing.clone()
            }
            None => {
                let user = User::new(user_id, location);
                users.push(user.clone());
                user
            }
        };

        self.write(&users).await?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for JsonUserStore {
    async fn get_all(&self) -> Result<Vec<User>, BroadcastError> {
        self.read().await
    }
}
