use std::collections::HashMap;

use async_trait::async_trait;
use provisio_application::{IdentityLock, IdentityStore};
use provisio_core::{AppError, AppResult};
use provisio_domain::Identity;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

/// In-memory identity store with per-identity exclusive locks.
///
/// A lock is owned by a holder name; the same holder may take it again.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    identities: RwLock<HashMap<String, Identity>>,
    locks: Mutex<HashMap<String, String>>,
}

impl InMemoryIdentityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts identities without going through the lock discipline.
    pub async fn seed(&self, identities: impl IntoIterator<Item = Identity>) {
        let mut stored = self.identities.write().await;
        for identity in identities {
            let identity = with_store_id(identity);
            stored.insert(identity.name.clone(), identity);
        }
    }

    /// Returns the current lock holder of an identity.
    pub async fn lock_holder(&self, name: &str) -> Option<String> {
        self.locks.lock().await.get(name).cloned()
    }

    async fn release(&self, name: &str) {
        if self.locks.lock().await.remove(name).is_some() {
            debug!(identity = %name, "identity lock released");
        }
    }
}

fn with_store_id(identity: Identity) -> Identity {
    if identity.is_persisted() {
        identity
    } else {
        identity.with_id(Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_identity(&self, name: &str) -> AppResult<Option<Identity>> {
        Ok(self.identities.read().await.get(name).cloned())
    }

    async fn lock_identity(&self, name: &str, holder: &str) -> AppResult<IdentityLock> {
        let mut locks = self.locks.lock().await;
        let Some(identity) = self.identities.read().await.get(name).cloned() else {
            locks.remove(name);
            return Ok(IdentityLock::Evaporated);
        };

        match locks.get(name) {
            Some(current) if current != holder => Err(AppError::Conflict(format!(
                "identity '{name}' is locked by '{current}'"
            ))),
            _ => {
                locks.insert(name.to_owned(), holder.to_owned());
                debug!(identity = %name, holder = %holder, "identity locked");
                Ok(IdentityLock::Locked(identity))
            }
        }
    }

    async fn save_identity(&self, identity: Identity) -> AppResult<Identity> {
        let identity = with_store_id(identity);
        self.identities
            .write()
            .await
            .insert(identity.name.clone(), identity.clone());
        Ok(identity)
    }

    async fn unlock_identity(&self, identity: Identity) -> AppResult<Identity> {
        let name = identity.name.clone();
        let saved = self.save_identity(identity).await?;
        self.release(name.as_str()).await;
        Ok(saved)
    }

    async fn delete_identity(&self, name: &str) -> AppResult<()> {
        if self.identities.write().await.remove(name).is_none() {
            return Err(AppError::NotFound(format!("identity '{name}' does not exist")));
        }
        self.release(name).await;
        Ok(())
    }

    async fn decache(&self, name: &str) -> AppResult<()> {
        self.release(name).await;
        Ok(())
    }
}
