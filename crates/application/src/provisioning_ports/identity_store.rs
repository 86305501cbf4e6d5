use async_trait::async_trait;
use provisio_core::AppResult;
use provisio_domain::Identity;

/// Outcome of locking an identity.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityLock {
    /// The identity is locked for the caller.
    Locked(Identity),
    /// The identity was deleted before the lock was taken.
    Evaporated,
}

/// Store port for identities with pessimistic per-identity locks.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Returns one identity without locking it.
    async fn find_identity(&self, name: &str) -> AppResult<Option<Identity>>;

    /// Takes the exclusive lock on one identity.
    ///
    /// Fails with a conflict when another holder owns the lock.
    async fn lock_identity(&self, name: &str, holder: &str) -> AppResult<IdentityLock>;

    /// Saves an identity, assigning a store id to new ones.
    async fn save_identity(&self, identity: Identity) -> AppResult<Identity>;

    /// Saves, commits and releases the lock of an identity.
    async fn unlock_identity(&self, identity: Identity) -> AppResult<Identity>;

    /// Deletes an identity and any lock on it.
    async fn delete_identity(&self, name: &str) -> AppResult<()>;

    /// Releases any lock without saving and drops cached state.
    async fn decache(&self, name: &str) -> AppResult<()>;
}
