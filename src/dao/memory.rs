use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt};

use crate::dao::{
    storage::{StorageError, StorageResult},
    store::{MatchStore, SavePatch, StoredProfile},
};

/// Store keeping the profile in process memory.
///
/// Used by tests and as the fallback when no durable store is configured.
#[derive(Clone, Default)]
pub struct MemoryStore {
    profile: Arc<Mutex<StoredProfile>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `profile`.
    pub fn with_profile(profile: StoredProfile) -> Self {
        Self {
            profile: Arc::new(Mutex::new(profile)),
        }
    }

    /// Copy of the current profile.
    pub fn profile(&self) -> StoredProfile {
        self.profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MatchStore for MemoryStore {
    fn load(&self) -> BoxFuture<'static, StorageResult<StoredProfile>> {
        let profile = self.profile();
        async move { Ok(profile) }.boxed()
    }

    fn save(&self, patch: SavePatch) -> BoxFuture<'static, StorageResult<()>> {
        let result = self
            .profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(patch)
            .map_err(|source| StorageError::Corrupt {
                message: "in-memory profile".into(),
                source,
            });
        async move { result }.boxed()
    }
}
