use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use futures::future::{BoxFuture, FutureExt};
use tokio::{fs, sync::Mutex};
use tracing::debug;

use crate::{
    config::FileStoreConfig,
    dao::{
        storage::{StorageError, StorageResult},
        store::{MatchStore, SavePatch, StoredProfile},
    },
};

/// Store persisting the profile as a single JSON document on disk.
///
/// Writes go to a sibling temporary file that is renamed over the target so a
/// crash mid-write never leaves a truncated document behind.
#[derive(Clone)]
pub struct JsonFileStore {
    path: Arc<PathBuf>,
    write_gate: Arc<Mutex<()>>,
}

impl JsonFileStore {
    /// Store backed by `path`; the file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Store backed by the configured path.
    pub fn from_config(config: &FileStoreConfig) -> Self {
        Self::new(config.path.clone())
    }

    async fn read(path: &PathBuf) -> StorageResult<StoredProfile> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no stored profile yet");
                return Ok(StoredProfile::default());
            }
            Err(err) => {
                return Err(StorageError::unavailable(
                    format!("reading `{}`", path.display()),
                    err,
                ));
            }
        };

        serde_json::from_str(&contents).map_err(|source| StorageError::Corrupt {
            message: format!("`{}`", path.display()),
            source,
        })
    }

    async fn write(path: &PathBuf, profile: &StoredProfile) -> StorageResult<()> {
        let body = serde_json::to_vec_pretty(profile).map_err(|source| StorageError::Corrupt {
            message: "serializing profile".into(),
            source,
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|err| {
                StorageError::unavailable(format!("creating `{}`", parent.display()), err)
            })?;
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .await
            .map_err(|err| StorageError::unavailable(format!("writing `{}`", tmp.display()), err))?;
        fs::rename(&tmp, path).await.map_err(|err| {
            StorageError::unavailable(format!("replacing `{}`", path.display()), err)
        })
    }
}

impl MatchStore for JsonFileStore {
    fn load(&self) -> BoxFuture<'static, StorageResult<StoredProfile>> {
        let path = self.path.clone();
        async move { Self::read(&path).await }.boxed()
    }

    fn save(&self, patch: SavePatch) -> BoxFuture<'static, StorageResult<()>> {
        let path = self.path.clone();
        let gate = self.write_gate.clone();
        async move {
            let _guard = gate.lock().await;
            // A corrupt document is replaced rather than blocking every later save.
            let mut profile = match Self::read(&path).await {
                Ok(profile) => profile,
                Err(StorageError::Corrupt { .. }) => StoredProfile::default(),
                Err(err) => return Err(err),
            };
            profile
                .apply(patch)
                .map_err(|source| StorageError::Corrupt {
                    message: "serializing match".into(),
                    source,
                })?;
            Self::write(&path, &profile).await
        }
        .boxed()
    }
}
