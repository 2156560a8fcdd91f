use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::fs::{create_dir_all, remove_file, rename, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{error, trace, warn};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::maven::coordinates::{ArtifactCoordinates, RepositoryId};
use crate::maven::gav_metadata::GAVMetadata;
use crate::maven::paths::{group_path, version_directory};

/// Directory below a local repository's root holding the metadata cache
pub const METADATA_CACHE_DIR: &str = ".cache";

const GAV_FILE_NAME: &str = "gav.json";

/// Remembers GAV metadata (known snapshots and classifiers) of remote repositories. Entries are
///  kept per repository.
#[async_trait]
pub trait MetadataCache: Send + Sync {
    /// `Ok(None)` on a cache miss. Stale entries are returned with `is_expired() == true`.
    async fn find_gav(&self, repository: &RepositoryId, coordinates: &ArtifactCoordinates) -> Result<Option<GAVMetadata>, RepositoryError>;

    async fn update_gav(&self, repository: &RepositoryId, metadata: &GAVMetadata) -> Result<(), RepositoryError>;
}

/// Stores one JSON file per repository and GAV:
///  `<root>/<repository id>/<group with slashes>/<artifactId>/<version directory>/gav.json`
pub struct FsMetadataCache {
    root: PathBuf,
    expiry: Duration,
}
impl FsMetadataCache {
    pub fn new(root: impl Into<PathBuf>, expiry: Duration) -> FsMetadataCache {
        FsMetadataCache {
            root: root.into(),
            expiry,
        }
    }

    /// The cache of a local repository, at `<repository root>/.cache`
    pub fn for_repository(repository_root: &Path, expiry: Duration) -> FsMetadataCache {
        FsMetadataCache::new(repository_root.join(METADATA_CACHE_DIR), expiry)
    }

    fn path_for(&self, repository: &RepositoryId, coordinates: &ArtifactCoordinates) -> PathBuf {
        self.root
            .join(&repository.0)
            .join(group_path(&coordinates.group_id))
            .join(&coordinates.artifact_id)
            .join(version_directory(&coordinates.version))
            .join(GAV_FILE_NAME)
    }
}

#[async_trait]
impl MetadataCache for FsMetadataCache {
    async fn find_gav(&self, repository: &RepositoryId, coordinates: &ArtifactCoordinates) -> Result<Option<GAVMetadata>, RepositoryError> {
        let path = self.path_for(repository, coordinates);
        let json = match tokio::fs::read(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RepositoryError::read(path, e)),
        };

        let mut metadata: GAVMetadata = match serde_json::from_slice(&json) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("ignoring corrupt metadata cache entry {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        if Utc::now() - metadata.last_check() > self.expiry {
            trace!("metadata cache entry {} expired", path.display());
            metadata.set_expired(true);
        }
        Ok(Some(metadata))
    }

    async fn update_gav(&self, repository: &RepositoryId, metadata: &GAVMetadata) -> Result<(), RepositoryError> {
        let path = self.path_for(repository, metadata.coordinates());
        let json = serde_json::to_vec(metadata)
            .map_err(|e| RepositoryError::Metadata(format!("cannot serialize GAV metadata for {}: {}", metadata.coordinates(), e)))?;

        if let Some(parent) = path.parent() {
            create_dir_all(parent).await
                .map_err(|e| RepositoryError::write(parent, e))?;
        }

        let temp_path = path.with_file_name(format!("{}.{}.writing", GAV_FILE_NAME, Uuid::new_v4().as_hyphenated()));
        let result = async {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(&json).await?;
            file.flush().await?;
            rename(&temp_path, &path).await
        }.await;

        if let Err(e) = result {
            if let Err(cleanup) = remove_file(&temp_path).await {
                error!("error cleaning up {} after failed cache write: {}", temp_path.display(), cleanup);
            }
            return Err(RepositoryError::write(path, e));
        }
        trace!("updated metadata cache entry {}", path.display());
        Ok(())
    }
}
