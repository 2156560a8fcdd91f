use std::path::{Path, PathBuf};

use futures::StreamExt;
use sha1::{Digest, Sha1};
use tokio::fs::{create_dir_all, remove_file, rename, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::maven::coordinates::*;
use crate::maven::metadata_xml::{apply_operations, AddVersionOperation, Metadata, MetadataOperation};
use crate::maven::paths::*;
use crate::repo::local_reader::exists;
use crate::repo::LocalRepository;
use crate::util::stream_verifier::CHUNK_SIZE;

/// Stores resolved artifacts in a local Maven2 layout repository, together with `.sha1` / `.md5`
///  signature files, the artifact's POM and the group/artifact level `maven-metadata.xml`.
///
/// Writing is idempotent: an artifact that is already present is left alone, a missing POM or
///  metadata entry is still added. Files become visible only once they are complete, and
///  binaries only after their signature files.
pub struct LocalRepositoryWriter {
    id: RepositoryId,
    root: PathBuf,
    metadata_lock: Mutex<()>,
}

/// Fills in group and artifact id of a fresh document
struct SetCoordinatesOperation<'a> {
    coordinates: &'a ArtifactCoordinates,
}
impl MetadataOperation for SetCoordinatesOperation<'_> {
    fn perform(&self, metadata: &mut Metadata) -> Result<bool, RepositoryError> {
        let mut changed = false;
        if metadata.group_id.is_none() {
            metadata.group_id = Some(self.coordinates.group_id.clone());
            changed = true;
        }
        if metadata.artifact_id.is_none() {
            metadata.artifact_id = Some(self.coordinates.artifact_id.clone());
            changed = true;
        }
        Ok(changed)
    }
}

impl LocalRepositoryWriter {
    pub fn new(repository: &LocalRepository) -> Result<LocalRepositoryWriter, RepositoryError> {
        if repository.read_only {
            return Err(RepositoryError::Config(format!("repository {} is read only", repository.id)));
        }
        Ok(LocalRepositoryWriter {
            id: repository.id.clone(),
            root: repository.directory.clone(),
            metadata_lock: Mutex::new(()),
        })
    }

    pub async fn write_artifacts(&self, artifacts: &[Artifact]) -> Result<(), RepositoryError> {
        for artifact in artifacts {
            self.write_artifact(artifact).await?;
        }
        Ok(())
    }

    async fn write_artifact(&self, artifact: &Artifact) -> Result<(), RepositoryError> {
        let coordinates = &artifact.metadata.coordinates;
        let target = self.root.join(as_maven_path(coordinates));

        if artifact.file == target {
            return Ok(());
        }
        if exists(&target).await? {
            trace!("{} is already present in repository {}", artifact.metadata, self.id);
        }
        else {
            debug!("writing {} to repository {}", artifact.metadata, self.id);
            let source = File::open(&artifact.file).await
                .map_err(|e| RepositoryError::read(&artifact.file, e))?;
            Self::write_signed(&target, ReaderStream::with_capacity(source, CHUNK_SIZE)).await?;
        }

        if let Some(pom) = &artifact.pom_blob {
            let pom_file = self.root.join(pom_path(coordinates));
            if !exists(&pom_file).await? {
                Self::write_signed(&pom_file, Self::single_chunk(pom)).await?;
            }
        }

        self.update_ga_metadata(coordinates).await
    }

    async fn update_ga_metadata(&self, coordinates: &ArtifactCoordinates) -> Result<(), RepositoryError> {
        let _guard = self.metadata_lock.lock().await;

        let path = self.root.join(ga_metadata_path(coordinates));
        let original = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(RepositoryError::read(path, e)),
        };

        let add_version = AddVersionOperation {
            version: version_directory(&coordinates.version),
        };
        let set_coordinates = SetCoordinatesOperation { coordinates };

        let operations: [&dyn MetadataOperation; 2] = [&set_coordinates, &add_version];
        let updated = apply_operations(&original, &operations)?;
        if updated != original {
            Self::write_bytes(&path, &updated).await?;
        }
        Ok(())
    }

    fn single_chunk(data: &[u8]) -> impl futures::Stream<Item = std::io::Result<bytes::Bytes>> + Unpin {
        futures::stream::iter([Ok(bytes::Bytes::copy_from_slice(data))])
    }

    async fn write_bytes(target: &Path, data: &[u8]) -> Result<(), RepositoryError> {
        let staged = Self::stage(target, Self::single_chunk(data)).await?;
        Self::commit(staged, target).await
    }

    /// Writes a file together with its `.sha1` and `.md5` signature files. The signatures are in
    ///  place before the file itself becomes visible.
    async fn write_signed<S>(target: &Path, data: S) -> Result<(), RepositoryError>
    where
        S: futures::Stream<Item = std::io::Result<bytes::Bytes>> + Unpin,
    {
        let staged = Self::stage(target, data).await?;

        let signatures = async {
            Self::write_bytes(&signature_path(target, "sha1"), hex::encode(staged.sha1).as_bytes()).await?;
            Self::write_bytes(&signature_path(target, "md5"), hex::encode(staged.md5).as_bytes()).await
        }.await;

        match signatures {
            Ok(()) => Self::commit(staged, target).await,
            Err(e) => {
                Self::discard(&staged.temp_path).await;
                Err(e)
            }
        }
    }

    /// Writes a stream to a temporary file next to `target`, computing SHA1 and MD5 digests on
    ///  the way
    async fn stage<S>(target: &Path, mut data: S) -> Result<Staged, RepositoryError>
    where
        S: futures::Stream<Item = std::io::Result<bytes::Bytes>> + Unpin,
    {
        if let Some(parent) = target.parent() {
            create_dir_all(parent).await
                .map_err(|e| RepositoryError::write(parent, e))?;
        }

        let temp_path = target.with_file_name(format!(
            "{}.{}.inserting",
            target.file_name().and_then(|n| n.to_str()).unwrap_or("artifact"),
            Uuid::new_v4().as_hyphenated(),
        ));

        let result = async {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;

            let mut sha1_hasher: Sha1 = Default::default();
            let mut md5_hasher = md5::Context::new();

            while let Some(chunk) = data.next().await {
                let chunk = chunk?;
                sha1_hasher.update(&chunk);
                md5_hasher.consume(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;

            let sha1: [u8; 20] = sha1_hasher.finalize().into();
            let md5: [u8; 16] = md5_hasher.compute().into();
            Ok::<_, std::io::Error>((sha1, md5))
        }.await;

        match result {
            Ok((sha1, md5)) => Ok(Staged { temp_path, sha1, md5 }),
            Err(e) => {
                Self::discard(&temp_path).await;
                Err(RepositoryError::write(target, e))
            }
        }
    }

    async fn commit(staged: Staged, target: &Path) -> Result<(), RepositoryError> {
        if let Err(e) = rename(&staged.temp_path, target).await {
            Self::discard(&staged.temp_path).await;
            return Err(RepositoryError::write(target, e));
        }
        Ok(())
    }

    async fn discard(temp_path: &Path) {
        if let Err(e) = remove_file(temp_path).await {
            error!("error cleaning up {} after failed write: {}", temp_path.display(), e);
        }
    }
}

/// A completely written temporary file, not yet renamed to its target
struct Staged {
    temp_path: PathBuf,
    sha1: [u8; 20],
    md5: [u8; 16],
}
