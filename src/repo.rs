//! Repository readers: a Maven2 layout directory, a remote Maven2 repository, and the virtual
//!  reader aggregating any number of them.

pub mod local_reader;
pub mod local_writer;
pub mod metadata_cache;
pub mod processors;
pub mod remote_reader;
pub mod results;
pub mod virtual_reader;

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::RepositoryError;
use crate::maven::coordinates::{BasicMetadata, RepositoryId};
use crate::maven::version::QualityRange;
use crate::repo::local_reader::LocalRepositoryReader;
use crate::repo::metadata_cache::MetadataCache;
use crate::repo::processors::DependencyProcessor;
use crate::repo::remote_reader::RemoteRepositoryReader;
use crate::repo::results::{ArtifactBasicResults, ArtifactResults};
use crate::util::stream_verifier::StreamVerifierFactory;

/// A Maven2 layout repository in the local file system
#[derive(Clone)]
pub struct LocalRepository {
    pub id: RepositoryId,
    pub directory: PathBuf,
    pub read_only: bool,
    pub quality_range: QualityRange,
    /// verifiers for files read from this repository
    pub verifier_factories: Vec<Arc<dyn StreamVerifierFactory>>,
}
impl LocalRepository {
    pub fn new(id: &str, directory: impl Into<PathBuf>) -> LocalRepository {
        LocalRepository {
            id: RepositoryId(id.to_string()),
            directory: directory.into(),
            read_only: false,
            quality_range: QualityRange::ALL,
            verifier_factories: Vec::new(),
        }
    }

    pub fn read_only(mut self) -> LocalRepository {
        self.read_only = true;
        self
    }
}

/// A Maven2 layout repository served over HTTP(S)
#[derive(Clone)]
pub struct RemoteRepository {
    pub id: RepositoryId,
    pub url: String,
    pub quality_range: QualityRange,
    pub verifier_factories: Vec<Arc<dyn StreamVerifierFactory>>,
    /// downloaded files are placed here before they are verified and handed out
    pub staging_directory: PathBuf,
}
impl RemoteRepository {
    pub fn new(id: &str, url: &str) -> RemoteRepository {
        RemoteRepository {
            id: RepositoryId(id.to_string()),
            url: url.to_string(),
            quality_range: QualityRange::ALL,
            verifier_factories: Vec::new(),
            staging_directory: std::env::temp_dir().join("arti-resolver").join(id),
        }
    }
}

#[derive(Clone)]
pub enum Repository {
    Local(LocalRepository),
    Remote(RemoteRepository),
}
impl Repository {
    pub fn id(&self) -> &RepositoryId {
        match self {
            Repository::Local(r) => &r.id,
            Repository::Remote(r) => &r.id,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Repository::Local(_))
    }

    pub fn reader(
        &self,
        processor: Arc<dyn DependencyProcessor>,
        cache: Option<Arc<dyn MetadataCache>>,
    ) -> Result<RepositoryReader, RepositoryError> {
        Ok(match self {
            Repository::Local(r) => RepositoryReader::Local(LocalRepositoryReader::new(r.clone(), processor)?),
            Repository::Remote(r) => RepositoryReader::Remote(RemoteRepositoryReader::new(r.clone(), processor, cache)?),
        })
    }
}

/// A backend reader. An unknown origin (`BasicMetadata::origin == None`) plays the role of the
///  "null reader".
pub enum RepositoryReader {
    Local(LocalRepositoryReader),
    Remote(RemoteRepositoryReader),
}

macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            RepositoryReader::Local(r) => r.$method($($arg),*).await,
            RepositoryReader::Remote(r) => r.$method($($arg),*).await,
        }
    };
}

impl RepositoryReader {
    pub fn id(&self) -> &RepositoryId {
        match self {
            RepositoryReader::Local(r) => r.id(),
            RepositoryReader::Remote(r) => r.id(),
        }
    }

    pub async fn read_artifacts(&self, query: &[BasicMetadata]) -> Result<ArtifactResults, RepositoryError> {
        delegate!(self, read_artifacts, query)
    }

    pub async fn read_versions(&self, query: &[BasicMetadata]) -> Result<ArtifactBasicResults, RepositoryError> {
        delegate!(self, read_versions, query)
    }

    pub async fn read_dependencies(&self, query: &[BasicMetadata]) -> Result<ArtifactBasicResults, RepositoryError> {
        delegate!(self, read_dependencies, query)
    }

    pub async fn read_raw_data(&self, metadata: &BasicMetadata, classifier: &str, file_type: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        delegate!(self, read_raw_data, metadata, classifier, file_type)
    }
}
