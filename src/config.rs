//! JSON configuration of a [VirtualRepositoryReader], e.g.
//!
//! ```json
//! {
//!   "repositories": [
//!     { "kind": "local", "id": "local", "directory": "/home/me/.m2/repository" },
//!     { "kind": "remote", "id": "central", "url": "https://repo1.maven.org/maven2",
//!       "quality_range": { "min": "release", "max": "release" },
//!       "verifiers": [ { "algorithm": "sha1", "sufficient": true } ] }
//!   ],
//!   "parallel_threshold": 5,
//!   "metadata_expiry_secs": 86400
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::maven::version::QualityRange;
use crate::repo::{LocalRepository, RemoteRepository, Repository};
use crate::repo::virtual_reader::{default_metadata_expiry, VirtualRepositoryReader, DEFAULT_PARALLEL_THRESHOLD};
use crate::util::stream_verifier::{DigestAlgorithm, DigestVerifierFactory, StreamVerifierFactory};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierConfig {
    pub algorithm: DigestAlgorithm,
    #[serde(default)]
    pub lenient: bool,
    #[serde(default)]
    pub sufficient: bool,
}
impl VerifierConfig {
    fn factory(&self) -> Arc<dyn StreamVerifierFactory> {
        Arc::new(DigestVerifierFactory {
            algorithm: self.algorithm,
            lenient: self.lenient,
            sufficient: self.sufficient,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RepositoryConfig {
    Local {
        id: String,
        directory: PathBuf,
        #[serde(default)]
        read_only: bool,
        #[serde(default)]
        quality_range: QualityRange,
        #[serde(default)]
        verifiers: Vec<VerifierConfig>,
    },
    Remote {
        id: String,
        url: String,
        #[serde(default)]
        quality_range: QualityRange,
        #[serde(default)]
        verifiers: Vec<VerifierConfig>,
        /// defaults to a directory below the system's temp directory
        #[serde(default)]
        staging_directory: Option<PathBuf>,
    },
}
impl RepositoryConfig {
    pub fn to_repository(&self) -> Repository {
        let factories = |verifiers: &[VerifierConfig]| verifiers.iter().map(|v| v.factory()).collect::<Vec<_>>();

        match self {
            RepositoryConfig::Local { id, directory, read_only, quality_range, verifiers } => {
                let mut repository = LocalRepository::new(id, directory);
                repository.read_only = *read_only;
                repository.quality_range = *quality_range;
                repository.verifier_factories = factories(verifiers);
                Repository::Local(repository)
            }
            RepositoryConfig::Remote { id, url, quality_range, verifiers, staging_directory } => {
                let mut repository = RemoteRepository::new(id, url);
                repository.quality_range = *quality_range;
                repository.verifier_factories = factories(verifiers);
                if let Some(staging_directory) = staging_directory {
                    repository.staging_directory = staging_directory.clone();
                }
                Repository::Remote(repository)
            }
        }
    }
}

fn default_parallel_threshold() -> usize {
    DEFAULT_PARALLEL_THRESHOLD
}

fn default_metadata_expiry_secs() -> i64 {
    default_metadata_expiry().num_seconds()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    #[serde(default = "default_metadata_expiry_secs")]
    pub metadata_expiry_secs: i64,
}
impl ResolverConfig {
    pub fn from_json(json: &str) -> anyhow::Result<ResolverConfig> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<ResolverConfig> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading resolver configuration {}", path.display()))?;
        Self::from_json(&json)
            .with_context(|| format!("parsing resolver configuration {}", path.display()))
    }

    /// An uninitialized virtual reader with all configured repositories
    pub fn build(&self) -> anyhow::Result<VirtualRepositoryReader> {
        let reader = VirtualRepositoryReader::new()
            .with_parallel_threshold(self.parallel_threshold)
            .with_metadata_expiry(chrono::Duration::seconds(self.metadata_expiry_secs));

        for repository in &self.repositories {
            let repository = repository.to_repository();
            debug!("configuring repository {}", repository.id());
            reader.add_repository(repository)?;
        }
        Ok(reader)
    }
}
