//! Aggregates any number of backend repositories behind one reader.
//!
//! Backends are queried local-first. Every result is tagged with the repository that produced it
//!  (its origin), and later lookups of a coordinate with a known origin go straight to that
//!  repository. Artifacts found anywhere are written through to the first writable local
//!  repository, which also hosts the remote readers' metadata cache.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Duration;
use futures::future::join_all;
use tracing::{debug, trace, warn};

use crate::error::{Missing, RepositoryError};
use crate::maven::coordinates::*;
use crate::maven::version::{classify, compare, Quality};
use crate::repo::{Repository, RepositoryReader};
use crate::repo::local_writer::LocalRepositoryWriter;
use crate::repo::metadata_cache::{FsMetadataCache, MetadataCache};
use crate::repo::processors::*;
use crate::repo::results::{ArtifactBasicResults, ArtifactResults};

/// Batches larger than this are sent to the backends concurrently
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 5;

/// Default age after which cached GAV metadata is refreshed from remote repositories
pub fn default_metadata_expiry() -> Duration {
    Duration::hours(24)
}

struct Backends {
    readers: Vec<RepositoryReader>,
    writer: Option<LocalRepositoryWriter>,
    // kept for the lifetime of the readers sharing it
    _cache: Option<Arc<dyn MetadataCache>>,
}
impl Backends {
    fn reader(&self, origin: Option<&RepositoryId>) -> Option<&RepositoryReader> {
        let origin = origin?;
        self.readers.iter().find(|r| r.id() == origin)
    }
}

enum Lifecycle {
    Uninitialized(Vec<Repository>),
    Initialized(Arc<Backends>),
}

pub struct VirtualRepositoryReader {
    lifecycle: Mutex<Lifecycle>,
    processor: Arc<dyn DependencyProcessor>,
    list_processors: HashMap<String, Mutex<Box<dyn ArtifactListProcessor>>>,
    parallel_threshold: usize,
    metadata_expiry: Duration,
}

impl Default for VirtualRepositoryReader {
    fn default() -> Self {
        VirtualRepositoryReader::new()
    }
}

impl VirtualRepositoryReader {
    pub fn new() -> VirtualRepositoryReader {
        VirtualRepositoryReader {
            lifecycle: Mutex::new(Lifecycle::Uninitialized(Vec::new())),
            processor: Arc::new(NullDependencyProcessor),
            list_processors: HashMap::new(),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            metadata_expiry: default_metadata_expiry(),
        }
    }

    pub fn with_dependency_processor(mut self, processor: Arc<dyn DependencyProcessor>) -> VirtualRepositoryReader {
        self.processor = processor;
        self
    }

    pub fn with_parallel_threshold(mut self, parallel_threshold: usize) -> VirtualRepositoryReader {
        self.parallel_threshold = parallel_threshold;
        self
    }

    pub fn with_metadata_expiry(mut self, expiry: Duration) -> VirtualRepositoryReader {
        self.metadata_expiry = expiry;
        self
    }

    /// Registers a post-processor for query result lists, e.g. [FUNCTION_TP] for version lists
    pub fn with_list_processor(mut self, function: &str, processor: Box<dyn ArtifactListProcessor>) -> VirtualRepositoryReader {
        self.list_processors.insert(function.to_string(), Mutex::new(processor));
        self
    }

    pub fn add_repository(&self, repository: Repository) -> Result<(), RepositoryError> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *lifecycle {
            Lifecycle::Uninitialized(repositories) => {
                repositories.push(repository);
                Ok(())
            }
            Lifecycle::Initialized(_) => Err(RepositoryError::Lifecycle(format!(
                "cannot add repository {} after initialization", repository.id()
            ))),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner), Lifecycle::Initialized(_))
    }

    /// Creates the backend readers. Only the first call has an effect; it is done implicitly by
    ///  all read operations.
    pub fn init(&self) -> Result<(), RepositoryError> {
        self.backends().map(|_| ())
    }

    fn backends(&self) -> Result<Arc<Backends>, RepositoryError> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        let backends = match &*lifecycle {
            Lifecycle::Initialized(backends) => return Ok(backends.clone()),
            Lifecycle::Uninitialized(repositories) => Arc::new(self.create_backends(repositories)?),
        };
        *lifecycle = Lifecycle::Initialized(backends.clone());
        Ok(backends)
    }

    fn create_backends(&self, repositories: &[Repository]) -> Result<Backends, RepositoryError> {
        let mut ids = HashSet::new();
        for repository in repositories {
            if !ids.insert(repository.id()) {
                return Err(RepositoryError::Config(format!("duplicate repository id {}", repository.id())));
            }
        }

        let ordered: Vec<&Repository> = repositories.iter().filter(|r| r.is_local())
            .chain(repositories.iter().filter(|r| !r.is_local()))
            .collect();

        let mut writer = None;
        let mut cache: Option<Arc<dyn MetadataCache>> = None;
        for repository in &ordered {
            if let Repository::Local(local) = repository {
                if !local.read_only {
                    writer = Some(LocalRepositoryWriter::new(local)?);
                    cache = Some(Arc::new(FsMetadataCache::for_repository(&local.directory, self.metadata_expiry)));
                    break;
                }
            }
        }

        let readers = ordered.iter()
            .map(|r| r.reader(self.processor.clone(), cache.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("initialized virtual reader with repositories {:?}", readers.iter().map(|r| r.id().0.as_str()).collect::<Vec<_>>());

        Ok(Backends {
            readers,
            writer,
            _cache: cache,
        })
    }

    fn parallel(&self, query_size: usize) -> bool {
        query_size > self.parallel_threshold
    }

    pub async fn read_versions(&self, query: &[BasicMetadata]) -> Result<ArtifactBasicResults, RepositoryError> {
        if query.is_empty() {
            return Err(RepositoryError::InvalidQuery("empty version query".to_string()));
        }
        let backends = self.backends()?;

        let per_backend = if self.parallel(query.len()) {
            join_all(backends.readers.iter().map(|r| r.read_versions(query))).await
        }
        else {
            let mut per_backend = Vec::with_capacity(backends.readers.len());
            for reader in &backends.readers {
                per_backend.push(reader.read_versions(query).await);
            }
            per_backend
        };

        let mut result = ArtifactBasicResults::new();
        for (reader, backend_result) in backends.readers.iter().zip(per_backend) {
            let (results, errors) = match backend_result {
                Ok(r) => r.into_parts(),
                Err(e) if e.is_io() => return Err(e),
                Err(e) => {
                    warn!("error reading versions from repository {}: {}", reader.id(), e);
                    continue;
                }
            };

            for (key, list) in results {
                let list = self.process_list(FUNCTION_TP, &key, list)?;
                result.add_all(&key, list.into_iter().map(|m| BasicMetadata {
                    origin: Some(reader.id().clone()),
                    ..m
                }));
            }
            for (key, e) in errors {
                debug!("repository {} could not list versions of {}: {}", reader.id(), key, e);
                result.add_error(&key, e);
            }
        }
        Ok(result)
    }

    fn process_list(&self, function: &str, key: &BasicMetadata, list: Vec<BasicMetadata>) -> Result<Vec<BasicMetadata>, RepositoryError> {
        let processor = match self.list_processors.get(function) {
            Some(p) => p,
            None => return Ok(list),
        };

        let mut processor = processor.lock().unwrap_or_else(PoisonError::into_inner);
        processor.configure(key).map_err(RepositoryError::Processing)?;
        processor.process(list).map_err(RepositoryError::Processing)
    }

    /// The dependencies of a single artifact. An artifact no repository knows has no dependencies.
    pub async fn read_dependencies(&self, metadata: &BasicMetadata) -> Result<ArtifactMetadata, RepositoryError> {
        let backends = self.backends()?;
        let query = [metadata.clone()];

        if let Some(reader) = backends.reader(metadata.origin.as_ref()) {
            let (mut by_key, _) = reader.read_dependencies(&query).await?.into_parts();
            return Ok(ArtifactMetadata {
                metadata: metadata.clone().with_origin(reader.id().clone()),
                dependencies: by_key.remove(metadata).unwrap_or_default(),
            });
        }

        for reader in &backends.readers {
            match reader.read_dependencies(&query).await {
                Ok(results) => {
                    let (mut by_key, _) = results.into_parts();
                    if let Some(dependencies) = by_key.remove(metadata).filter(|d| !d.is_empty()) {
                        trace!("dependencies of {} found in repository {}", metadata, reader.id());
                        return Ok(ArtifactMetadata {
                            metadata: metadata.clone().with_origin(reader.id().clone()),
                            dependencies,
                        });
                    }
                }
                Err(e) if e.is_io() => return Err(e),
                Err(e) => {
                    warn!("error reading dependencies of {} from repository {}: {}", metadata, reader.id(), e);
                }
            }
        }

        Ok(ArtifactMetadata::new(metadata.clone()))
    }

    /// Resolves artifacts. Items with a known origin are read from that repository only, and a
    ///  failure there fails the whole call. All other items are offered to every repository in
    ///  turn until one of them has the artifact. Local I/O errors always fail the call.
    pub async fn read_artifacts(&self, query: &[BasicMetadata]) -> Result<ArtifactResults, RepositoryError> {
        if query.is_empty() {
            return Err(RepositoryError::InvalidQuery("empty artifact query".to_string()));
        }
        let backends = self.backends()?;

        let mut buckets: Vec<(&RepositoryReader, Vec<BasicMetadata>)> = Vec::new();
        let mut rejects = Vec::new();
        for item in query {
            match backends.reader(item.origin.as_ref()) {
                Some(reader) => match buckets.iter_mut().find(|(r, _)| r.id() == reader.id()) {
                    Some((_, items)) => items.push(item.clone()),
                    None => buckets.push((reader, vec![item.clone()])),
                },
                None => rejects.push(item.clone()),
            }
        }

        let mut result = ArtifactResults::new();

        let bucket_results = if self.parallel(query.len()) {
            join_all(buckets.iter().map(|(reader, items)| reader.read_artifacts(items))).await
        }
        else {
            let mut bucket_results = Vec::with_capacity(buckets.len());
            for (reader, items) in &buckets {
                bucket_results.push(reader.read_artifacts(items).await);
            }
            bucket_results
        };

        for ((reader, _), bucket_result) in buckets.iter().zip(bucket_results) {
            let fatal = |message: String| RepositoryError::Repository {
                repository: reader.id().to_string(),
                message,
            };

            let (results, errors) = bucket_result.map_err(|e| fatal(e.to_string()))?.into_parts();
            if let Some((key, e)) = errors.into_iter().next() {
                return Err(fatal(format!("{}: {}", key, e)));
            }
            self.accept(&backends, reader, results, &mut result).await?;
        }

        let mut last_errors: HashMap<BasicMetadata, RepositoryError> = HashMap::new();
        for reader in &backends.readers {
            if rejects.is_empty() {
                break;
            }

            let (results, errors) = match reader.read_artifacts(&rejects).await {
                Ok(r) => r.into_parts(),
                Err(e) if e.is_io() => return Err(e),
                Err(e) => {
                    warn!("error reading artifacts from repository {}: {}", reader.id(), e);
                    continue;
                }
            };

            rejects.retain(|item| !results.get(item).map(|a| !a.is_empty()).unwrap_or(false));
            for (key, e) in errors {
                last_errors.insert(key, e);
            }
            for key in results.keys() {
                last_errors.remove(key);
            }
            self.accept(&backends, reader, results, &mut result).await?;
        }

        for item in rejects {
            let error = last_errors.remove(&item)
                .unwrap_or_else(|| RepositoryError::not_found(Missing::Binary, &item, "any repository"));
            result.add_error(&item, error);
        }
        Ok(result)
    }

    /// Tags results with their origin, writes them through to the local repository and adds them
    ///  to the accumulated result
    async fn accept(
        &self,
        backends: &Backends,
        reader: &RepositoryReader,
        results: HashMap<BasicMetadata, Vec<Artifact>>,
        accumulated: &mut ArtifactResults,
    ) -> Result<(), RepositoryError> {
        for (key, mut artifacts) in results {
            for artifact in artifacts.iter_mut() {
                artifact.metadata.origin = Some(reader.id().clone());
            }
            if let Some(writer) = &backends.writer {
                writer.write_artifacts(&artifacts).await?;
            }
            accumulated.add_all(&key, artifacts);
        }
        Ok(())
    }

    /// The POM of an artifact
    pub async fn read_metadata(&self, metadata: &BasicMetadata) -> Result<Option<Vec<u8>>, RepositoryError> {
        self.read_raw_data(metadata, "", POM_TYPE).await
    }

    /// The first data any repository has for a coordinate, classifier and type. A `-SNAPSHOT`
    ///  version is first resolved to the most recent known version.
    pub async fn read_raw_data(&self, metadata: &BasicMetadata, classifier: &str, file_type: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        let backends = self.backends()?;

        let effective = if classify(metadata.version()) == Quality::Snapshot {
            let versions = self.read_versions(std::slice::from_ref(metadata)).await?;
            versions.result(metadata)
                .and_then(|list| list.iter().max_by(|a, b| compare(a.version(), b.version())))
                .cloned()
                .ok_or_else(|| RepositoryError::MetadataReader(format!("no versions found for {}", metadata)))?
        }
        else {
            metadata.clone()
        };

        let preferred = backends.reader(effective.origin.as_ref());
        let others = backends.readers.iter().filter(|r| Some(r.id()) != preferred.map(|p| p.id()));

        for reader in preferred.into_iter().chain(others) {
            match reader.read_raw_data(&effective, classifier, file_type).await {
                Ok(Some(data)) => return Ok(Some(data)),
                Ok(None) => {}
                Err(e) if e.is_io() => return Err(e),
                Err(e) => {
                    warn!("error reading {} from repository {}: {}", effective, reader.id(), e);
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RawDataSource for VirtualRepositoryReader {
    async fn read_raw_data(&self, metadata: &BasicMetadata, classifier: &str, file_type: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        VirtualRepositoryReader::read_raw_data(self, metadata, classifier, file_type).await
    }
}
