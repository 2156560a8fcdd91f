use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::error::{Missing, RepositoryError};
use crate::maven::coordinates::*;
use crate::maven::gav_metadata::GAVMetadata;
use crate::maven::metadata_xml::{decode, Metadata};
use crate::maven::paths::*;
use crate::maven::version::*;
use crate::repo::metadata_cache::MetadataCache;
use crate::repo::processors::{process_environment, DependencyProcessor, RawDataSource};
use crate::repo::results::{ArtifactBasicResults, ArtifactResults};
use crate::repo::RemoteRepository;
use crate::util::stream_verifier::verify_file;
use crate::util::validating_http_downloader::ValidatingHttpDownloader;

/// Reads from a Maven2 layout repository over HTTP(S). Artifacts are downloaded into the
///  repository's staging directory and verified there.
pub struct RemoteRepositoryReader {
    repository: RemoteRepository,
    downloader: ValidatingHttpDownloader,
    processor: Arc<dyn DependencyProcessor>,
    cache: Option<Arc<dyn MetadataCache>>,
}

fn transport(e: anyhow::Error) -> RepositoryError {
    RepositoryError::Transport(e)
}

impl RemoteRepositoryReader {
    pub fn new(
        repository: RemoteRepository,
        processor: Arc<dyn DependencyProcessor>,
        cache: Option<Arc<dyn MetadataCache>>,
    ) -> Result<RemoteRepositoryReader, RepositoryError> {
        let downloader = ValidatingHttpDownloader::new(&repository.url)
            .map_err(|e| RepositoryError::Config(format!("invalid URL {:?} for repository {}: {}", repository.url, repository.id, e)))?;

        Ok(RemoteRepositoryReader {
            repository,
            downloader,
            processor,
            cache,
        })
    }

    pub fn id(&self) -> &RepositoryId {
        &self.repository.id
    }

    async fn read_metadata_document(&self, path: &str) -> Result<Option<Metadata>, RepositoryError> {
        match self.downloader.get_bytes(path).await.map_err(transport)? {
            Some(bytes) => decode(&bytes),
            None => Ok(None),
        }
    }

    /// The concrete version to download for a requested version
    async fn resolve_version(&self, coordinates: &ArtifactCoordinates) -> Result<String, RepositoryError> {
        let version = coordinates.version.as_str();
        if version == RELEASE_VERSION || version == LATEST_VERSION {
            let releases_only = version == RELEASE_VERSION;

            let metadata = self.read_metadata_document(&ga_metadata_path(coordinates)).await?
                .ok_or_else(|| RepositoryError::not_found(Missing::GroupArtifact, coordinates, ga_metadata_path(coordinates)))?;

            let recorded = metadata.versioning.as_ref()
                .and_then(|v| if releases_only { v.release.clone() } else { v.latest.clone() });

            let chosen = match recorded {
                Some(v) => v,
                None => max_version(
                    metadata.versions().iter()
                        .filter(|v| !releases_only || classify(v) == Quality::Release)
                        .cloned()
                ).ok_or_else(|| RepositoryError::not_found(Missing::Version, coordinates, ga_metadata_path(coordinates)))?,
            };

            if classify(&chosen) == Quality::Snapshot {
                return self.resolve_snapshot(&coordinates.with_version(&chosen)).await;
            }
            return Ok(chosen);
        }

        match classify(version) {
            Quality::Snapshot => self.resolve_snapshot(coordinates).await,
            Quality::SnapshotTs | Quality::Release => Ok(version.to_string()),
        }
    }

    /// Resolves a `-SNAPSHOT` version to the most recent timestamped snapshot, using the metadata
    ///  cache while it is fresh. Falls back to the plain snapshot version if the repository has
    ///  no snapshot descriptor.
    async fn resolve_snapshot(&self, coordinates: &ArtifactCoordinates) -> Result<String, RepositoryError> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.find_gav(&self.repository.id, coordinates).await? {
                if !cached.is_expired() {
                    if let Ok(latest) = cached.latest_snapshot() {
                        trace!("using cached snapshot {} for {}", latest, coordinates);
                        return Ok(latest.to_string());
                    }
                }
            }
        }

        let base_version = base(&coordinates.version);
        let snapshot = self.read_metadata_document(&gav_metadata_path(coordinates)).await?
            .and_then(|m| m.versioning)
            .and_then(|v| v.snapshot);

        let resolved = match snapshot {
            Some(s) => match (s.timestamp, s.build_number) {
                (Some(timestamp), Some(build_number)) => format!("{}-{}-{}", base_version, timestamp, build_number),
                _ => format!("{}{}", base_version, SNAPSHOT_QUALIFIER),
            },
            None => format!("{}{}", base_version, SNAPSHOT_QUALIFIER),
        };

        if let Some(cache) = &self.cache {
            let gav = GAVMetadata::new(
                coordinates.with_version(&version_directory(&coordinates.version)),
                [resolved.clone()],
                Vec::new(),
            );
            if let Err(e) = cache.update_gav(&self.repository.id, &gav).await {
                warn!("failed to update metadata cache for {}: {}", coordinates, e);
            }
        }
        Ok(resolved)
    }

    pub async fn read_artifacts(&self, query: &[BasicMetadata]) -> Result<ArtifactResults, RepositoryError> {
        if query.is_empty() {
            return Err(RepositoryError::InvalidQuery("empty artifact query".to_string()));
        }

        let mut result = ArtifactResults::new();
        for metadata in query {
            match self.read_artifact(metadata).await {
                Ok(artifact) => result.add(metadata, artifact),
                Err(e @ RepositoryError::Read { .. }) => return Err(e),
                Err(e) => {
                    debug!("{}: {}", self.repository.id, e);
                    result.add_error(metadata, e);
                }
            }
        }
        Ok(result)
    }

    async fn read_artifact(&self, metadata: &BasicMetadata) -> Result<Artifact, RepositoryError> {
        let version = self.resolve_version(&metadata.coordinates).await?;
        let coordinates = metadata.coordinates.with_version(&version);

        let relative = as_maven_path(&coordinates);
        let staged = self.staged_path(&relative);

        if !self.downloader.download_to(&relative, &staged).await.map_err(transport)? {
            return Err(RepositoryError::not_found(Missing::Binary, metadata, format!("{}{}", self.downloader.base_uri(), relative)));
        }

        for factory in &self.repository.verifier_factories {
            let extension = factory.new_instance().attributes().extension.trim_start_matches('.').to_string();
            let sidecar = format!("{}.{}", relative, extension);
            let staged_sidecar = self.staged_path(&sidecar);
            if !self.downloader.download_to(&sidecar, &staged_sidecar).await.map_err(transport)? {
                trace!("no {} signature for {}", extension, relative);
                // a sidecar left over from an earlier download must not be used
                match tokio::fs::remove_file(&staged_sidecar).await {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(RepositoryError::write(staged_sidecar, e)),
                    _ => {}
                }
            }
        }

        verify_file(&staged, &self.repository.verifier_factories).await?;

        let pom_blob = if coordinates.file_type == POM_TYPE {
            Some(tokio::fs::read(&staged).await
                .map_err(|e| RepositoryError::read(&staged, e))?)
        }
        else {
            let pom = self.downloader.get_bytes(&pom_path(&coordinates)).await.map_err(transport)?;
            if pom.is_none() {
                warn!("no POM found for {} in repository {}", metadata, self.repository.id);
            }
            pom.map(|b| b.to_vec())
        };

        Ok(Artifact {
            metadata: BasicMetadata {
                coordinates,
                origin: Some(self.repository.id.clone()),
            },
            file: staged,
            pom_blob,
        })
    }

    fn staged_path(&self, relative: &str) -> PathBuf {
        self.repository.staging_directory.join(relative)
    }

    /// Versions listed in each item's group/artifact level `maven-metadata.xml` that match the
    ///  requested version (or range) and this repository's quality range
    pub async fn read_versions(&self, query: &[BasicMetadata]) -> Result<ArtifactBasicResults, RepositoryError> {
        if query.is_empty() {
            return Err(RepositoryError::InvalidQuery("empty version query".to_string()));
        }

        let mut result = ArtifactBasicResults::new();
        for metadata in query {
            let document = match self.read_metadata_document(&ga_metadata_path(&metadata.coordinates)).await {
                Ok(Some(document)) => document,
                Ok(None) => continue,
                Err(e) => {
                    result.add_error(metadata, e);
                    continue;
                }
            };

            let range = match VersionRange::parse(metadata.version(), self.repository.quality_range) {
                Ok(range) => range,
                Err(e) => {
                    result.add_error(metadata, e);
                    continue;
                }
            };

            for version in document.versions() {
                if range.includes(version) {
                    result.add(metadata, BasicMetadata {
                        coordinates: metadata.coordinates.with_version(version),
                        origin: Some(self.repository.id.clone()),
                    });
                }
            }
        }
        Ok(result)
    }

    pub async fn read_dependencies(&self, query: &[BasicMetadata]) -> Result<ArtifactBasicResults, RepositoryError> {
        let mut result = ArtifactBasicResults::new();
        let environment = process_environment();

        for metadata in query {
            match self.read_raw_data(metadata, "", POM_TYPE).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!("no POM for {} in remote repository {}", metadata, self.repository.id);
                    continue;
                }
                Err(e) => {
                    warn!("error reading POM for {} from remote repository {}: {}", metadata, self.repository.id, e);
                    continue;
                }
            }

            match self.processor.get_dependencies(metadata, self, &environment).await {
                Ok(dependencies) => result.add_all(metadata, dependencies),
                Err(e) => {
                    warn!("error reading {} dependencies: {}", metadata, e);
                }
            }
        }
        Ok(result)
    }

    pub async fn read_raw_data(&self, metadata: &BasicMetadata, classifier: &str, file_type: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        let mut coordinates = metadata.coordinates
            .with_classifier(MavenClassifier::from_str_opt(classifier))
            .with_type(file_type);

        if classify(&coordinates.version) == Quality::Snapshot {
            let resolved = self.resolve_snapshot(&coordinates).await?;
            coordinates = coordinates.with_version(&resolved);
        }

        Ok(self.downloader.get_bytes(&as_maven_path(&coordinates)).await
            .map_err(transport)?
            .map(|b| b.to_vec()))
    }
}

#[async_trait]
impl RawDataSource for RemoteRepositoryReader {
    async fn read_raw_data(&self, metadata: &BasicMetadata, classifier: &str, file_type: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        RemoteRepositoryReader::read_raw_data(self, metadata, classifier, file_type).await
    }
}


#[cfg(test)]
pub(crate) mod test {
    use std::convert::Infallible;
    use std::fs;
    use std::path::Path;

    use chrono::Duration;
    use hyper::{Body, Request, Response, Server, StatusCode};
    use hyper::service::{make_service_fn, service_fn};
    use rstest::*;
    use sha1::{Digest, Sha1};
    use tempfile::TempDir;

    use super::*;
    use crate::repo::metadata_cache::FsMetadataCache;
    use crate::repo::processors::NullDependencyProcessor;
    use crate::util::stream_verifier::{DigestAlgorithm, DigestVerifierFactory, StreamVerifierFactory};

    /// Serves the files below `root` over HTTP, returns the base URL
    pub(crate) async fn serve_directory(root: PathBuf) -> String {
        let make_service = make_service_fn(move |_conn| {
            let root = root.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                    let path = root.join(request.uri().path().trim_start_matches('/'));
                    async move {
                        let response = match tokio::fs::read(&path).await {
                            Ok(data) => Response::new(Body::from(data)),
                            Err(_) => Response::builder()
                                .status(StatusCode::NOT_FOUND)
                                .body(Body::empty())
                                .unwrap(),
                        };
                        Ok::<_, Infallible>(response)
                    }
                }))
            }
        });

        let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make_service);
        let url = format!("http://{}/", server.local_addr());
        tokio::spawn(server);
        url
    }

    pub(crate) fn put(root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    const GA_METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>org.example</groupId>
  <artifactId>lib</artifactId>
  <versioning>
    <latest>1.1-SNAPSHOT</latest>
    <release>1.0</release>
    <versions>
      <version>0.9</version>
      <version>1.0</version>
      <version>1.1-SNAPSHOT</version>
    </versions>
    <lastUpdated>20090101120000</lastUpdated>
  </versioning>
</metadata>"#;

    const GAV_METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>org.example</groupId>
  <artifactId>lib</artifactId>
  <version>1.1-SNAPSHOT</version>
  <versioning>
    <snapshot>
      <timestamp>20090101.120000</timestamp>
      <buildNumber>2</buildNumber>
    </snapshot>
    <lastUpdated>20090101120000</lastUpdated>
  </versioning>
</metadata>"#;

    struct Fixture {
        _served: TempDir,
        staging: TempDir,
        url: String,
    }

    async fn fixture() -> Fixture {
        let served = TempDir::new().unwrap();
        let root = served.path();
        put(root, "org/example/lib/maven-metadata.xml", GA_METADATA.as_bytes());
        put(root, "org/example/lib/0.9/lib-0.9.jar", b"0.9");
        put(root, "org/example/lib/1.0/lib-1.0.jar", b"1.0");
        put(root, "org/example/lib/1.0/lib-1.0.jar.sha1", hex::encode(Sha1::digest(b"1.0")).as_bytes());
        put(root, "org/example/lib/1.0/lib-1.0.pom", b"<project/>");
        put(root, "org/example/lib/1.1-SNAPSHOT/maven-metadata.xml", GAV_METADATA.as_bytes());
        put(root, "org/example/lib/1.1-SNAPSHOT/lib-1.1-20090101.100000-1.jar", b"old snapshot");
        put(root, "org/example/lib/1.1-SNAPSHOT/lib-1.1-20090101.120000-2.jar", b"new snapshot");
        put(root, "org/example/plain/1.0-SNAPSHOT/plain-1.0-SNAPSHOT.jar", b"plain snapshot");

        let url = serve_directory(root.to_path_buf()).await;
        Fixture {
            _served: served,
            staging: TempDir::new().unwrap(),
            url,
        }
    }

    fn reader(fixture: &Fixture, cache: Option<Arc<dyn MetadataCache>>) -> RemoteRepositoryReader {
        let mut repository = RemoteRepository::new("remote", &fixture.url);
        repository.staging_directory = fixture.staging.path().to_path_buf();
        RemoteRepositoryReader::new(repository, Arc::new(NullDependencyProcessor), cache).unwrap()
    }

    async fn resolve(reader: &RemoteRepositoryReader, q: &str) -> Result<Artifact, RepositoryError> {
        let key = BasicMetadata::parse(q).unwrap();
        let (mut results, mut errors) = reader.read_artifacts(&[key.clone()]).await.unwrap().into_parts();
        match results.remove(&key) {
            Some(mut artifacts) => Ok(artifacts.remove(0)),
            None => Err(errors.remove(&key).unwrap()),
        }
    }

    #[test]
    fn test_invalid_url() {
        let result = RemoteRepositoryReader::new(RemoteRepository::new("remote", "not a url"), Arc::new(NullDependencyProcessor), None);
        assert!(matches!(result, Err(RepositoryError::Config(_))));
    }

    #[rstest]
    #[case::release("RELEASE", "1.0", b"1.0".as_slice())]
    #[case::latest("LATEST", "1.1-20090101.120000-2", b"new snapshot".as_slice())]
    #[case::exact("0.9", "0.9", b"0.9".as_slice())]
    #[case::snapshot("1.1-SNAPSHOT", "1.1-20090101.120000-2", b"new snapshot".as_slice())]
    #[case::timestamped("1.1-20090101.100000-1", "1.1-20090101.100000-1", b"old snapshot".as_slice())]
    #[tokio::test]
    async fn test_read_artifacts(#[case] requested: &str, #[case] expected_version: &str, #[case] expected_content: &[u8]) {
        let fixture = fixture().await;
        let reader = reader(&fixture, None);

        let artifact = resolve(&reader, &format!("org.example:lib:{}", requested)).await.unwrap();
        assert_eq!(artifact.metadata.version(), expected_version);
        assert_eq!(artifact.metadata.origin, Some(RepositoryId("remote".to_string())));
        assert!(artifact.file.starts_with(fixture.staging.path()));
        assert_eq!(fs::read(&artifact.file).unwrap(), expected_content);
    }

    #[tokio::test]
    async fn test_plain_snapshot_without_metadata() {
        let fixture = fixture().await;
        let artifact = resolve(&reader(&fixture, None), "org.example:plain:1.0-SNAPSHOT").await.unwrap();
        assert_eq!(artifact.metadata.version(), "1.0-SNAPSHOT");
    }

    #[tokio::test]
    async fn test_pom_blob() {
        let fixture = fixture().await;
        let reader = reader(&fixture, None);

        let with_pom = resolve(&reader, "org.example:lib:1.0").await.unwrap();
        assert_eq!(with_pom.pom_blob.as_deref(), Some(b"<project/>".as_slice()));

        let without_pom = resolve(&reader, "org.example:lib:0.9").await.unwrap();
        assert_eq!(without_pom.pom_blob, None);
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let fixture = fixture().await;
        let reader = reader(&fixture, None);

        assert!(resolve(&reader, "org.example:lib:2.0").await.unwrap_err().is_not_found());
        assert!(resolve(&reader, "org.example:missing:RELEASE").await.unwrap_err().is_not_found());
    }

    #[rstest]
    #[case::sha1_present("1.0", true)]
    #[case::sha1_missing("0.9", false)]
    #[tokio::test]
    async fn test_verification(#[case] version: &str, #[case] expect_success: bool) {
        let fixture = fixture().await;
        let mut repository = RemoteRepository::new("remote", &fixture.url);
        repository.staging_directory = fixture.staging.path().to_path_buf();
        let factory: Arc<dyn StreamVerifierFactory> = Arc::new(DigestVerifierFactory {
            algorithm: DigestAlgorithm::Sha1,
            lenient: false,
            sufficient: false,
        });
        repository.verifier_factories.push(factory);
        let reader = RemoteRepositoryReader::new(repository, Arc::new(NullDependencyProcessor), None).unwrap();

        let result = resolve(&reader, &format!("org.example:lib:{}", version)).await;
        assert_eq!(result.is_ok(), expect_success);
        if !expect_success {
            assert!(matches!(result, Err(RepositoryError::Verification(_))));
        }
    }

    #[tokio::test]
    async fn test_snapshot_resolution_is_cached() {
        let fixture = fixture().await;
        let cache_dir = TempDir::new().unwrap();
        let cache: Arc<dyn MetadataCache> = Arc::new(FsMetadataCache::new(cache_dir.path(), Duration::hours(1)));

        let coordinates = ArtifactCoordinates::new("org.example", "lib", "1.1-SNAPSHOT");
        let reader = reader(&fixture, Some(cache.clone()));
        resolve(&reader, "org.example:lib:1.1-SNAPSHOT").await.unwrap();

        let remote = RepositoryId("remote".to_string());
        let cached = cache.find_gav(&remote, &coordinates).await.unwrap().unwrap();
        assert_eq!(cached.latest_snapshot().unwrap(), "1.1-20090101.120000-2");

        // a fresh cache entry wins over the repository's metadata
        cache.update_gav(&remote, &GAVMetadata::new(coordinates.clone(), ["1.1-20090101.100000-1".to_string()], Vec::new())).await.unwrap();
        let artifact = resolve(&reader, "org.example:lib:1.1-SNAPSHOT").await.unwrap();
        assert_eq!(artifact.metadata.version(), "1.1-20090101.100000-1");
    }

    #[rstest]
    #[case::all("", QualityRange::ALL, vec!["0.9", "1.0", "1.1-SNAPSHOT"])]
    #[case::releases("", QualityRange::RELEASES_ONLY, vec!["0.9", "1.0"])]
    #[case::range("[1.0,)", QualityRange::ALL, vec!["1.0", "1.1-SNAPSHOT"])]
    #[tokio::test]
    async fn test_read_versions(#[case] requested: &str, #[case] quality_range: QualityRange, #[case] expected: Vec<&str>) {
        let fixture = fixture().await;
        let mut repository = RemoteRepository::new("remote", &fixture.url);
        repository.quality_range = quality_range;
        let reader = RemoteRepositoryReader::new(repository, Arc::new(NullDependencyProcessor), None).unwrap();

        let key = BasicMetadata::new(ArtifactCoordinates::new("org.example", "lib", requested));
        let missing = BasicMetadata::parse("org.example:missing:1.0").unwrap();
        let result = reader.read_versions(&[key.clone(), missing.clone()]).await.unwrap();

        let versions: Vec<&str> = result.result(&key).unwrap().iter().map(|m| m.version()).collect();
        assert_eq!(versions, expected);
        assert!(!result.has_results_for(&missing));
        assert!(!result.has_errors());
    }

    #[tokio::test]
    async fn test_read_raw_data() {
        let fixture = fixture().await;
        let reader = reader(&fixture, None);

        let pom = reader.read_raw_data(&BasicMetadata::parse("org.example:lib:1.0").unwrap(), "", "pom").await.unwrap();
        assert_eq!(pom, Some(b"<project/>".to_vec()));

        let snapshot = reader.read_raw_data(&BasicMetadata::parse("org.example:lib:1.1-SNAPSHOT").unwrap(), "", "jar").await.unwrap();
        assert_eq!(snapshot, Some(b"new snapshot".to_vec()));

        let missing = reader.read_raw_data(&BasicMetadata::parse("org.example:lib:1.0").unwrap(), "sources", "jar").await.unwrap();
        assert_eq!(missing, None);
    }
}
