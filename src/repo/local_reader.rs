use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{read_dir, try_exists};
use tracing::{debug, trace, warn};

use crate::error::{Missing, RepositoryError};
use crate::maven::coordinates::*;
use crate::maven::paths::*;
use crate::maven::version::*;
use crate::repo::LocalRepository;
use crate::repo::processors::{process_environment, DependencyProcessor, RawDataSource};
use crate::repo::results::{ArtifactBasicResults, ArtifactResults};
use crate::util::stream_verifier::verify_file;

/// Reads from a Maven2 layout directory:
///  `<root>/<group with slashes>/<artifactId>/<version>/<artifactId>-<version>[-<classifier>].<type>`
pub struct LocalRepositoryReader {
    repository: LocalRepository,
    processor: Arc<dyn DependencyProcessor>,
}

pub(crate) async fn exists(path: &Path) -> Result<bool, RepositoryError> {
    try_exists(path).await
        .map_err(|e| RepositoryError::read(path, e))
}

/// Names of the directories (or files) directly inside `dir`
pub(crate) async fn list_names(dir: &Path, directories: bool) -> Result<Vec<String>, RepositoryError> {
    let mut entries = read_dir(dir).await
        .map_err(|e| RepositoryError::read(dir, e))?;

    let mut result = Vec::new();
    loop {
        match entries.next_entry().await.map_err(|e| RepositoryError::read(dir, e))? {
            Some(entry) => {
                let metadata = match tokio::fs::metadata(entry.path()).await {
                    Ok(m) => m,
                    // dangling symlink or removed concurrently
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(RepositoryError::read(entry.path(), e)),
                };
                if metadata.is_dir() != directories {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    result.push(name.to_string());
                }
            }
            None => break,
        }
    }
    Ok(result)
}

impl LocalRepositoryReader {
    pub fn new(repository: LocalRepository, processor: Arc<dyn DependencyProcessor>) -> Result<LocalRepositoryReader, RepositoryError> {
        if !repository.directory.is_dir() {
            return Err(RepositoryError::Config(format!(
                "local repository directory {:?} should exist", repository.directory
            )));
        }

        Ok(LocalRepositoryReader {
            repository,
            processor,
        })
    }

    pub fn id(&self) -> &RepositoryId {
        &self.repository.id
    }

    fn root(&self) -> &Path {
        &self.repository.directory
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
        let coordinates = &metadata.coordinates;
        let ga_relative = ga_path(coordinates);
        let ga_dir = self.root().join(&ga_relative);

        if !exists(&ga_dir).await? {
            return Err(RepositoryError::not_found(Missing::GroupArtifact, metadata, ga_relative));
        }

        let version = coordinates.version.as_str();
        let (binary, resolved_version) = if version == RELEASE_VERSION || version == LATEST_VERSION {
            let releases_only = version == RELEASE_VERSION;

            let chosen = max_version(
                list_names(&ga_dir, true).await?
                    .into_iter()
                    .filter(|v| !releases_only || classify(v) == Quality::Release)
            ).ok_or_else(|| RepositoryError::not_found(Missing::Version, metadata, &ga_relative))?;

            if classify(&chosen) == Quality::Snapshot {
                self.find_latest_snapshot(&ga_dir, &chosen, coordinates).await?
            }
            else {
                let file_name = maven_file_name(&coordinates.artifact_id, &chosen, &coordinates.classifier, &coordinates.file_type);
                (ga_dir.join(&chosen).join(file_name), chosen)
            }
        }
        else {
            match classify(version) {
                Quality::Snapshot => {
                    let gav_dir = ga_dir.join(version);
                    if !exists(&gav_dir).await? {
                        return Err(RepositoryError::not_found(Missing::VersionDirectory, metadata, gav_dir.display()));
                    }
                    self.find_latest_snapshot(&ga_dir, version, coordinates).await?
                }
                Quality::SnapshotTs | Quality::Release => {
                    (self.root().join(as_maven_path(coordinates)), version.to_string())
                }
            }
        };

        if !exists(&binary).await? {
            return Err(RepositoryError::not_found(Missing::Binary, metadata, binary.display()));
        }

        verify_file(&binary, &self.repository.verifier_factories).await?;

        let resolved = BasicMetadata {
            coordinates: coordinates.with_version(&resolved_version),
            origin: Some(self.repository.id.clone()),
        };

        let pom_blob = if coordinates.file_type == POM_TYPE {
            Some(self.read_file(&binary).await?)
        }
        else {
            let pom_file = self.root().join(pom_path(&resolved.coordinates));
            if exists(&pom_file).await? {
                verify_file(&pom_file, &self.repository.verifier_factories).await?;
                Some(self.read_file(&pom_file).await?)
            }
            else {
                warn!("no POM found for {} in repository {}", metadata, self.repository.id);
                None
            }
        };

        trace!("resolved {} to {}", metadata, binary.display());
        Ok(Artifact {
            metadata: resolved,
            file: binary,
            pom_blob,
        })
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, RepositoryError> {
        tokio::fs::read(path).await
            .map_err(|e| RepositoryError::read(path, e))
    }

    /// Resolves a snapshot inside the version directory `<ga_dir>/<version>`. A non-timestamped
    ///  `<artifactId>-<base>-SNAPSHOT` file wins; otherwise the most recent timestamped file.
    ///  Returns the file and the resolved version.
    async fn find_latest_snapshot(&self, ga_dir: &Path, version: &str, coordinates: &ArtifactCoordinates) -> Result<(PathBuf, String), RepositoryError> {
        let base_version = base(version);
        let gav_dir = ga_dir.join(version);

        let canonical_version = format!("{}{}", base_version, SNAPSHOT_QUALIFIER);
        let canonical = gav_dir.join(maven_file_name(&coordinates.artifact_id, &canonical_version, &coordinates.classifier, &coordinates.file_type));
        if exists(&canonical).await? {
            return Ok((canonical, canonical_version));
        }

        let file_names = list_names(&gav_dir, false).await?;
        let latest = max_version(
            file_names.iter()
                .filter_map(|f| timestamped_snapshot_version(f, &coordinates.artifact_id, base_version, &coordinates.classifier, &coordinates.file_type))
        ).ok_or_else(|| RepositoryError::not_found(Missing::Snapshot, coordinates, gav_dir.display()))?;

        let file = gav_dir.join(maven_file_name(&coordinates.artifact_id, latest, &coordinates.classifier, &coordinates.file_type));
        Ok((file, latest.to_string()))
    }

    /// Lists the versions in each item's group/artifact directory that match the requested
    ///  version (or range) and this repository's quality range.
    pub async fn read_versions(&self, query: &[BasicMetadata]) -> Result<ArtifactBasicResults, RepositoryError> {
        if query.is_empty() {
            return Err(RepositoryError::InvalidQuery("empty version query".to_string()));
        }

        let mut result = ArtifactBasicResults::new();
        for metadata in query {
            let ga_dir = self.root().join(ga_path(&metadata.coordinates));
            if !exists(&ga_dir).await? {
                continue;
            }

            let range = match VersionRange::parse(metadata.version(), self.repository.quality_range) {
                Ok(range) => range,
                Err(e) => {
                    result.add_error(metadata, e);
                    continue;
                }
            };

            for version in list_names(&ga_dir, true).await? {
                if !range.includes(&version) {
                    continue;
                }
                result.add(metadata, BasicMetadata {
                    coordinates: metadata.coordinates.with_version(&version),
                    origin: Some(self.repository.id.clone()),
                });
            }
        }
        Ok(result)
    }

    pub async fn read_dependencies(&self, query: &[BasicMetadata]) -> Result<ArtifactBasicResults, RepositoryError> {
        let mut result = ArtifactBasicResults::new();
        let environment = process_environment();

        for metadata in query {
            let pom = pom_path(&metadata.coordinates);
            if !exists(&self.root().join(&pom)).await? {
                warn!("file {:?} does not exist in local repository {}", pom, self.repository.id);
                continue;
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

    /// The bytes of a coordinate's file with the given classifier and type. A plain snapshot
    ///  version is resolved the same way as for artifacts.
    pub async fn read_raw_data(&self, metadata: &BasicMetadata, classifier: &str, file_type: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        let coordinates = metadata.coordinates
            .with_classifier(MavenClassifier::from_str_opt(classifier))
            .with_type(file_type);

        if classify(&coordinates.version) == Quality::Snapshot {
            let ga_dir = self.root().join(ga_path(&coordinates));
            if !exists(&ga_dir.join(&coordinates.version)).await? {
                return Ok(None);
            }
            return match self.find_latest_snapshot(&ga_dir, &coordinates.version, &coordinates).await {
                Ok((file, _)) => Ok(Some(self.read_file(&file).await?)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            };
        }

        self.read_raw_path(&as_maven_path(&coordinates)).await
    }

    /// The bytes of a file, given by its path relative to the repository root
    pub async fn read_raw_path(&self, path: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        let file = self.root().join(path);
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RepositoryError::read(file, e)),
        }
    }
}

#[async_trait]
impl RawDataSource for LocalRepositoryReader {
    async fn read_raw_data(&self, metadata: &BasicMetadata, classifier: &str, file_type: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        LocalRepositoryReader::read_raw_data(self, metadata, classifier, file_type).await
    }
}


#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::fs;

    use rstest::*;
    use sha1::{Digest, Sha1};
    use tempfile::TempDir;

    use super::*;
    use crate::repo::processors::NullDependencyProcessor;
    use crate::util::stream_verifier::{DigestAlgorithm, DigestVerifierFactory, StreamVerifierFactory};

    fn put(root: &Path, relative: &str, content: &[u8]) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn reader(root: &Path) -> LocalRepositoryReader {
        LocalRepositoryReader::new(LocalRepository::new("local", root), Arc::new(NullDependencyProcessor)).unwrap()
    }

    fn query(s: &str) -> BasicMetadata {
        BasicMetadata::parse(s).unwrap()
    }

    async fn resolve(reader: &LocalRepositoryReader, q: &str) -> Result<Artifact, String> {
        let key = query(q);
        let result = reader.read_artifacts(&[key.clone()]).await.unwrap();
        match result.result(&key) {
            Some(artifacts) => Ok(artifacts[0].clone()),
            None => Err(result.error(&key).map(|e| e.to_string()).unwrap_or_default()),
        }
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let dir = TempDir::new().unwrap();
        let result = LocalRepositoryReader::new(LocalRepository::new("local", dir.path().join("nope")), Arc::new(NullDependencyProcessor));
        assert!(matches!(result, Err(RepositoryError::Config(_))));
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = reader(dir.path()).read_artifacts(&[]).await;
        assert!(matches!(result, Err(RepositoryError::InvalidQuery(_))));
    }

    #[rstest]
    #[case::release("RELEASE", "1.0")]
    #[case::latest("LATEST", max_version(["1.0", "1.0-SNAPSHOT"]).unwrap())]
    #[case::exact_release("1.0", "1.0")]
    #[case::plain_snapshot("1.0-SNAPSHOT", "1.0-SNAPSHOT")]
    #[tokio::test]
    async fn test_release_and_latest(#[case] requested: &str, #[case] expected: &str) {
        let dir = TempDir::new().unwrap();
        put(dir.path(), "org/example/lib/1.0/lib-1.0.jar", b"release");
        put(dir.path(), "org/example/lib/1.0-SNAPSHOT/lib-1.0-SNAPSHOT.jar", b"snapshot");

        let artifact = resolve(&reader(dir.path()), &format!("org.example:lib:{}", requested)).await.unwrap();
        assert_eq!(artifact.metadata.version(), expected);
        assert_eq!(artifact.metadata.origin, Some(RepositoryId("local".to_string())));
        assert!(artifact.file.ends_with(format!("lib-{}.jar", expected)));
    }

    #[tokio::test]
    async fn test_latest_timestamped_snapshot_wins() {
        let dir = TempDir::new().unwrap();
        put(dir.path(), "org/example/lib/1.0-SNAPSHOT/lib-1.0-20090101.100000-1.jar", b"old");
        put(dir.path(), "org/example/lib/1.0-SNAPSHOT/lib-1.0-20090101.120000-2.jar", b"new");
        put(dir.path(), "org/example/lib/1.0-SNAPSHOT/lib-1.0-20090101.120000-2.jar.sha1", b"ignored");
        put(dir.path(), "org/example/lib/1.0-SNAPSHOT/lib-1.0-20090101.130000-3-sources.jar", b"other classifier");

        let artifact = resolve(&reader(dir.path()), "org.example:lib:1.0-SNAPSHOT").await.unwrap();
        assert_eq!(artifact.metadata.version(), "1.0-20090101.120000-2");
        assert_eq!(fs::read(&artifact.file).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_canonical_snapshot_is_preferred() {
        let dir = TempDir::new().unwrap();
        put(dir.path(), "org/example/lib/1.0-SNAPSHOT/lib-1.0-20090101.120000-2.jar", b"timestamped");
        put(dir.path(), "org/example/lib/1.0-SNAPSHOT/lib-1.0-SNAPSHOT.jar", b"canonical");

        let artifact = resolve(&reader(dir.path()), "org.example:lib:1.0-SNAPSHOT").await.unwrap();
        assert_eq!(artifact.metadata.version(), "1.0-SNAPSHOT");
        assert_eq!(fs::read(&artifact.file).unwrap(), b"canonical");
    }

    #[tokio::test]
    async fn test_exact_timestamped_version() {
        let dir = TempDir::new().unwrap();
        put(dir.path(), "org/example/lib/1.0-SNAPSHOT/lib-1.0-20090101.100000-1.jar", b"old");
        put(dir.path(), "org/example/lib/1.0-SNAPSHOT/lib-1.0-20090101.120000-2.jar", b"new");

        let artifact = resolve(&reader(dir.path()), "org.example:lib:1.0-20090101.100000-1").await.unwrap();
        assert_eq!(fs::read(&artifact.file).unwrap(), b"old");
    }

    #[rstest]
    #[case::no_version_directory("org.example:lib:2.0-SNAPSHOT")]
    #[case::no_binary("org.example:lib:3.0")]
    #[case::no_release("org.example:snaps:RELEASE")]
    #[case::no_snapshot_file("org.example:empty:1.0-SNAPSHOT")]
    #[tokio::test]
    async fn test_not_found(#[case] q: &str) {
        let dir = TempDir::new().unwrap();
        put(dir.path(), "org/example/lib/1.0/lib-1.0.jar", b"release");
        fs::create_dir_all(dir.path().join("org/example/lib/3.0")).unwrap();
        put(dir.path(), "org/example/snaps/1.0-SNAPSHOT/snaps-1.0-SNAPSHOT.jar", b"snapshot");
        fs::create_dir_all(dir.path().join("org/example/empty/1.0-SNAPSHOT")).unwrap();

        let key = query(q);
        let result = reader(dir.path()).read_artifacts(&[key.clone()]).await.unwrap();
        assert!(!result.has_results());
        assert!(result.error(&key).unwrap().is_not_found());
    }

    #[tokio::test]
    async fn test_partial_batch_failure() {
        let dir = TempDir::new().unwrap();
        let mut keys = Vec::new();
        for name in ["a", "b", "c", "d"] {
            put(dir.path(), &format!("org/example/{0}/1.0/{0}-1.0.jar", name), name.as_bytes());
            keys.push(query(&format!("org.example:{}:1.0", name)));
        }
        let missing = query("org.example:missing:1.0");
        keys.push(missing.clone());

        let result = reader(dir.path()).read_artifacts(&keys).await.unwrap();
        assert_eq!(result.results().len(), 4);
        assert_eq!(result.errors().len(), 1);
        assert!(matches!(result.error(&missing), Some(RepositoryError::NotFound { missing: Missing::GroupArtifact, .. })));
    }

    #[tokio::test]
    async fn test_pom_blob() {
        let dir = TempDir::new().unwrap();
        put(dir.path(), "org/example/lib/1.0/lib-1.0.jar", b"jar");
        put(dir.path(), "org/example/lib/1.0/lib-1.0-sources.jar", b"sources");
        put(dir.path(), "org/example/lib/1.0/lib-1.0.pom", b"<project/>");
        put(dir.path(), "org/example/other/1.0/other-1.0.jar", b"jar");
        let reader = reader(dir.path());

        let jar = resolve(&reader, "org.example:lib:1.0").await.unwrap();
        assert_eq!(jar.pom_blob.as_deref(), Some(b"<project/>".as_slice()));

        let sources = resolve(&reader, "org.example:lib:1.0:sources").await.unwrap();
        assert_eq!(sources.pom_blob.as_deref(), Some(b"<project/>".as_slice()));

        let pom = resolve(&reader, "org.example:lib:1.0::pom").await.unwrap();
        assert_eq!(pom.pom_blob.as_deref(), Some(b"<project/>".as_slice()));

        let without_pom = resolve(&reader, "org.example:other:1.0").await.unwrap();
        assert_eq!(without_pom.pom_blob, None);
    }

    #[rstest]
    #[case::valid(true, true)]
    #[case::mismatch(true, false)]
    #[case::missing_signature(false, false)]
    #[tokio::test]
    async fn test_verification(#[case] with_signature: bool, #[case] expect_success: bool) {
        let dir = TempDir::new().unwrap();
        let content = b"some binary content";
        put(dir.path(), "org/example/lib/1.0/lib-1.0.jar", content);
        if with_signature {
            let digest = if expect_success { hex::encode(Sha1::digest(content)) } else { hex::encode(Sha1::digest(b"other")) };
            put(dir.path(), "org/example/lib/1.0/lib-1.0.jar.sha1", digest.as_bytes());
        }

        let mut repository = LocalRepository::new("local", dir.path());
        let factory: Arc<dyn StreamVerifierFactory> = Arc::new(DigestVerifierFactory {
            algorithm: DigestAlgorithm::Sha1,
            lenient: false,
            sufficient: true,
        });
        repository.verifier_factories.push(factory);
        let reader = LocalRepositoryReader::new(repository, Arc::new(NullDependencyProcessor)).unwrap();

        let key = query("org.example:lib:1.0");
        let result = reader.read_artifacts(&[key.clone()]).await.unwrap();
        assert_eq!(result.has_results_for(&key), expect_success);
        if !expect_success {
            assert!(matches!(result.error(&key), Some(RepositoryError::Verification(_))));
        }
    }

    #[rstest]
    #[case::any("", QualityRange::ALL, vec!["1.0", "1.1", "2.0-SNAPSHOT"])]
    #[case::releases("", QualityRange::RELEASES_ONLY, vec!["1.0", "1.1"])]
    #[case::range("[1.0,2.0)", QualityRange::ALL, vec!["1.0", "1.1", "2.0-SNAPSHOT"])]
    #[case::exact("1.1", QualityRange::ALL, vec!["1.1"])]
    #[tokio::test]
    async fn test_read_versions(#[case] requested: &str, #[case] quality_range: QualityRange, #[case] expected: Vec<&str>) {
        let dir = TempDir::new().unwrap();
        for v in ["1.0", "1.1", "2.0-SNAPSHOT"] {
            fs::create_dir_all(dir.path().join("org/example/lib").join(v)).unwrap();
        }
        put(dir.path(), &format!("org/example/lib/{}", crate::maven::paths::METADATA_FILE_NAME), b"<metadata/>");

        let mut repository = LocalRepository::new("local", dir.path());
        repository.quality_range = quality_range;
        let reader = LocalRepositoryReader::new(repository, Arc::new(NullDependencyProcessor)).unwrap();

        let key = BasicMetadata::new(ArtifactCoordinates::new("org.example", "lib", requested));
        let result = reader.read_versions(&[key.clone()]).await.unwrap();

        let mut versions: Vec<&str> = result.result(&key).unwrap_or_default().iter()
            .map(|m| m.version())
            .collect();
        versions.sort();
        assert_eq!(versions, expected);
    }

    struct PomLength;

    #[async_trait]
    impl DependencyProcessor for PomLength {
        async fn get_dependencies(&self, metadata: &BasicMetadata, source: &dyn RawDataSource, _environment: &HashMap<String, String>) -> anyhow::Result<Vec<BasicMetadata>> {
            let pom = source.read_raw_data(metadata, "", POM_TYPE).await?
                .ok_or_else(|| anyhow::anyhow!("no pom"))?;
            if pom.is_empty() {
                anyhow::bail!("empty pom");
            }
            Ok(vec![BasicMetadata::parse(&format!("org.dep:dep:{}", pom.len()))?])
        }
    }

    #[tokio::test]
    async fn test_read_dependencies() {
        let dir = TempDir::new().unwrap();
        put(dir.path(), "org/example/lib/1.0/lib-1.0.pom", b"12345");
        put(dir.path(), "org/example/broken/1.0/broken-1.0.pom", b"");
        let reader = LocalRepositoryReader::new(LocalRepository::new("local", dir.path()), Arc::new(PomLength)).unwrap();

        let lib = query("org.example:lib:1.0");
        let broken = query("org.example:broken:1.0");
        let missing = query("org.example:missing:1.0");
        let result = reader.read_dependencies(&[lib.clone(), broken.clone(), missing.clone()]).await.unwrap();

        assert_eq!(result.result(&lib).unwrap()[0].version(), "5");
        assert!(!result.has_results_for(&broken));
        assert!(!result.has_results_for(&missing));
        assert!(!result.has_errors());
    }

    #[tokio::test]
    async fn test_read_raw_data() {
        let dir = TempDir::new().unwrap();
        put(dir.path(), "org/example/lib/1.0/lib-1.0.pom", b"<project/>");
        put(dir.path(), "org/example/lib/1.1-SNAPSHOT/lib-1.1-20090101.120000-2.pom", b"<snapshot/>");
        let reader = reader(dir.path());

        assert_eq!(reader.read_raw_data(&query("org.example:lib:1.0"), "", "pom").await.unwrap(), Some(b"<project/>".to_vec()));
        assert_eq!(reader.read_raw_data(&query("org.example:lib:1.1-SNAPSHOT"), "", "pom").await.unwrap(), Some(b"<snapshot/>".to_vec()));
        assert_eq!(reader.read_raw_data(&query("org.example:lib:1.0"), "sources", "jar").await.unwrap(), None);
        assert_eq!(reader.read_raw_path("org/example/lib/1.0/lib-1.0.pom").await.unwrap(), Some(b"<project/>".to_vec()));
        assert_eq!(reader.read_raw_path("nothing/here").await.unwrap(), None);
    }
}
