use std::path::{Path, PathBuf};

use crate::maven::coordinates::*;
use crate::maven::version::{base, classify, Quality, SNAPSHOT_QUALIFIER};

pub const METADATA_FILE_NAME: &str = "maven-metadata.xml";


pub fn group_path(group_id: &str) -> String {
    group_id.replace('.', "/")
}

/// `<group with slashes>/<artifactId>`
pub fn ga_path(coordinates: &ArtifactCoordinates) -> String {
    format!("{}/{}", group_path(&coordinates.group_id), coordinates.artifact_id)
}

/// Name of the directory holding a version's files: snapshots of all kinds live in
///  `<base>-SNAPSHOT`, everything else in a directory named after the version itself.
pub fn version_directory(version: &str) -> String {
    match classify(version) {
        Quality::Release => version.to_string(),
        Quality::Snapshot | Quality::SnapshotTs => format!("{}{}", base(version), SNAPSHOT_QUALIFIER),
    }
}

/// `<artifactId>-<version>[-<classifier>].<type>`
pub fn maven_file_name(artifact_id: &str, version: &str, classifier: &MavenClassifier, file_type: &str) -> String {
    format!("{}-{}{}.{}", artifact_id, version, classifier.file_name_suffix(), file_type)
}

/// Repository relative path of a coordinate's file, optionally overriding classifier and type
pub fn relative_path(coordinates: &ArtifactCoordinates, classifier: Option<&MavenClassifier>, file_type: Option<&str>) -> String {
    format!(
        "{}/{}/{}",
        ga_path(coordinates),
        version_directory(&coordinates.version),
        maven_file_name(
            &coordinates.artifact_id,
            &coordinates.version,
            classifier.unwrap_or(&coordinates.classifier),
            file_type.unwrap_or(&coordinates.file_type),
        ),
    )
}

pub fn as_maven_path(coordinates: &ArtifactCoordinates) -> String {
    relative_path(coordinates, None, None)
}

/// The classifier-less POM next to a coordinate's binary
pub fn pom_path(coordinates: &ArtifactCoordinates) -> String {
    relative_path(coordinates, Some(&MavenClassifier::Unclassified), Some(POM_TYPE))
}

pub fn ga_metadata_path(coordinates: &ArtifactCoordinates) -> String {
    format!("{}/{}", ga_path(coordinates), METADATA_FILE_NAME)
}

pub fn gav_metadata_path(coordinates: &ArtifactCoordinates) -> String {
    format!("{}/{}/{}", ga_path(coordinates), version_directory(&coordinates.version), METADATA_FILE_NAME)
}

/// `<file>.<extension>`, tolerating an extension that already starts with a dot
pub fn signature_path(file: &Path, extension: &str) -> PathBuf {
    let mut s = file.as_os_str().to_os_string();
    if !extension.starts_with('.') {
        s.push(".");
    }
    s.push(extension);
    PathBuf::from(s)
}

/// If `file_name` is a timestamped snapshot file `<artifactId>-<base>-<timestamp>-<build>[-<classifier>].<type>`
///  for the given base version, classifier and type, returns its version part
///  (`<base>-<timestamp>-<build>`).
pub fn timestamped_snapshot_version<'a>(
    file_name: &'a str,
    artifact_id: &str,
    base_version: &str,
    classifier: &MavenClassifier,
    file_type: &str,
) -> Option<&'a str> {
    let without_artifact = file_name.strip_prefix(artifact_id)?.strip_prefix('-')?;
    let suffix = format!("{}.{}", classifier.file_name_suffix(), file_type);
    let version = without_artifact.strip_suffix(suffix.as_str())?;

    if classify(version) == Quality::SnapshotTs && base(version) == base_version {
        Some(version)
    }
    else {
        None
    }
}


#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    fn coordinates(s: &str) -> ArtifactCoordinates {
        s.parse().unwrap()
    }

    #[rstest]
    #[case::release("org.example:lib:1.0", "org/example/lib/1.0/lib-1.0.jar")]
    #[case::classifier("org.example:lib:1.0:sources", "org/example/lib/1.0/lib-1.0-sources.jar")]
    #[case::file_type("org.example:lib:1.0::pom", "org/example/lib/1.0/lib-1.0.pom")]
    #[case::snapshot("org.example:lib:1.0-SNAPSHOT", "org/example/lib/1.0-SNAPSHOT/lib-1.0-SNAPSHOT.jar")]
    #[case::timestamped("org.example:lib:1.0-20090101.120000-3:tests", "org/example/lib/1.0-SNAPSHOT/lib-1.0-20090101.120000-3-tests.jar")]
    #[case::dashes("a:x-y:1.0-y", "a/x-y/1.0-y/x-y-1.0-y.jar")]
    fn test_as_maven_path(#[case] coordinates_string: &str, #[case] expected: &str) {
        assert_eq!(as_maven_path(&coordinates(coordinates_string)), expected);
    }

    #[test]
    fn test_pom_path_drops_classifier() {
        assert_eq!(pom_path(&coordinates("org.example:lib:1.0:sources")), "org/example/lib/1.0/lib-1.0.pom");
    }

    #[test]
    fn test_metadata_paths() {
        let c = coordinates("org.example:lib:1.0-20090101.120000-3");
        assert_eq!(ga_metadata_path(&c), "org/example/lib/maven-metadata.xml");
        assert_eq!(gav_metadata_path(&c), "org/example/lib/1.0-SNAPSHOT/maven-metadata.xml");
    }

    #[rstest]
    #[case("sha1", "/repo/a-1.0.jar.sha1")]
    #[case(".sha1", "/repo/a-1.0.jar.sha1")]
    #[case("asc", "/repo/a-1.0.jar.asc")]
    fn test_signature_path(#[case] extension: &str, #[case] expected: &str) {
        assert_eq!(signature_path(Path::new("/repo/a-1.0.jar"), extension), PathBuf::from(expected));
    }

    #[rstest]
    #[case::plain("a-1.0-20090101.120000-2.jar", "a", "1.0", MavenClassifier::Unclassified, "jar", Some("1.0-20090101.120000-2"))]
    #[case::dash_in_artifact("x-y-1.0-20090101.120000-2.jar", "x-y", "1.0", MavenClassifier::Unclassified, "jar", Some("1.0-20090101.120000-2"))]
    #[case::classifier("a-1.0-20090101.120000-2-tests.jar", "a", "1.0", MavenClassifier::Classified("tests".to_string()), "jar", Some("1.0-20090101.120000-2"))]
    #[case::classified_file_unclassified_query("a-1.0-20090101.120000-2-tests.jar", "a", "1.0", MavenClassifier::Unclassified, "jar", None)]
    #[case::canonical_snapshot("a-1.0-SNAPSHOT.jar", "a", "1.0", MavenClassifier::Unclassified, "jar", None)]
    #[case::sidecar("a-1.0-20090101.120000-2.jar.sha1", "a", "1.0", MavenClassifier::Unclassified, "jar", None)]
    #[case::other_type("a-1.0-20090101.120000-2.pom", "a", "1.0", MavenClassifier::Unclassified, "jar", None)]
    #[case::other_base("a-1.1-20090101.120000-2.jar", "a", "1.0", MavenClassifier::Unclassified, "jar", None)]
    #[case::other_artifact("b-1.0-20090101.120000-2.jar", "a", "1.0", MavenClassifier::Unclassified, "jar", None)]
    #[case::no_dash_after_artifact("a1.0-20090101.120000-2.jar", "a", "1.0", MavenClassifier::Unclassified, "jar", None)]
    fn test_timestamped_snapshot_version(
        #[case] file_name: &str,
        #[case] artifact_id: &str,
        #[case] base_version: &str,
        #[case] classifier: MavenClassifier,
        #[case] file_type: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(timestamped_snapshot_version(file_name, artifact_id, base_version, &classifier, file_type), expected);
    }
}
