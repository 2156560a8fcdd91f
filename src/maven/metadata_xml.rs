//! `maven-metadata.xml` document model and codec, see
//!  https://maven.apache.org/ref/3.9.5/maven-repository-metadata/repository-metadata.html

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;
use crate::maven::version::{classify, compare, Quality, SNAPSHOT_QUALIFIER};

/// Byte buffers shorter than this can not hold a document and decode to "no document"
const MIN_DOCUMENT_LEN: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "metadata", rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versioning: Option<Versioning>,
}
impl Metadata {
    pub fn versions(&self) -> &[String] {
        self.versioning.as_ref()
            .and_then(|v| v.versions.as_ref())
            .map(|v| v.version.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versioning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<Versions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versions {
    #[serde(default)]
    pub version: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<u32>,
}

pub fn decode(bytes: &[u8]) -> Result<Option<Metadata>, RepositoryError> {
    if bytes.len() < MIN_DOCUMENT_LEN {
        return Ok(None);
    }

    serde_xml_rs::from_reader(bytes)
        .map(Some)
        .map_err(|e| RepositoryError::Metadata(format!("malformed metadata document: {}", e)))
}

pub fn encode(metadata: &Metadata) -> Result<Vec<u8>, RepositoryError> {
    serde_xml_rs::to_string(metadata)
        .map(String::into_bytes)
        .map_err(|e| RepositoryError::Metadata(format!("failed to serialize metadata document: {}", e)))
}

/// A mutation of a metadata document
pub trait MetadataOperation: Send + Sync {
    /// returns `true` if the document was changed
    fn perform(&self, metadata: &mut Metadata) -> Result<bool, RepositoryError>;
}

/// Applies operations to a serialized document (an empty or too short buffer means "start from
///  scratch"). The original bytes are returned unchanged unless at least one operation reported
///  a change.
pub fn apply_operations(bytes: &[u8], operations: &[&dyn MetadataOperation]) -> Result<Vec<u8>, RepositoryError> {
    if operations.is_empty() {
        return Ok(bytes.to_vec());
    }

    let mut metadata = decode(bytes)?.unwrap_or_default();

    let mut changed = false;
    for op in operations {
        // every operation runs, even after an earlier one reported a change
        changed |= op.perform(&mut metadata)?;
    }

    if changed {
        encode(&metadata)
    }
    else {
        Ok(bytes.to_vec())
    }
}

/// Applies operations to a document (or an empty one) and always serializes the result
pub fn apply_operations_to_document(metadata: Option<Metadata>, operations: &[&dyn MetadataOperation]) -> Result<Vec<u8>, RepositoryError> {
    let mut metadata = metadata.unwrap_or_default();
    for op in operations {
        op.perform(&mut metadata)?;
    }
    encode(&metadata)
}

pub fn utc_timestamp() -> String {
    Utc::now().format("%Y%m%d.%H%M%S").to_string()
}

pub fn utc_last_updated() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// A snapshot descriptor stamped with the current time. If the version's last `-` segment is a
///  number, it becomes the build number.
pub fn snapshot_for(version: &str) -> Snapshot {
    let mut snapshot = Snapshot {
        timestamp: Some(utc_timestamp()),
        build_number: None,
    };

    if version.len() < 3 || version.ends_with(SNAPSHOT_QUALIFIER) {
        return snapshot;
    }

    if let Some(last_dash) = version.rfind('-') {
        snapshot.build_number = version[last_dash + 1..].parse::<u32>().ok();
    }
    snapshot
}

/// Adds a version to the document's version list, maintaining `latest` and `release`
pub struct AddVersionOperation {
    pub version: String,
}
impl MetadataOperation for AddVersionOperation {
    fn perform(&self, metadata: &mut Metadata) -> Result<bool, RepositoryError> {
        let versioning = metadata.versioning.get_or_insert_with(Default::default);
        let versions = versioning.versions.get_or_insert_with(Default::default);

        if versions.version.iter().any(|v| v == &self.version) {
            return Ok(false);
        }

        versions.version.push(self.version.clone());
        versions.version.sort_by(|a, b| compare(a, b));

        let is_newer = |current: &Option<String>| match current {
            None => true,
            Some(c) => compare(&self.version, c).is_gt(),
        };
        if is_newer(&versioning.latest) {
            versioning.latest = Some(self.version.clone());
        }
        if classify(&self.version) == Quality::Release && is_newer(&versioning.release) {
            versioning.release = Some(self.version.clone());
        }
        versioning.last_updated = Some(utc_last_updated());
        Ok(true)
    }
}

/// Replaces the document's snapshot descriptor
pub struct SetSnapshotOperation {
    pub snapshot: Snapshot,
}
impl MetadataOperation for SetSnapshotOperation {
    fn perform(&self, metadata: &mut Metadata) -> Result<bool, RepositoryError> {
        let versioning = metadata.versioning.get_or_insert_with(Default::default);
        if versioning.snapshot.as_ref() == Some(&self.snapshot) {
            return Ok(false);
        }
        versioning.snapshot = Some(self.snapshot.clone());
        versioning.last_updated = Some(utc_last_updated());
        Ok(true)
    }
}
