use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;
use crate::maven::coordinates::ArtifactCoordinates;
use crate::maven::metadata_xml::Metadata;
use crate::maven::version::ComparableVersion;

/// GAV level repository metadata: the known snapshot versions and classifiers, plus the time of
///  the last check against the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GAVMetadata {
    coordinates: ArtifactCoordinates,
    /// ordered by the version comparator; the greatest is the most recent
    snapshots: BTreeSet<ComparableVersion>,
    classifiers: Vec<String>,
    last_check: DateTime<Utc>,
    /// set by a cache implementation when it is time to refresh
    #[serde(skip)]
    expired: bool,
}

impl GAVMetadata {
    pub fn new<S, C>(coordinates: ArtifactCoordinates, snapshots: S, classifiers: C) -> GAVMetadata
    where
        S: IntoIterator<Item = String>,
        C: IntoIterator<Item = String>,
    {
        GAVMetadata {
            coordinates,
            snapshots: snapshots.into_iter().map(ComparableVersion).collect(),
            classifiers: classifiers.into_iter().collect(),
            last_check: Utc::now(),
            expired: false,
        }
    }

    pub fn from_document(metadata: Option<&Metadata>) -> Result<GAVMetadata, RepositoryError> {
        let metadata = metadata
            .ok_or_else(|| RepositoryError::Metadata("no metadata document to build GAV metadata from".to_string()))?;

        let coordinates = ArtifactCoordinates::new(
            metadata.group_id.as_deref().unwrap_or_default(),
            metadata.artifact_id.as_deref().unwrap_or_default(),
            metadata.version.as_deref().unwrap_or_default(),
        );

        Ok(GAVMetadata::new(coordinates, metadata.versions().iter().cloned(), Vec::new()))
    }

    /// A fresh copy with the current time as last check. The expiry flag is not copied.
    pub fn copy(other: &GAVMetadata) -> Result<GAVMetadata, RepositoryError> {
        Ok(GAVMetadata {
            coordinates: other.coordinates.clone(),
            snapshots: other.snapshots.clone(),
            classifiers: other.classifiers.clone(),
            last_check: Utc::now(),
            expired: false,
        })
    }

    pub fn coordinates(&self) -> &ArtifactCoordinates {
        &self.coordinates
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &str> {
        self.snapshots.iter().map(|v| v.0.as_str())
    }

    pub fn classifiers(&self) -> &[String] {
        &self.classifiers
    }

    pub fn latest_snapshot(&self) -> Result<&str, RepositoryError> {
        self.snapshots.last()
            .map(|v| v.0.as_str())
            .ok_or_else(|| RepositoryError::Empty(self.coordinates.to_string()))
    }

    pub fn last_check(&self) -> DateTime<Utc> {
        self.last_check
    }

    pub fn update_snapshots<S: IntoIterator<Item = String>>(&mut self, snapshots: S) {
        self.snapshots = snapshots.into_iter().map(ComparableVersion).collect();
        self.last_check = Utc::now();
    }

    pub fn update_classifiers<C: IntoIterator<Item = String>>(&mut self, classifiers: C) {
        self.classifiers = classifiers.into_iter().collect();
        self.last_check = Utc::now();
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn set_expired(&mut self, expired: bool) {
        self.expired = expired;
    }
}
