use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use thiserror::Error;

/// What part of the repository layout was missing when a lookup came up empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    GroupArtifact,
    Version,
    VersionDirectory,
    Snapshot,
    Binary,
}
impl Display for Missing {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Missing::GroupArtifact => "group/artifact directory",
            Missing::Version => "matching version",
            Missing::VersionDirectory => "version directory",
            Missing::Snapshot => "snapshot file",
            Missing::Binary => "binary",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{missing} not found for {coordinates} at {location}")]
    NotFound {
        missing: Missing,
        coordinates: String,
        location: String,
    },

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("no snapshots recorded for {0}")]
    Empty(String),

    #[error("lifecycle violation: {0}")]
    Lifecycle(String),

    #[error("error reading existing artifacts from repository {repository}: {message}")]
    Repository {
        repository: String,
        message: String,
    },

    #[error("metadata reader: {0}")]
    MetadataReader(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid version range {range:?}: {reason}")]
    VersionRange {
        range: String,
        reason: String,
    },

    #[error("processing failed: {0}")]
    Processing(#[source] anyhow::Error),

    #[error("transport failure: {0}")]
    Transport(#[source] anyhow::Error),
}

impl RepositoryError {
    pub fn not_found(missing: Missing, coordinates: impl Display, location: impl Display) -> RepositoryError {
        RepositoryError::NotFound {
            missing,
            coordinates: coordinates.to_string(),
            location: location.to_string(),
        }
    }

    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> RepositoryError {
        RepositoryError::Read { path: path.into(), source }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> RepositoryError {
        RepositoryError::Write { path: path.into(), source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }

    /// Local file system failures, as opposed to a repository not having something
    pub fn is_io(&self) -> bool {
        matches!(self, RepositoryError::Read { .. } | RepositoryError::Write { .. })
    }
}
