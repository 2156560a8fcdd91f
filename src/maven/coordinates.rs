use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TYPE: &str = "jar";
pub const POM_TYPE: &str = "pom";

#[derive(PartialEq, Eq, Hash, Clone, Debug, Serialize, Deserialize)]
pub enum MavenClassifier {
    Unclassified,
    Classified(String),
}
impl MavenClassifier {
    /// An empty string means "no classifier"
    pub fn from_str_opt(classifier: &str) -> MavenClassifier {
        if classifier.is_empty() {
            MavenClassifier::Unclassified
        }
        else {
            MavenClassifier::Classified(classifier.to_string())
        }
    }

    /// `-<classifier>` or the empty string, as used in file names
    pub fn file_name_suffix(&self) -> String {
        match self {
            MavenClassifier::Unclassified => "".to_string(),
            MavenClassifier::Classified(c) => format!("-{}", c),
        }
    }
}
impl Default for MavenClassifier {
    fn default() -> Self {
        MavenClassifier::Unclassified
    }
}

/// Identifies a backend repository. Stored on query results to remember where they came from.
#[derive(PartialEq, Eq, Hash, Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryId(pub String);
impl Display for RepositoryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactCoordinates {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub classifier: MavenClassifier,
    pub file_type: String,
}
impl ArtifactCoordinates {
    pub fn new(group_id: &str, artifact_id: &str, version: &str) -> ArtifactCoordinates {
        ArtifactCoordinates {
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
            version: version.to_string(),
            classifier: MavenClassifier::Unclassified,
            file_type: DEFAULT_TYPE.to_string(),
        }
    }

    pub fn with_version(&self, version: &str) -> ArtifactCoordinates {
        ArtifactCoordinates {
            version: version.to_string(),
            ..self.clone()
        }
    }

    pub fn with_classifier(&self, classifier: MavenClassifier) -> ArtifactCoordinates {
        ArtifactCoordinates {
            classifier,
            ..self.clone()
        }
    }

    pub fn with_type(&self, file_type: &str) -> ArtifactCoordinates {
        ArtifactCoordinates {
            file_type: file_type.to_string(),
            ..self.clone()
        }
    }
}
impl Display for ArtifactCoordinates {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)?;
        if let MavenClassifier::Classified(c) = &self.classifier {
            write!(f, ":{}", c)?;
        }
        write!(f, ":{}", self.file_type)
    }
}
impl FromStr for ArtifactCoordinates {
    type Err = anyhow::Error;

    /// `group:artifact:version[:classifier[:type]]`
    fn from_str(s: &str) -> anyhow::Result<ArtifactCoordinates> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 3 || parts.len() > 5 || parts[..3].iter().any(|p| p.is_empty()) {
            return Err(anyhow!("not a valid artifact coordinate: {:?}", s));
        }

        let mut result = ArtifactCoordinates::new(parts[0], parts[1], parts[2]);
        if let Some(classifier) = parts.get(3) {
            result.classifier = MavenClassifier::from_str_opt(classifier);
        }
        if let Some(file_type) = parts.get(4) {
            if !file_type.is_empty() {
                result.file_type = file_type.to_string();
            }
        }
        Ok(result)
    }
}

/// Coordinates as used in queries and query results. `origin` records which repository produced
///  or is responsible for this item; it does not take part in equality or hashing.
#[derive(Clone, Debug)]
pub struct BasicMetadata {
    pub coordinates: ArtifactCoordinates,
    pub origin: Option<RepositoryId>,
}
impl BasicMetadata {
    pub fn new(coordinates: ArtifactCoordinates) -> BasicMetadata {
        BasicMetadata {
            coordinates,
            origin: None,
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<BasicMetadata> {
        Ok(BasicMetadata::new(s.parse()?))
    }

    pub fn with_origin(mut self, origin: RepositoryId) -> BasicMetadata {
        self.origin = Some(origin);
        self
    }

    pub fn version(&self) -> &str {
        &self.coordinates.version
    }
}
impl PartialEq for BasicMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.coordinates == other.coordinates
    }
}
impl Eq for BasicMetadata {}
impl Hash for BasicMetadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.coordinates.hash(state)
    }
}
impl Display for BasicMetadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.coordinates.fmt(f)
    }
}
impl From<ArtifactCoordinates> for BasicMetadata {
    fn from(value: ArtifactCoordinates) -> Self {
        BasicMetadata::new(value)
    }
}

/// A successfully resolved artifact. `metadata` carries the resolved version (e.g. a concrete
///  snapshot timestamp), not necessarily the version that was asked for.
#[derive(Clone, Debug)]
pub struct Artifact {
    pub metadata: BasicMetadata,
    pub file: PathBuf,
    pub pom_blob: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct ArtifactMetadata {
    pub metadata: BasicMetadata,
    pub dependencies: Vec<BasicMetadata>,
}
impl ArtifactMetadata {
    pub fn new(metadata: BasicMetadata) -> ArtifactMetadata {
        ArtifactMetadata {
            metadata,
            dependencies: Vec::new(),
        }
    }
}
