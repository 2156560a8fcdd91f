pub mod coordinates;
pub mod gav_metadata;
pub mod metadata_xml;
pub mod paths;
pub mod version;

pub use coordinates::{Artifact, ArtifactCoordinates, ArtifactMetadata, BasicMetadata, MavenClassifier, RepositoryId};
pub use gav_metadata::GAVMetadata;
pub use version::{Quality, QualityRange, VersionRange};
