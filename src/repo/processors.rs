use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::RepositoryError;
use crate::maven::coordinates::BasicMetadata;

/// Well-known key of the list processor applied to version lists
pub const FUNCTION_TP: &str = "tp";

/// Gives dependency processors access to repository files, e.g. a POM or a parent POM
#[async_trait]
pub trait RawDataSource: Send + Sync {
    /// `Ok(None)` if there is no such file
    async fn read_raw_data(&self, metadata: &BasicMetadata, classifier: &str, file_type: &str) -> Result<Option<Vec<u8>>, RepositoryError>;
}

/// Extracts the dependencies of an artifact, typically from its POM
#[async_trait]
pub trait DependencyProcessor: Send + Sync {
    async fn get_dependencies(
        &self,
        metadata: &BasicMetadata,
        source: &dyn RawDataSource,
        environment: &HashMap<String, String>,
    ) -> anyhow::Result<Vec<BasicMetadata>>;
}

/// Processor for repositories that are not asked for dependencies
pub struct NullDependencyProcessor;

#[async_trait]
impl DependencyProcessor for NullDependencyProcessor {
    async fn get_dependencies(
        &self,
        _metadata: &BasicMetadata,
        _source: &dyn RawDataSource,
        _environment: &HashMap<String, String>,
    ) -> anyhow::Result<Vec<BasicMetadata>> {
        Ok(Vec::new())
    }
}

/// Post-processes a list of query results, e.g. to filter out versions
pub trait ArtifactListProcessor: Send {
    fn configure(&mut self, key: &BasicMetadata) -> anyhow::Result<()>;

    fn process(&mut self, list: Vec<BasicMetadata>) -> anyhow::Result<Vec<BasicMetadata>>;
}

/// The environment passed to dependency processors
pub fn process_environment() -> HashMap<String, String> {
    std::env::vars().collect()
}
