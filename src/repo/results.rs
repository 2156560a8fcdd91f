use std::collections::HashMap;

use crate::error::RepositoryError;
use crate::maven::coordinates::{Artifact, BasicMetadata};

/// Per query item results of a batch operation, plus per query item errors. An item can have
///  both if it was answered by one repository after another one failed.
#[derive(Debug)]
pub struct QueryResults<T> {
    results: HashMap<BasicMetadata, Vec<T>>,
    errors: HashMap<BasicMetadata, RepositoryError>,
}

pub type ArtifactResults = QueryResults<Artifact>;
pub type ArtifactBasicResults = QueryResults<BasicMetadata>;

impl<T> Default for QueryResults<T> {
    fn default() -> Self {
        QueryResults {
            results: HashMap::new(),
            errors: HashMap::new(),
        }
    }
}

impl<T> QueryResults<T> {
    pub fn new() -> QueryResults<T> {
        Default::default()
    }

    pub fn add(&mut self, key: &BasicMetadata, value: T) {
        self.results.entry(key.clone()).or_default().push(value);
    }

    pub fn add_all(&mut self, key: &BasicMetadata, values: impl IntoIterator<Item = T>) {
        self.results.entry(key.clone()).or_default().extend(values);
    }

    pub fn add_error(&mut self, key: &BasicMetadata, error: RepositoryError) {
        self.errors.insert(key.clone(), error);
    }

    pub fn has_results(&self) -> bool {
        self.results.values().any(|v| !v.is_empty())
    }

    pub fn has_results_for(&self, key: &BasicMetadata) -> bool {
        self.results.get(key).map(|v| !v.is_empty()).unwrap_or(false)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn result(&self, key: &BasicMetadata) -> Option<&[T]> {
        self.results.get(key).map(|v| v.as_slice())
    }

    pub fn results(&self) -> &HashMap<BasicMetadata, Vec<T>> {
        &self.results
    }

    pub fn error(&self, key: &BasicMetadata) -> Option<&RepositoryError> {
        self.errors.get(key)
    }

    pub fn errors(&self) -> &HashMap<BasicMetadata, RepositoryError> {
        &self.errors
    }

    pub fn into_parts(self) -> (HashMap<BasicMetadata, Vec<T>>, HashMap<BasicMetadata, RepositoryError>) {
        (self.results, self.errors)
    }
}
