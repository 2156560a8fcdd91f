//! Maven artifact resolution across local and remote repositories.
//!
//! A [VirtualRepositoryReader] aggregates any number of Maven2 layout repositories, resolves
//!  `RELEASE`, `LATEST` and `-SNAPSHOT` versions, verifies files against their signature files
//!  and writes everything it finds through to a local repository.

pub mod config;
pub mod error;
pub mod maven;
pub mod repo;
pub mod util;

pub use config::ResolverConfig;
pub use error::RepositoryError;
pub use repo::{LocalRepository, RemoteRepository, Repository};
pub use repo::virtual_reader::VirtualRepositoryReader;
