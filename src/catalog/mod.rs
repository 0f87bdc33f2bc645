pub mod cache;
pub mod index;
pub mod requirements;
pub mod resolver;
pub mod tree;

use thiserror::Error;

pub use cache::{CacheStatus, CategoryCache};
pub use index::{BuildStatus, CategoryCandidate, VectorIndex};
pub use requirements::{AspectInfo, CategoryRequirements, RequirementsResolver};
pub use resolver::{CategoryResolution, CategoryResolver, ResolutionSource};
pub use tree::{Category, CategoryTree};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("taxonomy service: {0}")]
    Remote(String),
    #[error("taxonomy download contained no categories")]
    EmptyTaxonomy,
    #[error("category cache is empty")]
    EmptyCache,
    #[error("vector index has not been built")]
    IndexNotBuilt,
    #[error("embedding: {0}")]
    Embedding(String),
    #[error("io: {0}")]
    Io(String),
}
