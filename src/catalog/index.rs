//! Embedding index over leaf categories.
//!
//! Every vector is L2-normalized at build and query time, so cosine
//! similarity is a plain dot product over a flat `f32` buffer.

use crate::catalog::CatalogError;
use crate::catalog::cache::CategoryCache;
use crate::embeddings::{Embedder, dot, l2_normalize};
use crate::store::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

pub const INDEX_FORMAT_VERSION: u32 = 1;
pub const INDEX_MIN_LEVEL: u32 = 2;
pub const INDEX_MAX_LEVEL: u32 = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub category_id: String,
    pub name: String,
    pub path: String,
    pub level: u32,
}

impl IndexEntry {
    fn searchable_text(&self) -> String {
        format!("{} - {}", self.name, self.path)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryCandidate {
    pub category_id: String,
    pub name: String,
    pub path: String,
    pub level: u32,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    format_version: u32,
    model: String,
    dimension: usize,
    built_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
    vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Default)]
struct IndexData {
    dimension: usize,
    entries: Vec<IndexEntry>,
    vectors: Vec<f32>,
}

impl IndexData {
    fn row(&self, idx: usize) -> &[f32] {
        &self.vectors[idx * self.dimension..(idx + 1) * self.dimension]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Reused,
    Built,
}

pub struct VectorIndex {
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
    data: RwLock<Arc<IndexData>>,
}

impl VectorIndex {
    pub fn new(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            embedder,
            data: RwLock::new(Arc::new(IndexData::default())),
        }
    }

    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Arc<IndexData> {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn swap(&self, data: IndexData) {
        let mut guard = self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(data);
    }

    /// Loads a compatible persisted index, or embeds every leaf at levels 2 to 4.
    pub async fn build(&self, cache: &CategoryCache, force: bool) -> Result<BuildStatus, CatalogError> {
        if !force {
            match self.load_compatible().await {
                Ok(Some(data)) => {
                    info!(
                        target = "relister.catalog",
                        entries = data.entries.len(),
                        dimension = data.dimension,
                        "vector_index_loaded"
                    );
                    self.swap(data);
                    return Ok(BuildStatus::Reused);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(target = "relister.catalog", error = %err, "vector_index_unreadable_rebuilding");
                }
            }
        }

        let tree = cache.snapshot();
        let entries: Vec<IndexEntry> = tree
            .leaves(INDEX_MIN_LEVEL, INDEX_MAX_LEVEL)
            .into_iter()
            .map(|category| IndexEntry {
                category_id: category.id.clone(),
                name: category.name.clone(),
                path: tree.path(&category.id).unwrap_or_else(|| category.name.clone()),
                level: category.level,
            })
            .collect();
        if entries.is_empty() {
            return Err(CatalogError::EmptyCache);
        }

        let texts: Vec<String> = entries.iter().map(IndexEntry::searchable_text).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let mut vectors = self
            .embedder
            .embed(&refs)
            .await
            .map_err(|err| CatalogError::Embedding(err.to_string()))?;
        if vectors.len() != entries.len() {
            return Err(CatalogError::Embedding(format!(
                "{} vectors for {} categories",
                vectors.len(),
                entries.len()
            )));
        }
        let dimension = vectors.first().map(Vec::len).unwrap_or_default();
        if dimension == 0 || vectors.iter().any(|v| v.len() != dimension) {
            return Err(CatalogError::Embedding("inconsistent embedding dimensions".into()));
        }
        vectors.iter_mut().for_each(|v| l2_normalize(v));

        let persisted = PersistedIndex {
            format_version: INDEX_FORMAT_VERSION,
            model: self.embedder.model_name().to_string(),
            dimension,
            built_at: Utc::now(),
            entries,
            vectors,
        };
        let bytes = serde_json::to_vec(&persisted).map_err(|err| CatalogError::Io(err.to_string()))?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|err| CatalogError::Io(err.to_string()))?;
        info!(
            target = "relister.catalog",
            entries = persisted.entries.len(),
            dimension,
            model = %persisted.model,
            "vector_index_built"
        );
        self.swap(flatten(persisted));
        Ok(BuildStatus::Built)
    }

    async fn load_compatible(&self) -> Result<Option<IndexData>, CatalogError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CatalogError::Io(err.to_string())),
        };
        let persisted: PersistedIndex =
            serde_json::from_slice(&bytes).map_err(|err| CatalogError::Io(err.to_string()))?;
        let compatible = persisted.format_version == INDEX_FORMAT_VERSION
            && persisted.model == self.embedder.model_name()
            && persisted.dimension > 0
            && !persisted.entries.is_empty()
            && persisted.entries.len() == persisted.vectors.len()
            && persisted.vectors.iter().all(|v| v.len() == persisted.dimension);
        Ok(compatible.then(|| flatten(persisted)))
    }

    /// Top `top_k` leaf categories by cosine similarity, best first.
    pub async fn search(
        &self,
        title: &str,
        description: &str,
        top_k: usize,
    ) -> Result<Vec<CategoryCandidate>, CatalogError> {
        let data = self.current();
        if data.entries.is_empty() {
            return Err(CatalogError::IndexNotBuilt);
        }
        let query = format!("{} {}", title.trim(), description.trim());
        let mut vectors = self
            .embedder
            .embed(&[query.trim()])
            .await
            .map_err(|err| CatalogError::Embedding(err.to_string()))?;
        let mut query_vec = vectors
            .pop()
            .ok_or_else(|| CatalogError::Embedding("empty embedding response".into()))?;
        if query_vec.len() != data.dimension {
            return Err(CatalogError::Embedding(format!(
                "query dimension {} does not match index dimension {}",
                query_vec.len(),
                data.dimension
            )));
        }
        l2_normalize(&mut query_vec);

        let mut scored: Vec<(usize, f32)> = (0..data.entries.len())
            .map(|idx| (idx, dot(&query_vec, data.row(idx))))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(idx, score)| {
                let entry = &data.entries[idx];
                CategoryCandidate {
                    category_id: entry.category_id.clone(),
                    name: entry.name.clone(),
                    path: entry.path.clone(),
                    level: entry.level,
                    score,
                }
            })
            .collect())
    }
}

fn flatten(persisted: PersistedIndex) -> IndexData {
    let mut flat = Vec::with_capacity(persisted.dimension * persisted.vectors.len());
    for vector in persisted.vectors {
        flat.extend(vector);
    }
    IndexData {
        dimension: persisted.dimension,
        entries: persisted.entries,
        vectors: flat,
    }
}
