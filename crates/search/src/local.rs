//! In-process similarity index
//!
//! Brute-force cosine scan over an in-memory map. When opened with a path,
//! the full document set is loaded from a JSON snapshot and the snapshot is
//! rewritten (temp file then rename) after every mutation.

use crate::document::VectorDocument;
use crate::similarity::cosine_similarity;
use crate::store::{matches_filter, ScoredDocument, SearchFilter, VectorIndex};
use finsight_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    documents: Vec<VectorDocument>,
}

/// Local index with optional on-disk snapshot
pub struct LocalIndex {
    documents: RwLock<HashMap<String, VectorDocument>>,
    snapshot_path: Option<PathBuf>,
}

impl LocalIndex {
    /// Volatile index
    pub fn in_memory() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            snapshot_path: None,
        }
    }

    /// Index backed by a snapshot file. A missing file starts empty.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let documents = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
                    AppError::VectorIndex {
                        message: format!("Corrupt snapshot {}: {}", path.display(), e),
                    }
                })?;
                snapshot
                    .documents
                    .into_iter()
                    .map(|d| (d.id.clone(), d))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(AppError::VectorIndex {
                    message: format!("Failed to read snapshot {}: {}", path.display(), e),
                })
            }
        };

        tracing::info!(
            path = %path.display(),
            documents = documents.len(),
            "Local vector index opened"
        );

        Ok(Self {
            documents: RwLock::new(documents),
            snapshot_path: Some(path),
        })
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    async fn persist(&self, documents: &HashMap<String, VectorDocument>) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let mut ordered: Vec<VectorDocument> = documents.values().cloned().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));
        let bytes = serde_json::to_vec(&Snapshot {
            version: SNAPSHOT_VERSION,
            documents: ordered,
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(|e| AppError::VectorIndex {
            message: format!("Failed to write snapshot: {}", e),
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| AppError::VectorIndex {
            message: format!("Failed to replace snapshot: {}", e),
        })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl VectorIndex for LocalIndex {
    async fn upsert(&self, document: VectorDocument) -> Result<()> {
        let mut documents = self.documents.write().await;
        documents.insert(document.id.clone(), document);
        self.persist(&documents).await
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredDocument>> {
        let documents = self.documents.read().await;

        let mut scored: Vec<ScoredDocument> = documents
            .values()
            .filter(|d| matches_filter(d, filter))
            .map(|d| ScoredDocument {
                score: cosine_similarity(vector, &d.embedding),
                document: d.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn get(&self, id: &str) -> Result<Option<VectorDocument>> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut documents = self.documents.write().await;
        let removed = documents.remove(id).is_some();
        if removed {
            self.persist(&documents).await?;
        }
        Ok(removed)
    }

    async fn list_all(&self) -> Result<Vec<VectorDocument>> {
        let mut all: Vec<VectorDocument> = self.documents.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
