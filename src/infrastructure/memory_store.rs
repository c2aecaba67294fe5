//! In-process vector index with cosine similarity and an optional gzip
//! JSONL snapshot on disk, so a build and later queries can run in
//! separate processes.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::domain::document::{Document, DocumentType, RetrievedContext, ScoredDocument};
use crate::domain::vector_repository::VectorRepository;
use crate::error::VectorStoreError;

const BACKEND: &str = "memory";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    sequence: u64,
    document: Document,
    vector: Vec<f32>,
}

#[derive(Debug, Default)]
struct Collection {
    dimension: usize,
    entries: Vec<Entry>,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Collection>,
    next_sequence: u64,
}

/// One line of the snapshot file.
#[derive(Serialize, Deserialize)]
struct SnapshotLine {
    collection: String,
    dimension: usize,
    #[serde(flatten)]
    entry: Entry,
}

#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    state: RwLock<State>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a store from a snapshot. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, VectorStoreError> {
        if !path.exists() {
            debug!("No vector snapshot at {:?}, starting empty", path);
            return Ok(Self::new());
        }
        let file = File::open(path).map_err(|e| backend_error(format!("failed to open snapshot {:?}: {}", path, e)))?;
        let reader = BufReader::new(GzDecoder::new(file));
        let mut state = State::default();
        for (n, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| backend_error(format!("failed to read snapshot {:?}: {}", path, e)))?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: SnapshotLine = serde_json::from_str(&line)
                .map_err(|e| backend_error(format!("snapshot {:?} line {} is invalid: {}", path, n + 1, e)))?;
            if parsed.entry.vector.len() != parsed.dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    collection: parsed.collection,
                    expected: parsed.dimension,
                    actual: parsed.entry.vector.len(),
                });
            }
            state.next_sequence = state.next_sequence.max(parsed.entry.sequence + 1);
            let collection = state.collections.entry(parsed.collection.clone()).or_insert_with(|| Collection {
                dimension: parsed.dimension,
                entries: Vec::new(),
            });
            if collection.dimension != parsed.dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    collection: parsed.collection,
                    expected: collection.dimension,
                    actual: parsed.dimension,
                });
            }
            collection.entries.push(parsed.entry);
        }
        let total: usize = state.collections.values().map(|c| c.entries.len()).sum();
        info!("Loaded {} vectors in {} collections from {:?}", total, state.collections.len(), path);
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Writes every collection to `path`, replacing it atomically via a temp file.
    pub async fn save(&self, path: &Path) -> Result<(), VectorStoreError> {
        let state = self.state.read().await;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| backend_error(format!("failed to create {:?}: {}", parent, e)))?;
        }
        let tmp = path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            let file = File::create(&tmp)?;
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            let mut names: Vec<&String> = state.collections.keys().collect();
            names.sort();
            for name in names {
                let collection = &state.collections[name];
                for entry in &collection.entries {
                    let line = SnapshotLine {
                        collection: name.clone(),
                        dimension: collection.dimension,
                        entry: entry.clone(),
                    };
                    serde_json::to_writer(&mut encoder, &line)?;
                    encoder.write_all(b"\n")?;
                }
            }
            encoder.finish()?.flush()?;
            Ok(())
        };
        write().map_err(|e| backend_error(format!("failed to write snapshot {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, path).map_err(|e| backend_error(format!("failed to move snapshot into {:?}: {}", path, e)))?;
        debug!("Saved vector snapshot to {:?}", path);
        Ok(())
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.state.read().await.collections.get(collection).map_or(0, |c| c.entries.len())
    }
}

fn backend_error(message: String) -> VectorStoreError {
    VectorStoreError::Backend {
        backend: BACKEND.to_string(),
        message,
    }
}

/// Returns 0.0 if either vector has zero magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorRepository for MemoryVectorStore {
    async fn upsert(&self, collection: &str, documents: &[Document], vectors: &[Vec<f32>]) -> Result<(), VectorStoreError> {
        if documents.len() != vectors.len() {
            return Err(VectorStoreError::LengthMismatch {
                documents: documents.len(),
                vectors: vectors.len(),
            });
        }
        if documents.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;
        let expected = state
            .collections
            .get(collection)
            .map(|c| c.dimension)
            .unwrap_or_else(|| vectors[0].len());
        // Validate everything before the first write.
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected,
                actual: bad.len(),
            });
        }

        let mut sequence = state.next_sequence;
        let entries: Vec<Entry> = documents
            .iter()
            .zip(vectors)
            .map(|(document, vector)| {
                sequence += 1;
                Entry {
                    sequence,
                    document: document.clone(),
                    vector: vector.clone(),
                }
            })
            .collect();
        state.next_sequence = sequence + 1;
        state
            .collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                dimension: expected,
                entries: Vec::new(),
            })
            .entries
            .extend(entries);
        debug!("Upserted {} documents into '{}'", documents.len(), collection);
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
        min_score: f32,
        type_filter: Option<DocumentType>,
    ) -> Result<RetrievedContext, VectorStoreError> {
        let state = self.state.read().await;
        let Some(store) = state.collections.get(collection) else {
            return Ok(RetrievedContext::empty());
        };
        if query_vector.len() != store.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: store.dimension,
                actual: query_vector.len(),
            });
        }

        let mut scored: Vec<(f32, u64, &Entry)> = store
            .entries
            .iter()
            .filter(|entry| type_filter.map_or(true, |t| entry.document.doc_type() == Some(t)))
            .map(|entry| (cosine_similarity(&entry.vector, query_vector), entry.sequence, entry))
            .filter(|(score, _, _)| *score >= min_score)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
        scored.truncate(k);

        Ok(RetrievedContext::new(
            scored
                .into_iter()
                .map(|(score, sequence, entry)| ScoredDocument {
                    document: entry.document.clone(),
                    score,
                    sequence,
                })
                .collect(),
        ))
    }

    async fn reset_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        let mut state = self.state.write().await;
        if state.collections.remove(collection).is_some() {
            info!("Dropped collection '{}'", collection);
        }
        Ok(())
    }

    async fn dimension_of(&self, collection: &str) -> Result<Option<usize>, VectorStoreError> {
        Ok(self.state.read().await.collections.get(collection).map(|c| c.dimension))
    }
}
