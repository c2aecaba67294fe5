use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use qdrant_client::qdrant::value::Kind as QdrantValueKind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointId, PointStruct, SearchPoints, UpsertPointsBuilder,
    VectorParams, Vectors, WithPayloadSelector, WithVectorsSelector,
};
use qdrant_client::{Payload, Qdrant};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::document::{Document, DocumentType, RetrievedContext, ScoredDocument, META_TYPE};
use crate::domain::vector_repository::VectorRepository;
use crate::error::VectorStoreError;

const BACKEND: &str = "qdrant";

/// Payload path of a point's document type tag.
fn type_key() -> String {
    format!("document.metadata.{}", META_TYPE)
}

fn type_condition(doc_type: DocumentType) -> Filter {
    Filter::must([Condition::matches(type_key(), doc_type.as_str().to_string())])
}

/// What a Qdrant point carries besides its vector.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct PointPayload {
    document: Document,
    /// Insertion order; newer points compare greater.
    inserted_at: i64,
}

/// `VectorRepository` backed by a Qdrant server. Collections use cosine distance.
pub struct QdrantVectorRepository {
    client: Qdrant,
}

impl QdrantVectorRepository {
    pub fn new(client: Qdrant) -> Self {
        Self { client }
    }

    pub fn connect(url: &str) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url).build().map_err(|e| backend_error(format!("failed to build client for {}: {}", url, e)))?;
        Ok(Self::new(client))
    }

    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<(), VectorStoreError> {
        log::info!("Creating collection '{}' with size {} and distance Cosine...", collection, dimension);
        let vector_params = VectorParams {
            size: dimension as u64,
            distance: Distance::Cosine.into(),
            hnsw_config: None,
            quantization_config: None,
            on_disk: None,
            multivector_config: None,
            datatype: None,
            memory: None,
        };
        self.client
            .create_collection(CreateCollectionBuilder::new(collection).vectors_config(vector_params))
            .await
            .map_err(|e| {
                log::error!("Failed to create collection '{}': {}", collection, e);
                backend_error(format!("failed to create collection '{}': {}", collection, e))
            })?;
        Ok(())
    }

    // Converts a Qdrant payload map back into JSON.
    fn qdrant_payload_to_serde_value(payload_map: HashMap<String, qdrant_client::qdrant::Value>) -> serde_json::Value {
        let json_map = payload_map
            .into_iter()
            .map(|(key, value)| (key, Self::qdrant_value_to_serde(value)))
            .collect();
        serde_json::Value::Object(json_map)
    }

    fn qdrant_value_to_serde(value: qdrant_client::qdrant::Value) -> serde_json::Value {
        match value.kind {
            Some(QdrantValueKind::NullValue(_)) | None => serde_json::Value::Null,
            Some(QdrantValueKind::BoolValue(b)) => serde_json::Value::Bool(b),
            Some(QdrantValueKind::DoubleValue(d)) => serde_json::Number::from_f64(d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Some(QdrantValueKind::IntegerValue(i)) => serde_json::Value::Number(i.into()),
            Some(QdrantValueKind::StringValue(s)) => serde_json::Value::String(s),
            Some(QdrantValueKind::ListValue(list)) => {
                serde_json::Value::Array(list.values.into_iter().map(Self::qdrant_value_to_serde).collect())
            }
            Some(QdrantValueKind::StructValue(s)) => Self::qdrant_payload_to_serde_value(s.fields),
        }
    }
}

fn backend_error(message: String) -> VectorStoreError {
    VectorStoreError::Backend {
        backend: BACKEND.to_string(),
        message,
    }
}

#[async_trait]
impl VectorRepository for QdrantVectorRepository {
    async fn upsert(&self, collection: &str, documents: &[Document], vectors: &[Vec<f32>]) -> Result<(), VectorStoreError> {
        if documents.len() != vectors.len() {
            return Err(VectorStoreError::LengthMismatch {
                documents: documents.len(),
                vectors: vectors.len(),
            });
        }
        if documents.is_empty() {
            log::info!("No documents provided for upsert.");
            return Ok(());
        }

        let existing = self.dimension_of(collection).await?;
        let expected = existing.unwrap_or(vectors[0].len());
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected,
                actual: bad.len(),
            });
        }

        // Build every point before creating anything so a bad document never leaves a half-written batch.
        let base = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let points = documents
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (document, vector))| {
                let payload_value = serde_json::to_value(PointPayload {
                    document: document.clone(),
                    inserted_at: base + i as i64,
                })
                .map_err(|e| backend_error(format!("failed to serialize document {}: {}", document.id, e)))?;
                let payload = Payload::try_from(payload_value)
                    .map_err(|e| backend_error(format!("failed to convert payload for document {}: {}", document.id, e)))?;
                Ok(PointStruct {
                    id: Some(PointId::from(Uuid::new_v4().to_string())),
                    vectors: Some(Vectors::from(vector.clone())),
                    payload: payload.into(),
                })
            })
            .collect::<Result<Vec<_>, VectorStoreError>>()?;

        if existing.is_none() {
            self.create_collection(collection, expected).await?;
        }

        let count = points.len();
        log::info!("Upserting {} points into collection '{}'...", count, collection);
        let response = self
            .client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(|e| {
                log::error!("Failed to upsert points into collection '{}': {}", collection, e);
                backend_error(format!("upsert into '{}' failed: {}", collection, e))
            })?;
        log::debug!("Upsert response: {:?}", response);
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
        let Some(dimension) = self.dimension_of(collection).await? else {
            log::debug!("Collection '{}' does not exist yet; returning empty context", collection);
            return Ok(RetrievedContext::empty());
        };
        if query_vector.len() != dimension {
            return Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: dimension,
                actual: query_vector.len(),
            });
        }

        let search_request = SearchPoints {
            collection_name: collection.to_string(),
            vector: query_vector.to_vec(),
            limit: k as u64,
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(qdrant_client::qdrant::with_payload_selector::SelectorOptions::Enable(true)),
            }),
            with_vectors: Some(WithVectorsSelector {
                selector_options: Some(qdrant_client::qdrant::with_vectors_selector::SelectorOptions::Enable(false)),
            }),
            score_threshold: Some(min_score),
            filter: type_filter.map(type_condition),
            ..Default::default()
        };

        let response = self.client.search_points(search_request).await.map_err(|e| {
            log::error!("Qdrant search failed in collection '{}': {}", collection, e);
            backend_error(format!("search in '{}' failed: {}", collection, e))
        })?;

        let mut hits: Vec<ScoredDocument> = response
            .result
            .into_iter()
            .filter_map(|point| {
                if point.payload.is_empty() {
                    log::warn!("Search result point {:?} has no payload, skipping.", point.id);
                    return None;
                }
                let json_value = Self::qdrant_payload_to_serde_value(point.payload);
                match serde_json::from_value::<PointPayload>(json_value) {
                    Ok(payload) => Some(ScoredDocument {
                        document: payload.document,
                        score: point.score,
                        sequence: u64::try_from(payload.inserted_at).unwrap_or_default(),
                    }),
                    Err(e) => {
                        log::error!("Failed to deserialize payload of point {:?}: {}", point.id, e);
                        None
                    }
                }
            })
            .collect();

        hits.sort_by(|a, b| match b.score.total_cmp(&a.score) {
            Ordering::Equal => b.sequence.cmp(&a.sequence),
            other => other,
        });
        hits.truncate(k);
        Ok(RetrievedContext::new(hits))
    }

    async fn reset_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .map_err(|e| backend_error(format!("failed to check collection '{}': {}", collection, e)))?;
        if exists {
            self.client
                .delete_collection(collection)
                .await
                .map_err(|e| backend_error(format!("failed to delete collection '{}': {}", collection, e)))?;
            log::info!("Dropped collection '{}'", collection);
        }
        Ok(())
    }

    async fn dimension_of(&self, collection: &str) -> Result<Option<usize>, VectorStoreError> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .map_err(|e| backend_error(format!("failed to check collection '{}': {}", collection, e)))?;
        if !exists {
            return Ok(None);
        }
        let info = self
            .client
            .collection_info(collection)
            .await
            .map_err(|e| backend_error(format!("failed to read collection '{}': {}", collection, e)))?;
        let size = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|vc| vc.config)
            .and_then(|config| match config {
                VectorsConfigKind::Params(params) => Some(params.size as usize),
                VectorsConfigKind::ParamsMap(_) => None,
            });
        match size {
            Some(size) => Ok(Some(size)),
            None => Err(backend_error(format!(
                "collection '{}' does not use a single unnamed vector",
                collection
            ))),
        }
    }
}
