//! Embedding results and the records handed to the vector and graph stores

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::Chunk;

/// Sparse lexical vector (index/weight pairs)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Output of an embedding provider.
///
/// Providers return either a plain dense vector or a dense + sparse pair;
/// consumers match on the variant instead of assuming a shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Embedding {
    Dense { vector: Vec<f32> },
    Hybrid { dense: Vec<f32>, sparse: SparseVector },
}

impl Embedding {
    pub fn dense(vector: Vec<f32>) -> Self {
        Self::Dense { vector }
    }

    pub fn hybrid(dense: Vec<f32>, sparse: SparseVector) -> Self {
        Self::Hybrid { dense, sparse }
    }

    /// The dense component, present in both variants
    pub fn dense_vector(&self) -> &[f32] {
        match self {
            Embedding::Dense { vector } => vector,
            Embedding::Hybrid { dense, .. } => dense,
        }
    }

    pub fn sparse_vector(&self) -> Option<&SparseVector> {
        match self {
            Embedding::Dense { .. } => None,
            Embedding::Hybrid { sparse, .. } => Some(sparse),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dense_vector().len()
    }
}

/// A chunk together with its embedding, flowing from embedding to extraction
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Embedding,
}

/// A point written to the vector store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vectors: Embedding,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl VectorPoint {
    /// Build the store point for an embedded chunk of `document_id`
    pub fn from_embedded(document_id: Uuid, embedded: &EmbeddedChunk) -> Self {
        let mut payload = embedded.chunk.to_payload();
        payload.insert("document_id".to_string(), serde_json::json!(document_id.to_string()));
        payload.insert(
            "dimensions".to_string(),
            serde_json::json!(embedded.embedding.dimensions()),
        );

        match &embedded.embedding {
            Embedding::Dense { .. } => {
                payload.insert("has_sparse".to_string(), serde_json::json!(false));
            }
            Embedding::Hybrid { sparse, .. } => {
                payload.insert("has_sparse".to_string(), serde_json::json!(true));
                payload.insert("sparse_terms".to_string(), serde_json::json!(sparse.len()));
            }
        }

        Self {
            id: embedded.chunk.id,
            vectors: embedded.embedding.clone(),
            payload,
        }
    }
}

/// A pre-chunked text record for the graph store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    pub id: String,
    pub text: String,
    pub index: usize,
}

impl GraphRecord {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            id: chunk.id.to_string(),
            text: chunk.text.clone(),
            index: chunk.chunk_index,
        }
    }
}

/// Entities and relations extracted from a batch of records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub entities: usize,
    pub relations: usize,
}

impl std::ops::AddAssign for ExtractionOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.entities += rhs.entities;
        self.relations += rhs.relations;
    }
}
