//! Vector store provider trait for writing embedded chunks

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::VectorPoint;

/// Trait for the dense/sparse vector store
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    /// Insert or replace a batch of points
    async fn upsert(&self, points: &[VectorPoint]) -> Result<()>;

    /// Delete all points of a document, returning how many were removed
    async fn delete_by_document(&self, document_id: &Uuid) -> Result<usize>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
