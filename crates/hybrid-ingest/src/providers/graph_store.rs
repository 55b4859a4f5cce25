//! Graph store provider trait: entity/relation extraction over text records

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ExtractionOutcome, GraphRecord};

/// Knowledge-graph writer
///
/// The implementation runs entity/relation extraction on the records and
/// stores the result under `namespace`, isolating tenants from each other.
#[async_trait]
pub trait GraphStoreProvider: Send + Sync {
    async fn insert_records(&self, namespace: &str, records: &[GraphRecord]) -> Result<ExtractionOutcome>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
