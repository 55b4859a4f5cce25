//! Document parser trait: raw bytes to a structured node tree

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DocumentSource, ParsedDocument};

/// Client of the document-parsing service
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, source: &DocumentSource) -> Result<ParsedDocument>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
