//! Vision provider trait for describing embedded pictures

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ImageBitmap;

/// Produces a text description of a picture
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn describe(&self, image: &ImageBitmap) -> Result<String>;

    /// Model identifier recorded on each annotation
    fn model(&self) -> &str;
}
