//! Image recompression seam.
//!
//! Codecs live outside this crate. A [`CompressionPipeline`] maps MIME types
//! to registered [`ImageCompressor`]s and runs them off the async runtime.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use wikifetch_core::Error;

/// A CPU-bound compressor for one image format.
pub trait ImageCompressor: Send + Sync {
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, Error>;
}

impl<F> ImageCompressor for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, Error> + Send + Sync,
{
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, Error> {
        self(input)
    }
}

/// Outcome of running the pipeline on one body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compressed {
    /// The compressor produced a strictly smaller body.
    Smaller(Bytes),
    /// No compressor, a failure, or no gain: keep the original.
    Unchanged,
}

#[derive(Clone, Default)]
pub struct CompressionPipeline {
    compressors: HashMap<String, Arc<dyn ImageCompressor>>,
}

impl std::fmt::Debug for CompressionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut mimes: Vec<_> = self.compressors.keys().collect();
        mimes.sort();
        f.debug_struct("CompressionPipeline").field("mime_types", &mimes).finish()
    }
}

/// The bare MIME type of a `content-type` value, lowercased.
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn is_image_mime(content_type: &str) -> bool {
    mime_essence(content_type).starts_with("image/")
}

impl CompressionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `compressor` for `mime_type`, replacing any earlier one.
    pub fn with_compressor(mut self, mime_type: &str, compressor: impl ImageCompressor + 'static) -> Self {
        self.compressors
            .insert(mime_essence(mime_type), Arc::new(compressor));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.compressors.is_empty()
    }

    /// Compress `content` with the compressor registered for `content_type`.
    ///
    /// Compressor errors are logged and reported as [`Compressed::Unchanged`].
    pub async fn compress(&self, content_type: &str, content: Bytes) -> Compressed {
        let mime = mime_essence(content_type);
        let Some(compressor) = self.compressors.get(&mime).cloned() else {
            return Compressed::Unchanged;
        };

        let original_len = content.len();
        let result = tokio::task::spawn_blocking(move || compressor.compress(&content)).await;

        match result {
            Ok(Ok(output)) if output.len() < original_len => {
                tracing::debug!(mime = %mime, from = original_len, to = output.len(), "compressed image");
                Compressed::Smaller(Bytes::from(output))
            }
            Ok(Ok(_)) => Compressed::Unchanged,
            Ok(Err(e)) => {
                tracing::warn!(mime = %mime, error = %e, "image compression failed, keeping original");
                Compressed::Unchanged
            }
            Err(e) => {
                let err = Error::Compression(e.to_string());
                tracing::warn!(mime = %mime, error = %err, "image compression task failed, keeping original");
                Compressed::Unchanged
            }
        }
    }
}
