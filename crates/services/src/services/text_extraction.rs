use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("binary requires OCR before text can be extracted")]
    OcrRequired,
    #[error("text extraction failed: {0}")]
    Failed(String),
}

/// The raw-content collaborator (§4.H step 2): produces the artifact's
/// plain-text body from whatever was uploaded. A scanned/binary document
/// that can't be read directly signals `OcrRequired` rather than failing
/// outright, which the analyzer maps to the `ocr_required` terminal state.
#[async_trait]
pub trait TextExtraction: Send + Sync {
    async fn extract(&self, mime_type: &str, artifact_id: uuid::Uuid) -> Result<String, ExtractionError>;
}

/// Default wiring when no real extraction backend is configured. Binary
/// file formats and raw-file storage are both out-of-scope external
/// collaborators here (§OVERVIEW non-goals), so this never actually reads
/// bytes — it exists so the server has something to construct at startup
/// until a real OCR/extraction service is wired in.
pub struct UnconfiguredExtraction;

#[async_trait]
impl TextExtraction for UnconfiguredExtraction {
    async fn extract(&self, mime_type: &str, _artifact_id: uuid::Uuid) -> Result<String, ExtractionError> {
        if mime_type == "text/plain" {
            Err(ExtractionError::Failed(
                "no text-extraction backend configured and raw bytes are not available".to_string(),
            ))
        } else {
            Err(ExtractionError::OcrRequired)
        }
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;

    pub struct ConstantExtraction(pub String);

    #[async_trait]
    impl TextExtraction for ConstantExtraction {
        async fn extract(&self, _mime_type: &str, _artifact_id: uuid::Uuid) -> Result<String, ExtractionError> {
            Ok(self.0.clone())
        }
    }

    pub struct AlwaysOcrRequired;

    #[async_trait]
    impl TextExtraction for AlwaysOcrRequired {
        async fn extract(&self, _mime_type: &str, _artifact_id: uuid::Uuid) -> Result<String, ExtractionError> {
            Err(ExtractionError::OcrRequired)
        }
    }
}
