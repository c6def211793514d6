use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding collaborator unavailable: {0}")]
    Unavailable(String),
}

/// The `Embed` capability (§6). Absence is tolerated throughout the
/// pipeline (§4.F): callers treat `Err` the same as "no embedding", not as
/// a fatal error.
#[async_trait]
pub trait Embed: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbeddingError>;
}

pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl HttpEmbeddingClient {
    pub fn new(endpoint: String, api_key: String, model: String, dims: usize) -> Self {
        HttpEmbeddingClient { client: reqwest::Client::new(), endpoint, api_key, model, dims }
    }
}

#[derive(serde::Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(serde::Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f64>,
}

#[async_trait]
impl Embed for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbeddingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest { model: &self.model, input: text })
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Unavailable(format!("HTTP {}", response.status())));
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Unavailable("empty data array".to_string()))?;

        if vector.len() != self.dims {
            return Err(EmbeddingError::Unavailable(format!(
                "expected {} dims, got {}",
                self.dims,
                vector.len()
            )));
        }

        Ok(vector)
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;

    pub struct UnavailableEmbedding;

    #[async_trait]
    impl Embed for UnavailableEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f64>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("no embedding collaborator configured in test".to_string()))
        }
    }

    pub struct ConstantEmbedding(pub Vec<f64>);

    #[async_trait]
    impl Embed for ConstantEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f64>, EmbeddingError> {
            Ok(self.0.clone())
        }
    }
}
