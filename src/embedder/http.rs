/// OpenAI-compatible HTTP embedding provider.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::{Embedder, EmbedderError};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Calls `POST {base_url}/embeddings` with `{model, input}`.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl HttpEmbedder {
    #[must_use]
    pub fn new(mut base_url: String, api_key: Option<String>, dimensions: usize) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            dimensions,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn request(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&EmbeddingRequest { model, input: texts });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbedderError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EmbedderError::Unavailable(e.to_string()))?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbedderError::RateLimited);
        }
        if status.is_server_error() {
            return Err(EmbedderError::Unavailable(format!("status {status}: {body}")));
        }
        if !status.is_success() {
            return Err(EmbedderError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: EmbeddingResponse =
            serde_json::from_str(&body).map_err(|e| EmbedderError::InvalidResponse(e.to_string()))?;
        let mut data = parsed.data;
        if data.len() != texts.len() {
            return Err(EmbedderError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }

        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(EmbedderError::InvalidResponse(format!(
                "expected dimension {}, got {}",
                self.dimensions,
                bad.len()
            )));
        }
        debug!(count = vectors.len(), model, "embedded batch");
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vectors = self.request(&[text.to_string()], model).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedderError::InvalidResponse("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts, model).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{http_response, spawn_mock_server};

    #[tokio::test]
    async fn test_embed_batch_orders_by_index() {
        let body = r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#;
        let port = spawn_mock_server(vec![http_response("200 OK", body)]).await;
        let embedder = HttpEmbedder::new(format!("http://127.0.0.1:{port}/v1/"), None, 2);
        let texts = vec!["a".to_string(), "b".to_string()];
        let vectors = embedder.embed_batch(&texts, "test-model").await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_retryable() {
        let port = spawn_mock_server(vec![http_response("429 Too Many Requests", "{}")]).await;
        let embedder = HttpEmbedder::new(format!("http://127.0.0.1:{port}"), Some("k".into()), 2);
        let err = embedder.embed("a", "m").await.unwrap_err();
        assert_eq!(err, EmbedderError::RateLimited);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let port = spawn_mock_server(vec![http_response("503 Service Unavailable", "busy")]).await;
        let embedder = HttpEmbedder::new(format!("http://127.0.0.1:{port}"), None, 2);
        let err = embedder.embed("a", "m").await.unwrap_err();
        assert!(matches!(err, EmbedderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_client_error_is_terminal() {
        let port = spawn_mock_server(vec![http_response("400 Bad Request", "no such model")]).await;
        let embedder = HttpEmbedder::new(format!("http://127.0.0.1:{port}"), None, 2);
        let err = embedder.embed("a", "m").await.unwrap_err();
        assert_eq!(
            err,
            EmbedderError::Rejected {
                status: 400,
                message: "no such model".into()
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_invalid_response() {
        let body = r#"{"data":[{"embedding":[1.0,0.0,0.0]}]}"#;
        let port = spawn_mock_server(vec![http_response("200 OK", body)]).await;
        let embedder = HttpEmbedder::new(format!("http://127.0.0.1:{port}"), None, 2);
        let err = embedder.embed("a", "m").await.unwrap_err();
        assert!(matches!(err, EmbedderError::InvalidResponse(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let embedder = HttpEmbedder::new("http://localhost".into(), Some("secret".into()), 4);
        let dbg = format!("{embedder:?}");
        assert!(!dbg.contains("secret"));
    }
}
