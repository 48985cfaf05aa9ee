//! Embedding collaborator and vector math.
//!
//! [`HostedEmbedder`] calls `POST {api.base_url}/embeddings` in batches of
//! `embedding.batch_size` and returns one vector per input, in input order.
//! [`cosine_similarity`] ranks chunks against a query vector at search time.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::ApiClient;
use crate::config::EmbeddingConfig;
use crate::traits::Embedder;

pub struct HostedEmbedder {
    client: ApiClient,
    model: String,
    batch_size: usize,
}

impl HostedEmbedder {
    pub fn new(client: ApiClient, config: &EmbeddingConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
        }
    }
}

#[async_trait]
impl Embedder for HostedEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(model = %self.model, batch = batch.len(), "embedding batch");
            let body = json!({
                "model": self.model,
                "input": batch,
            });
            let response = self.client.post_json("embeddings", &body).await?;
            let embedded = parse_embeddings(&response)?;
            if embedded.len() != batch.len() {
                bail!(
                    "embeddings response has {} vectors for {} inputs",
                    embedded.len(),
                    batch.len()
                );
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index` when present.
fn parse_embeddings(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("invalid embeddings response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("invalid embeddings response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let vector = embedding
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| anyhow!("invalid embeddings response: non-numeric value"))
            })
            .collect::<Result<Vec<f32>>>()?;
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, Secrets};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder(uri: &str, batch_size: usize) -> HostedEmbedder {
        let api = ApiConfig {
            base_url: uri.to_string(),
            max_retries: 0,
            ..ApiConfig::default()
        };
        let client = ApiClient::new(&api, &Secrets::with_api_key("k")).unwrap();
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            batch_size,
            ..EmbeddingConfig::default()
        };
        HostedEmbedder::new(client, &config)
    }

    #[tokio::test]
    async fn batches_requests_and_keeps_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(json!({"input": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(json!({"input": ["c"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [0.5, 0.5]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let vectors = embedder(&server.uri(), 2).embed(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]]);
    }

    #[tokio::test]
    async fn count_mismatch_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;
        let err = embedder(&server.uri(), 8)
            .embed(&["x".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("0 vectors for 1 inputs"));
    }

    #[test]
    fn malformed_response_is_rejected() {
        assert!(parse_embeddings(&json!({"object": "list"})).is_err());
        assert!(parse_embeddings(&json!({"data": [{"embedding": ["x"]}]})).is_err());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
