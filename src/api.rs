//! Client for the hosted, OpenAI-compatible API.
//!
//! Transcription, embedding and text generation all talk to the same
//! endpoint family, so they share one [`ApiClient`] with one retry policy:
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - other HTTP 4xx → fail immediately
//! - network errors and timeouts → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The cache layer never retries; these retries are the caller-side policy
//! for transient network failures.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::warn;

use crate::config::{ApiConfig, Secrets};

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, secrets: &Secrets) -> Result<Self> {
        let api_key = secrets
            .api_key()
            .ok_or_else(|| anyhow!("{} is not set", config.api_key_env))?
            .to_string();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `POST {base_url}/{path}` with a JSON body.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        self.send_with_retry(path, || self.http.post(&url).json(body))
            .await
    }

    /// `POST {base_url}/{path}` with a multipart body. `form` is called once
    /// per attempt because a multipart body cannot be replayed.
    pub async fn post_multipart(
        &self,
        path: &str,
        form: impl Fn() -> reqwest::multipart::Form,
    ) -> Result<Value> {
        let url = self.url(path);
        self.send_with_retry(path, || self.http.post(&url).multipart(form()))
            .await
    }

    /// `GET {base_url}/{path}` without retries; used by diagnostics.
    pub async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("could not reach {}", self.base_url))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("API error {} on {}: {}", status, path, truncate(&body_text));
        }
        Ok(response.json().await?)
    }

    async fn send_with_retry(
        &self,
        path: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = build().bearer_auth(&self.api_key).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .with_context(|| format!("invalid JSON from {}", path));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if is_retryable(status) {
                        warn!(%status, path, attempt, "API request failed, will retry");
                        last_err = Some(anyhow!(
                            "API error {} on {}: {}",
                            status,
                            path,
                            truncate(&body_text)
                        ));
                        continue;
                    }

                    bail!("API error {} on {}: {}", status, path, truncate(&body_text));
                }
                Err(e) => {
                    warn!(error = %e, path, attempt, "API request failed, will retry");
                    last_err = Some(anyhow!(e).context(format!(
                        "could not reach {}",
                        self.base_url
                    )));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("request to {} failed after retries", path)))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn truncate(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: &str, max_retries: u32) -> ApiClient {
        let config = ApiConfig {
            base_url: format!("{}/v1/", uri),
            timeout_secs: 5,
            max_retries,
            ..ApiConfig::default()
        };
        ApiClient::new(&config, &Secrets::with_api_key("test-key")).unwrap()
    }

    #[tokio::test]
    async fn sends_bearer_token_and_returns_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/echo"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let value = client(&server.uri(), 0)
            .post_json("echo", &json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[tokio::test]
    async fn retries_rate_limit_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": 1})))
            .mount(&server)
            .await;

        let value = client(&server.uri(), 2)
            .post_json("echo", &json!({}))
            .await
            .unwrap();
        assert_eq!(value["ok"], 1);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server.uri(), 3)
            .post_json("echo", &json!({}))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("401"), "{msg}");
        assert!(msg.contains("bad key"), "{msg}");
    }

    #[test]
    fn missing_key_is_an_error() {
        assert!(ApiClient::new(&ApiConfig::default(), &Secrets::default()).is_err());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let long = "é".repeat(400);
        let t = truncate(&long);
        assert!(t.len() < long.len());
        assert!(t.ends_with('…'));
    }
}
