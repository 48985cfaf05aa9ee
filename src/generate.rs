//! Hosted text generation.
//!
//! [`ChatGenerator`] sends one system message and one user message to
//! `POST {api.base_url}/chat/completions` and returns the first choice.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::config::GenerationConfig;
use crate::traits::TextGenerator;

pub struct ChatGenerator {
    client: ApiClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatGenerator {
    pub fn new(client: ApiClient, config: &GenerationConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl TextGenerator for ChatGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });
        let response = self.client.post_json("chat/completions", &body).await?;
        completion_text(&response)
    }
}

fn completion_text(response: &Value) -> Result<String> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("invalid chat completion response: no choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, Secrets};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_messages_and_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "  1. Budget\n"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiConfig {
            base_url: server.uri(),
            max_retries: 0,
            ..ApiConfig::default()
        };
        let client = ApiClient::new(&api, &Secrets::with_api_key("k")).unwrap();
        let generator = ChatGenerator::new(client, &GenerationConfig::default());
        let text = generator.generate("sys", "hello").await.unwrap();
        assert_eq!(text, "1. Budget");
    }

    #[test]
    fn empty_choices_are_an_error() {
        assert!(completion_text(&json!({"choices": []})).is_err());
    }
}
