//! Hosted speech-to-text.
//!
//! Uploads audio to `POST {api.base_url}/audio/transcriptions` as
//! multipart form data and asks for `verbose_json`, which carries the
//! detected language, duration and timed segments besides the text.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use crate::api::ApiClient;
use crate::config::TranscriptionConfig;
use crate::models::{Transcript, TranscriptSegment};
use crate::traits::Transcriber;

pub struct HostedTranscriber {
    client: ApiClient,
    model: String,
    language: Option<String>,
}

impl HostedTranscriber {
    pub fn new(client: ApiClient, config: &TranscriptionConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            language: config.language.clone(),
        }
    }

    fn form(&self, audio: &[u8], file_name: &str) -> Form {
        let mut form = Form::new()
            .part(
                "file",
                Part::bytes(audio.to_vec()).file_name(file_name.to_string()),
            )
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }
        form
    }
}

#[derive(Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
}

impl From<VerboseTranscription> for Transcript {
    fn from(raw: VerboseTranscription) -> Self {
        Transcript {
            text: raw.text.trim().to_string(),
            language: raw.language,
            duration_secs: raw.duration,
            segments: raw
                .segments
                .into_iter()
                .map(|s| TranscriptSegment {
                    start_secs: s.start,
                    end_secs: s.end,
                    text: s.text.trim().to_string(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Transcriber for HostedTranscriber {
    fn model(&self) -> &str {
        &self.model
    }

    async fn transcribe(&self, audio: &[u8], file_name: &str) -> Result<Transcript> {
        debug!(model = %self.model, file_name, bytes = audio.len(), "uploading audio");
        let response = self
            .client
            .post_multipart("audio/transcriptions", || self.form(audio, file_name))
            .await?;
        let raw: VerboseTranscription = serde_json::from_value(response)
            .map_err(|e| anyhow!("invalid transcription response: {e}"))?;
        Ok(raw.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, Secrets};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transcriber(uri: &str) -> HostedTranscriber {
        let api = ApiConfig {
            base_url: uri.to_string(),
            max_retries: 0,
            ..ApiConfig::default()
        };
        let client = ApiClient::new(&api, &Secrets::with_api_key("k")).unwrap();
        HostedTranscriber::new(client, &TranscriptionConfig::default())
    }

    #[tokio::test]
    async fn parses_verbose_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(header("authorization", "Bearer k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "text": " Let's start with the budget. ",
                "language": "english",
                "duration": 4.2,
                "segments": [
                    {"id": 0, "start": 0.0, "end": 2.0, "text": " Let's start"},
                    {"id": 1, "start": 2.0, "end": 4.2, "text": " with the budget."}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let t = transcriber(&server.uri())
            .transcribe(b"RIFF....WAVE", "call.wav")
            .await
            .unwrap();
        assert_eq!(t.text, "Let's start with the budget.");
        assert_eq!(t.language.as_deref(), Some("english"));
        assert_eq!(t.duration_secs, Some(4.2));
        assert_eq!(t.segments.len(), 2);
        assert_eq!(t.segments[1].text, "with the budget.");
    }

    #[tokio::test]
    async fn plain_text_response_shape_still_parses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "hi"})))
            .mount(&server)
            .await;
        let t = transcriber(&server.uri())
            .transcribe(b"x", "a.mp3")
            .await
            .unwrap();
        assert_eq!(t.text, "hi");
        assert!(t.segments.is_empty());
    }

    #[tokio::test]
    async fn missing_text_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": null})))
            .mount(&server)
            .await;
        let err = transcriber(&server.uri())
            .transcribe(b"x", "a.mp3")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid transcription response"));
    }
}
