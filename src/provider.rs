use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RelayError;
use crate::session::Turn;
use crate::settings::Settings;

/// Remote chat-completion service.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Sends the full turn history and returns the first completion's
    /// text, empty when the upstream returns no choices.
    async fn chat(&self, model: &str, turns: &[Turn]) -> Result<String, RelayError>;
}

/// Remote speech services: audio-to-text and text-to-audio.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    async fn transcribe(
        &self,
        model: &str,
        audio_path: &Path,
        media_type: &str,
    ) -> Result<String, RelayError>;

    /// Returns synthesized mp3 bytes for `text` spoken by `voice`.
    async fn synthesize(
        &self,
        model: &str,
        text: &str,
        voice: &str,
    ) -> Result<Vec<u8>, RelayError>;
}

/// OpenAI-compatible HTTP client for both trait seams.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn chat(&self, model: &str, turns: &[Turn]) -> Result<String, RelayError> {
        let resp = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest { model, messages: turns })
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp).await?;
        let body: ChatResponse = resp.json().await.map_err(transport_error)?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl SpeechProvider for OpenAiProvider {
    async fn transcribe(
        &self,
        model: &str,
        audio_path: &Path,
        media_type: &str,
    ) -> Result<String, RelayError> {
        let bytes = tokio::fs::read(audio_path)
            .await
            .map_err(|e| RelayError::Internal(e.into()))?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(media_type)
            .map_err(|e| RelayError::Internal(e.into()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", model.to_string())
            .part("file", part);

        let resp = self
            .client
            .post(self.url("/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp).await?;
        let body: TranscriptionResponse = resp.json().await.map_err(transport_error)?;
        Ok(body.text.unwrap_or_default())
    }

    async fn synthesize(
        &self,
        model: &str,
        text: &str,
        voice: &str,
    ) -> Result<Vec<u8>, RelayError> {
        let resp = self
            .client
            .post(self.url("/audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest { model, input: text, voice, response_format: "mp3" })
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

fn transport_error(err: reqwest::Error) -> RelayError {
    RelayError::Upstream {
        status: err.status().map(|s| s.as_u16()),
        message: err.to_string(),
    }
}

/// Turns a non-2xx upstream response into an `Upstream` error, pulling the
/// human-readable message out of an OpenAI-shaped `{"error":{"message"}}`
/// body when one is present.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, RelayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("upstream returned {status}")
            } else {
                body.trim().to_string()
            }
        });
    Err(RelayError::Upstream { status: Some(status.as_u16()), message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn provider(base_url: &str) -> OpenAiProvider {
        OpenAiProvider::new(&Settings::for_tests(base_url))
    }

    #[tokio::test]
    async fn chat_extracts_first_choice_content() {
        let base = serve(Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["messages"][0]["role"], "user");
                Json(json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": "hello there"}},
                        {"message": {"role": "assistant", "content": "ignored"}}
                    ]
                }))
            }),
        ))
        .await;

        let answer = provider(&base)
            .chat("gpt-4o-mini", &[Turn::user("hi")])
            .await
            .unwrap();
        assert_eq!(answer, "hello there");
    }

    #[tokio::test]
    async fn chat_with_no_choices_yields_empty_answer() {
        let base = serve(Router::new().route(
            "/chat/completions",
            post(|| async { Json(json!({"choices": []})) }),
        ))
        .await;

        let answer = provider(&base)
            .chat("gpt-4o-mini", &[Turn::user("hi")])
            .await
            .unwrap();
        assert_eq!(answer, "");
    }

    #[tokio::test]
    async fn upstream_error_message_is_extracted() {
        let base = serve(Router::new().route(
            "/chat/completions",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": {"message": "Incorrect API key"}})),
                )
            }),
        ))
        .await;

        let err = provider(&base)
            .chat("gpt-4o-mini", &[Turn::user("hi")])
            .await
            .unwrap_err();
        match err {
            RelayError::Upstream { status, message } => {
                assert_eq!(status, Some(401));
                assert_eq!(message, "Incorrect API key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_body_is_passed_through() {
        let base = serve(Router::new().route(
            "/audio/speech",
            post(|| async { (StatusCode::BAD_GATEWAY, "bad gateway\n") }),
        ))
        .await;

        let err = provider(&base)
            .synthesize("tts-1", "hi", "alloy")
            .await
            .unwrap_err();
        match err {
            RelayError::Upstream { status, message } => {
                assert_eq!(status, Some(502));
                assert_eq!(message, "bad gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn synthesize_returns_raw_bytes() {
        let base = serve(Router::new().route(
            "/audio/speech",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["voice"], "nova");
                assert_eq!(body["response_format"], "mp3");
                vec![1u8, 2, 3]
            }),
        ))
        .await;

        let bytes = provider(&base)
            .synthesize("tts-1", "say this", "nova")
            .await
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn transcribe_round_trips_file_bytes() {
        let base = serve(Router::new().route(
            "/audio/transcriptions",
            post(|mut multipart: axum::extract::Multipart| async move {
                let mut saw_file = false;
                while let Some(field) = multipart.next_field().await.unwrap() {
                    if field.name() == Some("file") {
                        assert_eq!(field.content_type(), Some("audio/wav"));
                        assert_eq!(field.bytes().await.unwrap().as_ref(), b"RIFFdata");
                        saw_file = true;
                    }
                }
                assert!(saw_file);
                Json(json!({"text": "hello world"}))
            }),
        ))
        .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, b"RIFFdata").unwrap();

        let text = provider(&base)
            .transcribe("whisper-1", &path, "audio/wav")
            .await
            .unwrap();
        assert_eq!(text, "hello world");
    }
}
