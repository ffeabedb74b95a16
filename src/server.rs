use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::RelayError;
use crate::media;
use crate::provider::{ChatProvider, OpenAiProvider, SpeechProvider};
use crate::session::{trim_history, SessionStore, Turn};
use crate::settings::Settings;

const TTS_TEXT_MAX_CHARS: usize = 1200;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub settings: Arc<Settings>,
    pub chat: Arc<dyn ChatProvider>,
    pub speech: Arc<dyn SpeechProvider>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let provider = Arc::new(OpenAiProvider::new(&settings));
        Self {
            sessions: SessionStore::new(settings.session_ttl),
            settings: Arc::new(settings),
            chat: provider.clone(),
            speech: provider,
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
pub struct AskBody {
    message: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AskQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

async fn ask(
    State(state): State<AppState>,
    Query(query): Query<AskQuery>,
    Json(body): Json<AskBody>,
) -> Result<Json<AskResponse>, RelayError> {
    let message = body.message.as_deref().unwrap_or("").trim().to_string();
    if message.is_empty() {
        return Err(RelayError::bad_request("Message is required"));
    }

    // An unknown or malformed session id silently starts a fresh session.
    let requested = body
        .session_id
        .or(query.session_id)
        .and_then(|s| Uuid::parse_str(s.trim()).ok());
    let (id, session, created) = state
        .sessions
        .resolve(requested, Some(&state.settings.system_prompt))
        .await;
    if created {
        tracing::info!(session_id = %id, "started conversation");
    }

    // Holding the session lock across the remote call serializes
    // concurrent requests for the same session id.
    let mut session = session.lock().await;
    session.touch();
    session.turns.push(Turn::user(message));
    trim_history(&mut session.turns, state.settings.history_max);

    let answer = state
        .chat
        .chat(&state.settings.chat_model, &session.turns)
        .await?;

    session.turns.push(Turn::assistant(answer.clone()));
    trim_history(&mut session.turns, state.settings.history_max);
    session.touch();

    Ok(Json(AskResponse { answer, session_id: id.to_string() }))
}

#[derive(Debug, Serialize)]
pub struct SttResponse {
    pub text: String,
}

async fn stt(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SttResponse>, RelayError> {
    let mut upload: Option<(Vec<u8>, String)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RelayError::bad_request(e.to_string()))?
    {
        if field.name() == Some("audio") {
            let media_type = field.content_type().unwrap_or("").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| RelayError::bad_request(e.to_string()))?;
            upload = Some((bytes.to_vec(), media_type));
            break;
        }
    }

    let Some((bytes, media_type)) = upload else {
        return Err(RelayError::bad_request("No file uploaded"));
    };
    if !media::is_supported_audio(&media_type) {
        return Err(RelayError::bad_request("Unsupported file format"));
    }

    // Unique per request so concurrent uploads cannot collide.
    let path = std::env::temp_dir().join(format!(
        "voxrelay-stt-{}{}",
        Uuid::new_v4(),
        media::extension_for(&media_type)
    ));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| RelayError::Internal(e.into()))?;

    let result = state
        .speech
        .transcribe(&state.settings.stt_model, &path, &media_type)
        .await;

    if let Err(e) = tokio::fs::remove_file(&path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove transient upload");
    }

    Ok(Json(SttResponse { text: result? }))
}

#[derive(Debug, Deserialize)]
pub struct TtsQuery {
    text: Option<String>,
    voice: Option<String>,
}

async fn tts(
    State(state): State<AppState>,
    Query(query): Query<TtsQuery>,
) -> Result<Response, RelayError> {
    let text = query.text.unwrap_or_default();
    let text = truncate_chars(text.trim(), TTS_TEXT_MAX_CHARS);
    if text.is_empty() {
        return Err(RelayError::bad_request("Text is required"));
    }
    let voice = media::resolve_voice(query.voice.as_deref(), &state.settings.tts_voice);

    let audio = state
        .speech
        .synthesize(&state.settings.tts_model, text, voice)
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        audio,
    )
        .into_response())
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ask", post(ask))
        .route("/stt", post(stt))
        .route("/tts", get(tts))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
