use anyhow::Context;
use chrono::Duration;

/// Default system instruction shipped with the binary. Overridable at
/// startup via `VOXRELAY_SYSTEM_PROMPT_FILE`; the text is product
/// configuration, not code.
const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../prompts/assistant.md");

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_STT_MODEL: &str = "whisper-1";
pub const DEFAULT_TTS_MODEL: &str = "tts-1";
pub const DEFAULT_TTS_VOICE: &str = "alloy";
pub const DEFAULT_HISTORY_MAX: usize = 20;
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub stt_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub history_max: usize,
    pub session_ttl: Duration,
    pub system_prompt: String,
}

impl Settings {
    /// Reads configuration from the environment. A missing API credential
    /// is a hard error; everything else has a default.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY is required")?;
        let base_url = env_or("OPENAI_BASE_URL", "https://api.openai.com/v1");

        let system_prompt = match std::env::var("VOXRELAY_SYSTEM_PROMPT_FILE") {
            Ok(path) => std::fs::read_to_string(&path)
                .with_context(|| format!("reading system prompt from {path}"))?,
            Err(_) => DEFAULT_SYSTEM_PROMPT.to_string(),
        };

        let ttl_minutes = env_parse("VOXRELAY_SESSION_TTL_MINUTES", DEFAULT_SESSION_TTL_MINUTES);

        Ok(Self {
            api_key,
            base_url,
            chat_model: env_or("VOXRELAY_CHAT_MODEL", DEFAULT_CHAT_MODEL),
            stt_model: env_or("VOXRELAY_STT_MODEL", DEFAULT_STT_MODEL),
            tts_model: env_or("VOXRELAY_TTS_MODEL", DEFAULT_TTS_MODEL),
            tts_voice: env_or("VOXRELAY_TTS_VOICE", DEFAULT_TTS_VOICE),
            history_max: env_parse("VOXRELAY_HISTORY_MAX", DEFAULT_HISTORY_MAX),
            session_ttl: Duration::minutes(ttl_minutes),
            system_prompt,
        })
    }

    #[cfg(test)]
    pub fn for_tests(base_url: impl Into<String>) -> Self {
        Self {
            api_key: "test-key".into(),
            base_url: base_url.into(),
            chat_model: DEFAULT_CHAT_MODEL.into(),
            stt_model: DEFAULT_STT_MODEL.into(),
            tts_model: DEFAULT_TTS_MODEL.into(),
            tts_voice: DEFAULT_TTS_VOICE.into(),
            history_max: DEFAULT_HISTORY_MAX,
            session_ttl: Duration::minutes(DEFAULT_SESSION_TTL_MINUTES),
            system_prompt: "You are a test assistant.".into(),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
