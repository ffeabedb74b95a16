/// Audio container/codec types the STT relay accepts, with the file
/// extension used for the transient upload file.
const AUDIO_TYPES: &[(&str, &str)] = &[
    ("audio/webm", ".webm"),
    ("video/webm", ".webm"),
    ("audio/ogg", ".ogg"),
    ("application/ogg", ".ogg"),
    ("audio/opus", ".opus"),
    ("audio/wav", ".wav"),
    ("audio/x-wav", ".wav"),
    ("audio/wave", ".wav"),
    ("audio/mpeg", ".mp3"),
    ("audio/mp3", ".mp3"),
    ("audio/mp4", ".m4a"),
    ("audio/m4a", ".m4a"),
    ("audio/x-m4a", ".m4a"),
    ("audio/flac", ".flac"),
    ("audio/x-flac", ".flac"),
];

/// Voices the synthesis endpoint knows about. Anything else falls back to
/// the configured default.
pub const VOICES: &[&str] = &["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// `true` if the declared media type is an accepted audio type. Parameters
/// such as `;codecs=opus` are ignored.
pub fn is_supported_audio(media_type: &str) -> bool {
    let essence = essence(media_type);
    AUDIO_TYPES.iter().any(|(t, _)| *t == essence)
}

/// Transient-file extension for a media type, empty when unmapped.
pub fn extension_for(media_type: &str) -> &'static str {
    let essence = essence(media_type);
    AUDIO_TYPES
        .iter()
        .find(|(t, _)| *t == essence)
        .map(|(_, ext)| *ext)
        .unwrap_or("")
}

/// Resolves a requested voice against the allow-list, case-insensitively,
/// falling back to `default` for unknown names.
pub fn resolve_voice<'a>(requested: Option<&str>, default: &'a str) -> &'a str {
    match requested {
        Some(v) => VOICES
            .iter()
            .find(|known| known.eq_ignore_ascii_case(v.trim()))
            .copied()
            .unwrap_or(default),
        None => default,
    }
}

fn essence(media_type: &str) -> &str {
    media_type.split(';').next().unwrap_or(media_type).trim()
}
