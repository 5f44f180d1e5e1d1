use crate::state::Settings;

const API_KEY_VARS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

/// Load settings from the process environment, falling back to defaults.
pub fn load_settings() -> Settings {
    load_settings_from(|key| std::env::var(key).ok())
}

/// Same as [`load_settings`] with an injectable variable lookup.
pub fn load_settings_from<F>(lookup: F) -> Settings
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = Settings::default();
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    settings.backend.api_key = API_KEY_VARS.iter().find_map(|key| get(*key));
    if settings.backend.api_key.is_none() {
        tracing::warn!(
            "API_KEY environment variable not set. Story and speech requests will fail until a key is provided."
        );
    }

    if let Some(url) = get("GEMINI_BASE_URL") {
        if url.starts_with("https://") || url.starts_with("http://") {
            settings.backend.base_url = url.trim_end_matches('/').to_string();
        } else {
            tracing::warn!("Ignoring GEMINI_BASE_URL '{}': not an http(s) URL", url);
        }
    }
    if let Some(model) = get("STORY_MODEL") {
        settings.backend.story_model = model;
    }
    if let Some(model) = get("SPEECH_MODEL") {
        settings.backend.speech_model = model;
    }
    if let Some(voice) = get("SPEECH_VOICE") {
        settings.backend.voice = voice;
    }

    tracing::info!(
        "Settings loaded (story model: {}, speech model: {}, voice: {})",
        settings.backend.story_model,
        settings.backend.speech_model,
        settings.backend.voice
    );
    settings
}
