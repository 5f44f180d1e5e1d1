use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::SpeechBackend;
use crate::error::SpeechError;
use crate::state::BackendSettings;

const USER_AGENT: &str = "ReadAloud/0.1";

const SPEECH_FAILED: &str =
    "Failed to generate speech. Please check your API key and network connection.";
const STORY_FAILED: &str =
    "Could not create a story right now. Please check your API key and network connection.";
const STORY_EMPTY: &str = "The model did not return a story. Please try a different idea!";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

impl Content {
    fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    response_modalities: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
}

impl GenerateContentResponse {
    fn first_parts(&self) -> &[CandidatePart] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }

    /// Concatenated text of the first candidate, if any.
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .first_parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Base64 audio payload of the first candidate, if any.
    pub fn audio_data(&self) -> Option<&str> {
        self.first_parts()
            .iter()
            .filter_map(|p| p.inline_data.as_ref())
            .map(|d| d.data.as_str())
            .find(|d| !d.is_empty())
    }
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    settings: BackendSettings,
}

impl GeminiClient {
    pub fn new(settings: BackendSettings) -> Self {
        if settings.api_key.is_none() {
            tracing::warn!("Gemini client created without an API key; requests will fail");
        }
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    fn story_request(&self, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            system_instruction: Some(Content::text(self.settings.storyteller_persona.clone())),
            contents: vec![Content::text(prompt)],
            generation_config: GenerationConfig {
                temperature: Some(self.settings.temperature),
                top_k: Some(self.settings.top_k),
                ..Default::default()
            },
        }
    }

    fn speech_request(&self, text: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            system_instruction: None,
            contents: vec![Content::text(format!("Say clearly: {}", text))],
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.settings.voice.clone(),
                        },
                    },
                }),
                ..Default::default()
            },
        }
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .context("API key is not configured")?;

        let url = format!("{}/models/{}:generateContent", self.settings.base_url, model);
        let resp = self
            .client
            .post(&url)
            .header("User-Agent", USER_AGENT)
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", model))?
            .error_for_status()?;

        let body: GenerateContentResponse = resp
            .json()
            .await
            .context("Malformed generateContent response")?;
        Ok(body)
    }
}

#[async_trait]
impl SpeechBackend for GeminiClient {
    async fn generate_speech(&self, text: &str) -> crate::error::Result<String> {
        let request = self.speech_request(text);
        let response = self
            .generate_content(&self.settings.speech_model, &request)
            .await
            .map_err(|e| {
                tracing::error!("Error generating speech: {:#}", e);
                SpeechError::Backend(SPEECH_FAILED.to_string())
            })?;

        match response.audio_data() {
            Some(data) => {
                tracing::debug!("Received {} base64 chars of speech", data.len());
                Ok(data.to_string())
            }
            None => {
                tracing::error!("Error generating speech: no audio data received from API");
                Err(SpeechError::Backend(SPEECH_FAILED.to_string()))
            }
        }
    }

    async fn generate_story(&self, prompt: &str) -> crate::error::Result<String> {
        let request = self.story_request(prompt);
        let response = self
            .generate_content(&self.settings.story_model, &request)
            .await
            .map_err(|e| {
                tracing::error!("Error generating story: {:#}", e);
                SpeechError::Backend(STORY_FAILED.to_string())
            })?;

        let story = response
            .text()
            .ok_or_else(|| SpeechError::Backend(STORY_EMPTY.to_string()))?;
        tracing::info!("Generated story ({} chars)", story.len());
        Ok(story.trim().to_string())
    }
}
