use crate::config::BackendConfig;
use crate::settings::{VoiceGender, VoiceSettings};
use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::provider::{BackendAudio, BackendError, SynthesisRequest, TtsBackend};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-tts";

/// Speech through a `generateContent` model asked for an AUDIO response.
pub struct GeminiBackend {
    name: String,
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl GeminiBackend {
    pub fn new(config: &BackendConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let endpoint = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let client = reqwest::Client::builder()
            .build()
            .context("build gemini http client")?;
        Ok(Self {
            name: config.display_name(),
            client,
            url: format!("{}/models/{}:generateContent", endpoint.trim_end_matches('/'), model),
            api_key,
        })
    }

    fn body(request: &SynthesisRequest<'_>) -> serde_json::Value {
        json!({
            "contents": [{
                "parts": [{ "text": prompt(request.text, request.voice) }]
            }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "languageCode": request.language.locale(),
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": voice_name(request.voice) }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl TtsBackend for GeminiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<BackendAudio, BackendError> {
        let mut builder = self.client.post(&self.url).json(&Self::body(request));
        if let Some(key) = &self.api_key {
            builder = builder.header("x-goog-api-key", key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|err| BackendError::Failed(format!("malformed response: {err}")))?;
        parsed.into_audio()
    }
}

fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));
    match status {
        // The model rejected the request shape (e.g. no AUDIO modality) or does not exist.
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => BackendError::Unsupported(detail),
        _ => BackendError::Failed(detail),
    }
}

fn voice_name(voice: &VoiceSettings) -> &str {
    match (&voice.voice_name, voice.gender) {
        (Some(name), _) if !name.trim().is_empty() => name,
        (_, VoiceGender::Female) => "Kore",
        (_, VoiceGender::Male) => "Puck",
    }
}

fn prompt(text: &str, voice: &VoiceSettings) -> String {
    let mut style = Vec::new();
    if voice.speed < 0.95 {
        style.push("slowly");
    } else if voice.speed > 1.05 {
        style.push("briskly");
    }
    if voice.pitch < -0.5 {
        style.push("in a low voice");
    } else if voice.pitch > 0.5 {
        style.push("in a high voice");
    }

    if style.is_empty() {
        text.to_string()
    } else {
        format!("Read this announcement {}: {text}", style.join(" and "))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl GenerateResponse {
    fn into_audio(self) -> Result<BackendAudio, BackendError> {
        let inline = self
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data.filter(|d| d.mime_type.starts_with("audio/")))
            .ok_or_else(|| BackendError::Unsupported("response carried no audio part".to_string()))?;

        let bytes = STANDARD
            .decode(inline.data.as_bytes())
            .map_err(|err| BackendError::Failed(format!("invalid base64 audio: {err}")))?;
        if bytes.is_empty() {
            return Err(BackendError::Failed("empty audio payload".to_string()));
        }
        Ok(BackendAudio {
            bytes,
            mime_type: inline.mime_type,
        })
    }
}
