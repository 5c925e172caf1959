use crate::config::BackendConfig;
use anyhow::{bail, Context};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::provider::{BackendAudio, BackendError, SynthesisRequest, TtsBackend};

/// A plain speech endpoint taking `{text, language, voiceName, speed, pitch}`.
pub struct SpeechApiBackend {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechRequest<'a> {
    text: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_name: Option<&'a str>,
    speed: f32,
    pitch: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechResponse {
    #[serde(alias = "audio")]
    audio_content: String,
    #[serde(default = "default_mime")]
    mime_type: String,
}

fn default_mime() -> String {
    "audio/mpeg".to_string()
}

impl SpeechApiBackend {
    pub fn new(config: &BackendConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let Some(endpoint) = config.endpoint.clone() else {
            bail!("speech-api backend '{}' requires an endpoint", config.display_name());
        };
        let client = reqwest::Client::builder()
            .build()
            .context("build speech-api http client")?;
        Ok(Self {
            name: config.display_name(),
            client,
            endpoint,
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl TtsBackend for SpeechApiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<BackendAudio, BackendError> {
        let payload = SpeechRequest {
            text: request.text,
            language: request.language.locale(),
            voice_name: request.voice.voice_name.as_deref(),
            speed: request.voice.speed,
            pitch: request.voice.pitch,
            model: self.model.as_deref(),
        };

        let mut builder = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: SpeechResponse = response
            .json()
            .await
            .map_err(|err| BackendError::Failed(format!("malformed response: {err}")))?;
        decode(parsed)
    }
}

fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>());
    match status {
        StatusCode::UNSUPPORTED_MEDIA_TYPE | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::NOT_IMPLEMENTED => {
            BackendError::Unsupported(detail)
        }
        _ => BackendError::Failed(detail),
    }
}

fn decode(response: SpeechResponse) -> Result<BackendAudio, BackendError> {
    let bytes = STANDARD
        .decode(response.audio_content.trim().as_bytes())
        .map_err(|err| BackendError::Failed(format!("invalid base64 audio: {err}")))?;
    if bytes.is_empty() {
        return Err(BackendError::Failed("empty audio payload".to_string()));
    }
    Ok(BackendAudio {
        bytes,
        mime_type: response.mime_type,
    })
}
