pub mod gemini;
pub mod provider;
pub mod speech_api;

use crate::audio::wav::{pcm_to_wav, PcmFormat};
use crate::config::SynthesisConfig;
use crate::departure::Language;
use crate::settings::VoiceSettings;
use anyhow::Context;
use provider::{BackendAudio, BackendError, SynthesisRequest, TtsBackend};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const LOG_TEXT_CHARS: usize = 60;

/// Every configured backend rejected the request.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("speech synthesis failed after {attempts} backend(s); last error from {backend}: {message}")]
pub struct SynthesisError {
    pub backend: String,
    pub message: String,
    pub attempts: usize,
}

#[derive(Debug, Serialize)]
pub struct BackendInfo {
    pub position: usize,
    pub name: String,
}

/// Tries each backend in preference order until one yields playable audio.
pub struct SynthesisClient {
    backends: Vec<Box<dyn TtsBackend>>,
    timeout: Duration,
}

impl SynthesisClient {
    pub fn new(backends: Vec<Box<dyn TtsBackend>>, timeout: Duration) -> Self {
        Self { backends, timeout }
    }

    pub fn from_config(config: &SynthesisConfig) -> anyhow::Result<Self> {
        let backends = config
            .backends
            .iter()
            .map(|backend| {
                provider::select_backend(backend)
                    .with_context(|| format!("configure backend {}", backend.display_name()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(backends, Duration::from_secs(config.timeout_seconds)))
    }

    pub fn backends(&self) -> Vec<BackendInfo> {
        self.backends
            .iter()
            .enumerate()
            .map(|(i, b)| BackendInfo {
                position: i + 1,
                name: b.name().to_string(),
            })
            .collect()
    }

    pub async fn synthesize(
        &self,
        text: &str,
        language: Language,
        voice: &VoiceSettings,
    ) -> Result<Vec<u8>, SynthesisError> {
        let request = SynthesisRequest { text, language, voice };
        let snippet: String = text.chars().take(LOG_TEXT_CHARS).collect();

        let mut last = SynthesisError {
            backend: "none".to_string(),
            message: "no synthesis backends configured".to_string(),
            attempts: 0,
        };

        for (attempt, backend) in self.backends.iter().enumerate() {
            tracing::debug!(backend = backend.name(), %language, text = %snippet, "synthesis attempt");

            let result = match tokio::time::timeout(self.timeout, backend.synthesize(&request)).await {
                Ok(result) => result.and_then(into_playable),
                Err(_) => Err(BackendError::Timeout(self.timeout.as_secs())),
            };

            match result {
                Ok(audio) => {
                    tracing::info!(
                        backend = backend.name(),
                        %language,
                        bytes = audio.len(),
                        text = %snippet,
                        "synthesized announcement audio"
                    );
                    return Ok(audio);
                }
                Err(err) => {
                    tracing::warn!(
                        backend = backend.name(),
                        %language,
                        text = %snippet,
                        error = %err,
                        "synthesis backend failed; trying next"
                    );
                    last = SynthesisError {
                        backend: backend.name().to_string(),
                        message: err.to_string(),
                        attempts: attempt + 1,
                    };
                }
            }
        }

        tracing::error!(%language, text = %snippet, error = %last, "all synthesis backends exhausted");
        Err(last)
    }
}

/// Raw PCM gets a WAV header; compressed containers pass through untouched.
fn into_playable(audio: BackendAudio) -> Result<Vec<u8>, BackendError> {
    if audio.bytes.is_empty() {
        return Err(BackendError::Failed("empty audio payload".to_string()));
    }
    match PcmFormat::from_mime(&audio.mime_type) {
        Ok(Some(format)) => pcm_to_wav(&audio.bytes, format)
            .map_err(|err| BackendError::Failed(err.to_string())),
        Ok(None) => Ok(audio.bytes),
        Err(err) => Err(BackendError::Unsupported(err.to_string())),
    }
}
