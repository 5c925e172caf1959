use crate::config::{BackendConfig, BackendKind};
use crate::departure::Language;
use crate::settings::VoiceSettings;
use async_trait::async_trait;
use thiserror::Error;

use super::{gemini::GeminiBackend, speech_api::SpeechApiBackend};

/// Why a single backend attempt failed. Every variant moves on to the next backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The backend or model cannot produce audio for this request.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("failed: {0}")]
    Failed(String),

    #[error("timed out after {0}s")]
    Timeout(u64),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Failed(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub language: Language,
    pub voice: &'a VoiceSettings,
}

/// Audio as the backend returned it, before any container conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendAudio {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[async_trait]
pub trait TtsBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<BackendAudio, BackendError>;
}

pub fn select_backend(config: &BackendConfig) -> anyhow::Result<Box<dyn TtsBackend>> {
    let api_key = config.api_key();
    match config.kind {
        BackendKind::Gemini => Ok(Box::new(GeminiBackend::new(config, api_key)?)),
        BackendKind::SpeechApi => Ok(Box::new(SpeechApiBackend::new(config, api_key)?)),
    }
}
