use crate::announce::Pacing;
use anyhow::{bail, Context};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub cache_max_mb: Option<u64>,
    #[serde(default)]
    pub cache_max_entries: Option<usize>,
    #[serde(default = "default_ttl_hours")]
    pub cache_ttl_hours: i64,
    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
    #[serde(default)]
    pub remote_cache: RemoteCacheConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCacheConfig {
    /// Base URL of the row API. Without one, the shared tier lives in process.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_remote_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_remote_table")]
    pub table: String,
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
    #[serde(default = "default_remote_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Tried in order; later entries are fallbacks.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Gemini,
    SpeechApi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub player: Option<String>,
    #[serde(default)]
    pub player_args: Option<Vec<String>>,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default = "default_language_pause_ms")]
    pub language_pause_ms: u64,
    #[serde(default = "default_repeat_pause_ms")]
    pub repeat_pause_ms: u64,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        if let Some(path) = Self::project_path() {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        if let Ok(path) = Self::default_path() {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config at {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parse config at {}", path.display()))?;
        config.apply_defaults();
        Ok(config)
    }

    pub fn init_default() -> anyhow::Result<PathBuf> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let config = Self::default();
        fs::write(&path, serde_json::to_string_pretty(&config)?)?;
        Ok(path)
    }

    pub fn default_path() -> anyhow::Result<PathBuf> {
        let base = BaseDirs::new().context("unable to resolve home directory")?;
        Ok(base.config_dir().join("terminal-announcer").join("config.json"))
    }

    pub fn default_cache_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let base = BaseDirs::new().context("unable to resolve home directory")?;
        Ok(base.cache_dir().join("terminal-announcer"))
    }

    pub fn default_store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("departures.json"))
    }

    pub fn cache_limits(&self) -> (u64, usize) {
        let max_mb = self.cache_max_mb.unwrap_or(100);
        let max_entries = self.cache_max_entries.unwrap_or(1000);
        (max_mb * 1024 * 1024, max_entries)
    }

    pub fn local_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_ttl_hours)
    }

    pub fn remote_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.remote_cache.ttl_hours)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_minutes * 60)
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            between_languages: Duration::from_millis(self.playback.language_pause_ms),
            between_repeats: Duration::from_millis(self.playback.repeat_pause_ms),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.playback.volume) {
            bail!("playback.volume must be between 0.0 and 1.0");
        }

        if let Some(max_mb) = self.cache_max_mb {
            if max_mb == 0 {
                bail!("cache_max_mb must be greater than 0");
            }
        }

        if let Some(max_entries) = self.cache_max_entries {
            if max_entries == 0 {
                bail!("cache_max_entries must be greater than 0");
            }
        }

        if self.cache_ttl_hours <= 0 || self.remote_cache.ttl_hours <= 0 {
            bail!("cache TTLs must be at least one hour");
        }

        if self.sweep_interval_minutes == 0 {
            bail!("sweep_interval_minutes must be greater than 0");
        }

        if self.synthesis.backends.is_empty() {
            bail!("synthesis.backends must list at least one backend");
        }

        if self.synthesis.timeout_seconds == 0 {
            bail!("synthesis.timeout_seconds must be greater than 0");
        }

        for backend in &self.synthesis.backends {
            if backend.kind == BackendKind::SpeechApi && backend.endpoint.is_none() {
                bail!("speech-api backend '{}' requires an endpoint", backend.display_name());
            }
        }

        if let Some(url) = &self.remote_cache.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("remote_cache.url must be an http(s) URL: {url}");
            }
        }

        Ok(())
    }

    fn apply_defaults(&mut self) {
        if self.cache_max_mb.is_none() {
            self.cache_max_mb = Some(100);
        }

        if self.cache_max_entries.is_none() {
            self.cache_max_entries = Some(1000);
        }

        if self.synthesis.backends.is_empty() {
            self.synthesis.backends = default_backends();
        }
    }

    fn project_path() -> Option<PathBuf> {
        Some(PathBuf::from("announcer.json"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: None,
            cache_dir: None,
            cache_max_mb: Some(100),
            cache_max_entries: Some(1000),
            cache_ttl_hours: default_ttl_hours(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
            remote_cache: RemoteCacheConfig::default(),
            synthesis: SynthesisConfig::default(),
            playback: PlaybackConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match (self.kind, &self.model) {
            (BackendKind::Gemini, Some(model)) => format!("gemini:{model}"),
            (BackendKind::Gemini, None) => "gemini".to_string(),
            (BackendKind::SpeechApi, _) => "speech-api".to_string(),
        }
    }

    pub fn api_key(&self) -> Option<String> {
        let var = self.api_key_env.as_deref().or(match self.kind {
            BackendKind::Gemini => Some("GEMINI_API_KEY"),
            BackendKind::SpeechApi => None,
        })?;
        std::env::var(var).ok().filter(|v| !v.is_empty())
    }
}

impl RemoteCacheConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|v| !v.is_empty())
    }
}

impl PlaybackConfig {
    /// Player program and arguments; the clip path is appended last.
    pub fn player_command(&self) -> (String, Vec<String>) {
        if let Some(player) = &self.player {
            return (player.clone(), self.player_args.clone().unwrap_or_default());
        }
        if cfg!(target_os = "macos") {
            ("afplay".to_string(), vec!["-v".to_string(), "{volume}".to_string()])
        } else {
            (
                "ffplay".to_string(),
                ["-nodisp", "-autoexit", "-loglevel", "quiet", "-volume", "{volume_pct}"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            )
        }
    }
}

fn default_backends() -> Vec<BackendConfig> {
    ["gemini-2.5-flash-preview-tts", "gemini-2.5-pro-preview-tts"]
        .iter()
        .map(|model| BackendConfig {
            kind: BackendKind::Gemini,
            name: None,
            endpoint: None,
            model: Some(model.to_string()),
            api_key_env: None,
        })
        .collect()
}

fn default_ttl_hours() -> i64 {
    crate::audio::tier::DEFAULT_TTL_HOURS
}

fn default_sweep_interval_minutes() -> u64 {
    60
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_remote_timeout_seconds() -> u64 {
    5
}

fn default_remote_key_env() -> String {
    "ANNOUNCER_REMOTE_KEY".to_string()
}

fn default_remote_table() -> String {
    "announcement_cache".to_string()
}

fn default_volume() -> f32 {
    0.8
}

fn default_language_pause_ms() -> u64 {
    500
}

fn default_repeat_pause_ms() -> u64 {
    1000
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key_env: default_remote_key_env(),
            table: default_remote_table(),
            ttl_hours: default_ttl_hours(),
            timeout_seconds: default_remote_timeout_seconds(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            backends: default_backends(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            player: None,
            player_args: None,
            volume: default_volume(),
            language_pause_ms: default_language_pause_ms(),
            repeat_pause_ms: default_repeat_pause_ms(),
        }
    }
}
