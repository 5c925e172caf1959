use crate::departure::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MIN_REPEAT_COUNT: u8 = 1;
pub const MAX_REPEAT_COUNT: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    #[default]
    Female,
    Male,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(default)]
    pub gender: VoiceGender,
    #[serde(default)]
    pub voice_name: Option<String>,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl VoiceSettings {
    /// Stable tag folded into cache keys so a voice change never reuses old audio.
    pub fn cache_tag(&self) -> String {
        format!(
            "{}:{:?}:{:.2}:{:.2}",
            self.voice_name.as_deref().unwrap_or("default"),
            self.gender,
            self.speed,
            self.pitch
        )
    }
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            gender: VoiceGender::default(),
            voice_name: None,
            speed: default_speed(),
            pitch: 0.0,
        }
    }
}

/// Per-operator announcement configuration, owned by the structured store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorSettings {
    pub operator_id: String,
    pub operator_name: String,
    #[serde(default = "default_true")]
    pub voice_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_announcement_enabled: bool,
    #[serde(default = "default_repeat_count")]
    pub repeat_count: u8,
    #[serde(default)]
    pub scripts: HashMap<Language, String>,
    #[serde(default)]
    pub voices: HashMap<Language, VoiceSettings>,
    #[serde(default)]
    pub trip_duration: Option<String>,
    #[serde(default)]
    pub break_duration: Option<String>,
}

impl OperatorSettings {
    pub fn new(operator_id: impl Into<String>, operator_name: impl Into<String>) -> Self {
        Self {
            operator_id: operator_id.into(),
            operator_name: operator_name.into(),
            voice_enabled: true,
            auto_announcement_enabled: true,
            repeat_count: default_repeat_count(),
            scripts: HashMap::new(),
            voices: HashMap::new(),
            trip_duration: None,
            break_duration: None,
        }
    }

    pub fn repeats(&self) -> u8 {
        self.repeat_count.clamp(MIN_REPEAT_COUNT, MAX_REPEAT_COUNT)
    }

    pub fn script(&self, language: Language) -> &str {
        self.scripts
            .get(&language)
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| default_script(language))
    }

    pub fn voice(&self, language: Language) -> VoiceSettings {
        self.voices.get(&language).cloned().unwrap_or_default()
    }
}

pub fn default_script(language: Language) -> &'static str {
    match language {
        Language::English => {
            "Attention please. The {fleet_type} of {operator_name} to {destination}, plate number {plate}, \
             departing at {time}, is now boarding. Trip duration is about {trip_duration}, \
             with a {break_duration} break on the way."
        }
        Language::Khmer => {
            "សូមជម្រាបជូន។ {fleet_type} របស់ {operator_name} ទៅកាន់ {destination} ស្លាកលេខ {plate} \
             ចេញដំណើរនៅម៉ោង {time} កំពុងអញ្ជើញភ្ញៀវឡើងឡាន។ រយៈពេលធ្វើដំណើរប្រហែល {trip_duration} \
             និងឈប់សម្រាក {break_duration}។"
        }
        Language::Chinese => {
            "请注意，{operator_name}开往{destination}的{fleet_type}，车牌号{plate}，\
             {time}出发，现在开始上车。全程约{trip_duration}，途中休息{break_duration}。"
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_speed() -> f32 {
    1.0
}

fn default_repeat_count() -> u8 {
    3
}
