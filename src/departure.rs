use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DepartureStatus {
    #[serde(alias = "on_time", alias = "ontime")]
    OnTime,
    Delayed,
    Boarding,
    Departed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FleetType {
    #[serde(rename = "VIP Van", alias = "vip-van")]
    VipVan,
    #[serde(rename = "Bus", alias = "bus")]
    Bus,
    #[serde(rename = "Sleeping Bus", alias = "sleeping-bus")]
    SleepingBus,
}

impl FleetType {
    pub fn label(self) -> &'static str {
        match self {
            FleetType::VipVan => "VIP Van",
            FleetType::Bus => "Bus",
            FleetType::SleepingBus => "Sleeping Bus",
        }
    }
}

impl fmt::Display for FleetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Announcement languages, in the order they are played within one repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[value(alias = "en")]
    English,
    #[value(alias = "km")]
    Khmer,
    #[value(alias = "zh")]
    Chinese,
}

impl Language {
    pub const PLAY_ORDER: [Language; 3] = [Language::English, Language::Khmer, Language::Chinese];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Khmer => "khmer",
            Language::Chinese => "chinese",
        }
    }

    /// BCP-47 tag handed to synthesis backends.
    pub fn locale(self) -> &'static str {
        match self {
            Language::English => "en-US",
            Language::Khmer => "km-KH",
            Language::Chinese => "cmn-CN",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Departure {
    pub id: String,
    pub branch_id: String,
    pub operator_id: String,
    pub destination: String,
    pub plate_number: String,
    /// Local clock time, `HH:MM` or `HH:MM:SS`.
    pub departure_time: String,
    pub status: DepartureStatus,
    #[serde(default)]
    pub estimated_time: Option<String>,
    pub fleet_type: FleetType,
    #[serde(default)]
    pub fleet_image: Option<String>,
}

impl Departure {
    /// Clock time to announce: the estimate for delayed departures, else the schedule.
    pub fn announced_time(&self) -> String {
        let raw = match (&self.status, &self.estimated_time) {
            (DepartureStatus::Delayed, Some(estimate)) => estimate.as_str(),
            _ => self.departure_time.as_str(),
        };
        format_clock(raw)
    }
}

fn format_clock(raw: &str) -> String {
    let raw = raw.trim();
    for pattern in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = chrono::NaiveTime::parse_from_str(raw, pattern) {
            return time.format("%H:%M").to_string();
        }
    }
    raw.to_string()
}

/// A status change observed on the departures collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub departure_id: String,
    #[serde(default)]
    pub previous_status: Option<DepartureStatus>,
    pub status: DepartureStatus,
}

impl StatusChange {
    pub fn is_boarding_transition(&self) -> bool {
        self.status == DepartureStatus::Boarding
            && self.previous_status != Some(DepartureStatus::Boarding)
    }
}
