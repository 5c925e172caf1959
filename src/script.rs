use crate::departure::{Departure, Language};
use crate::settings::OperatorSettings;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[a-z_]+\}").expect("placeholder pattern compiles"));

/// Values that come from the operator rather than from the departure row.
#[derive(Debug, Clone, Default)]
pub struct OperatorContext {
    pub operator_name: String,
    pub trip_duration: String,
    pub break_duration: String,
}

impl OperatorContext {
    pub fn from_settings(settings: &OperatorSettings) -> Self {
        Self {
            operator_name: settings.operator_name.clone(),
            trip_duration: settings.trip_duration.clone().unwrap_or_default(),
            break_duration: settings.break_duration.clone().unwrap_or_default(),
        }
    }
}

/// Fills every known placeholder in `template` in a single pass, so values that
/// look like placeholders are inserted as written. Unknown placeholders stay as written.
pub fn render(template: &str, departure: &Departure, context: &OperatorContext) -> String {
    let time = departure.announced_time();
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let value = match &caps[0] {
                "{destination}" => departure.destination.as_str(),
                "{time}" => time.as_str(),
                "{plate}" => departure.plate_number.as_str(),
                "{fleet_type}" => departure.fleet_type.label(),
                "{operator_name}" => context.operator_name.as_str(),
                "{trip_duration}" => context.trip_duration.as_str(),
                "{break_duration}" => context.break_duration.as_str(),
                unknown => unknown,
            };
            value.to_string()
        })
        .into_owned()
}

/// Renders the operator's script for one language and reports leftover placeholders.
pub fn render_for(
    language: Language,
    departure: &Departure,
    settings: &OperatorSettings,
) -> String {
    let context = OperatorContext::from_settings(settings);
    let text = render(settings.script(language), departure, &context);

    let leftover = unresolved_placeholders(&text);
    if !leftover.is_empty() {
        tracing::warn!(
            departure = %departure.id,
            %language,
            placeholders = ?leftover,
            "announcement script has unknown placeholders"
        );
    }
    text
}

pub fn unresolved_placeholders(text: &str) -> Vec<String> {
    PLACEHOLDER
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::departure::{DepartureStatus, FleetType};

    fn departure(destination: &str, time: &str) -> Departure {
        Departure {
            id: "d1".to_string(),
            branch_id: "b1".to_string(),
            operator_id: "op".to_string(),
            destination: destination.to_string(),
            plate_number: "PP-1234".to_string(),
            departure_time: time.to_string(),
            status: DepartureStatus::Boarding,
            estimated_time: None,
            fleet_type: FleetType::VipVan,
            fleet_image: None,
        }
    }

    #[test]
    fn fills_destination_and_time() {
        let text = render(
            "{destination} at {time}",
            &departure("Kep", "07:45"),
            &OperatorContext::default(),
        );
        assert_eq!(text, "Kep at 07:45");
    }

    #[test]
    fn unknown_placeholder_is_left_verbatim() {
        let text = render(
            "{foo} to {destination}",
            &departure("Kep", "07:45"),
            &OperatorContext::default(),
        );
        assert_eq!(text, "{foo} to Kep");
        assert_eq!(unresolved_placeholders(&text), vec!["{foo}".to_string()]);
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let text = render(
            "{destination} at {time}",
            &departure("Kep {plate} Market", "07:45"),
            &OperatorContext::default(),
        );
        assert_eq!(text, "Kep {plate} Market at 07:45");
    }

    #[test]
    fn replaces_every_occurrence() {
        let context = OperatorContext {
            operator_name: "Giant Ibis".to_string(),
            trip_duration: "6 hours".to_string(),
            break_duration: "30 minutes".to_string(),
        };
        let text = render(
            "{plate} {plate} {fleet_type} {operator_name} {trip_duration} {break_duration}",
            &departure("Kep", "07:45"),
            &context,
        );
        assert_eq!(text, "PP-1234 PP-1234 VIP Van Giant Ibis 6 hours 30 minutes");
    }

    #[test]
    fn renders_khmer_and_chinese_scripts() {
        let settings = OperatorSettings::new("op", "Capitol");
        let d = departure("ភ្នំពេញ", "14:30:00");
        let km = render_for(Language::Khmer, &d, &settings);
        assert!(km.contains("ភ្នំពេញ"));
        assert!(km.contains("14:30"));
        let zh = render_for(Language::Chinese, &d, &settings);
        assert!(zh.contains("PP-1234"));
        assert!(unresolved_placeholders(&zh).is_empty());
    }
}
