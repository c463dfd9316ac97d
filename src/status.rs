use chrono::{DateTime, Local};
use serde::Serialize;

/// Everything `pwrstat -status` reports, split the same way the tool splits it.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct StatusResult {
    pub properties: Properties,
    pub current_status: CurrentStatus,
}

/// Static attributes of the unit.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Properties {
    pub model_name: String,
    pub firmware_number: String,
    pub rating_voltage: u32,
    pub rating_power: RatingPower,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RatingPower {
    pub watts: u32,
    pub volt_amps: u32,
}

/// Live readings.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CurrentStatus {
    pub state: String,
    pub power_supply_by: String,
    pub utility_voltage: u32,
    pub output_voltage: u32,

    // Fraction in [0, 1], not a percentage.
    #[serde(rename = "battery_capacity_pct")]
    pub battery_capacity: f64,
    #[serde(rename = "remaining_runtime_minutes")]
    pub remaining_runtime: u32,

    pub load: Load,

    // Some firmware leaves this line out, so it may stay empty.
    pub line_interaction: String,

    pub test_result: Event,
    pub last_power_event: Event,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct Load {
    pub watts: u32,
    pub percent: f64, // Fraction in [0, 1].
}

/// A state with the time it was recorded, used for both the self test and
/// the last power event.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Event {
    pub state: String,
    /// Only present when the report says "<state> at <date> <time>". A test
    /// in progress, or a unit that never lost power, reports a bare state.
    pub timestamp: Option<DateTime<Local>>,
}

impl Event {
    pub fn new(state: impl Into<String>) -> Event {
        Event {
            state: state.into(),
            timestamp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn default_serializes_to_zero_values() {
        let value = serde_json::to_value(StatusResult::default()).unwrap();
        assert_eq!(
            value,
            json!({
                "properties": {
                    "model_name": "",
                    "firmware_number": "",
                    "rating_voltage": 0,
                    "rating_power": { "watts": 0, "volt_amps": 0 },
                },
                "current_status": {
                    "state": "",
                    "power_supply_by": "",
                    "utility_voltage": 0,
                    "output_voltage": 0,
                    "battery_capacity_pct": 0.0,
                    "remaining_runtime_minutes": 0,
                    "load": { "watts": 0, "percent": 0.0 },
                    "line_interaction": "",
                    "test_result": { "state": "", "timestamp": null },
                    "last_power_event": { "state": "", "timestamp": null },
                },
            })
        );
    }

    #[test]
    fn event_timestamp_serializes_with_local_offset() {
        let at = Local.with_ymd_and_hms(2011, 1, 27, 13, 17, 15).earliest().unwrap();
        let event = Event {
            state: "Passed".to_string(),
            timestamp: Some(at),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["state"], "Passed");
        let stamp = value["timestamp"].as_str().unwrap();
        assert_eq!(DateTime::parse_from_rfc3339(stamp).unwrap(), at);
    }

    #[test]
    fn bare_event_has_no_timestamp() {
        let event = Event::new("None");
        assert_eq!(event.state, "None");
        assert!(event.timestamp.is_none());
    }
}
