use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::DeliveryFailure;
use crate::gateway::Carrier;
use crate::report::ReportOptions;

/// Display unit for rendered temperatures. Snapshots are always Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    #[default]
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Celsius => "Celsius",
            Self::Fahrenheit => "Fahrenheit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeatherRequest {
    /// Postal/zip code of the location.
    pub zip_code: String,
    pub unit: TemperatureUnit,
}

/// Raw provider output, before any parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Structured(serde_json::Value),
    Text(String),
}

impl RawPayload {
    /// A JSON object is structured; anything else is treated as text.
    pub fn detect(input: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(input) {
            Ok(value @ serde_json::Value::Object(_)) => Self::Structured(value),
            _ => Self::Text(input.to_string()),
        }
    }
}

/// Normalized weather record. Temperatures in Celsius, wind in km/h.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub date: NaiveDate,
    pub current_temp_c: i32,
    pub current_condition: String,
    pub extras: Option<DailyExtras>,
    pub forecast: Option<Vec<DayForecast>>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyExtras {
    pub last_updated: NaiveDateTime,
    pub station: String,
    pub wind_speed_kmh: f64,
    pub wind_direction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayForecast {
    pub weekday: Weekday,
    pub date: String,
    pub low_c: f64,
    pub high_c: f64,
    pub day_condition: String,
    pub night_condition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Email => "email",
            Self::Sms => "sms",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub channel: Channel,
    /// Email address, or bare phone digits for SMS.
    pub address: String,
    /// Present iff `channel` is [`Channel::Sms`].
    pub carrier: Option<Carrier>,
}

impl Recipient {
    pub fn email(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel: Channel::Email,
            address: address.into(),
            carrier: None,
        }
    }

    pub fn sms(name: impl Into<String>, phone: impl Into<String>, carrier: &str) -> Self {
        Self {
            name: name.into(),
            channel: Channel::Sms,
            address: phone.into(),
            carrier: Some(Carrier::new(carrier)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed(DeliveryFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub recipient: String,
    pub channel: Channel,
    /// Resolved destination address, when resolution got that far.
    pub address: Option<String>,
    pub outcome: DeliveryOutcome,
}

impl DeliveryResult {
    pub fn is_sent(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Sent)
    }
}

/// Results of one dispatch batch, in recipient order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub results: Vec<DeliveryResult>,
}

impl BatchReport {
    pub fn sent(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.results.iter().filter(|r| r.is_sent())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.results.iter().filter(|r| !r.is_sent())
    }

    pub fn all_sent(&self) -> bool {
        self.results.iter().all(DeliveryResult::is_sent)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Where a run delivers its report.
#[derive(Debug, Clone)]
pub enum Destination {
    Email(String),
    Sms {
        name: String,
        phone: String,
        carrier: String,
    },
    Directory(BTreeMap<String, Recipient>),
}

/// Everything a run needs, supplied programmatically or by the CLI prompts.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub zip_code: String,
    pub destination: Destination,
    pub options: ReportOptions,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub report: String,
    pub batch: BatchReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_json_object_as_structured() {
        let payload = RawPayload::detect(r#"{"current_conditions": {}}"#);
        assert!(matches!(payload, RawPayload::Structured(_)));
    }

    #[test]
    fn detects_everything_else_as_text() {
        assert!(matches!(RawPayload::detect("[1, 2]"), RawPayload::Text(_)));
        assert!(matches!(
            RawPayload::detect("Current Conditions:\nSunny, 20 C"),
            RawPayload::Text(_)
        ));
    }

    #[test]
    fn batch_report_counts() {
        let batch = BatchReport {
            results: vec![
                DeliveryResult {
                    recipient: "a".into(),
                    channel: Channel::Email,
                    address: Some("a@example.com".into()),
                    outcome: DeliveryOutcome::Sent,
                },
                DeliveryResult {
                    recipient: "b".into(),
                    channel: Channel::Sms,
                    address: None,
                    outcome: DeliveryOutcome::Failed(DeliveryFailure::UnknownGateway("X".into())),
                },
            ],
        };

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.sent().count(), 1);
        assert_eq!(batch.failed().count(), 1);
        assert!(!batch.all_sent());
    }
}
