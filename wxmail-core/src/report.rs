//! Report composition: raw payload → [`WeatherSnapshot`] → report text.
//!
//! Parsing is a strategy picked from the payload's shape
//! ([`StructuredPayloadParser`] or [`TextPayloadParser`]); rendering is a pure
//! function of the snapshot, the options and the display unit.

use std::collections::BTreeSet;

use chrono::{Local, NaiveDate};

use crate::error::ComposeError;
use crate::model::{RawPayload, TemperatureUnit, WeatherSnapshot};

pub mod render;
pub mod structured;
pub mod text;

pub use structured::StructuredPayloadParser;
pub use text::TextPayloadParser;

/// Optional report sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReportFlag {
    ExtraDailyInfo,
    WeeklyForecast,
    LocationInfo,
}

impl ReportFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFlag::ExtraDailyInfo => "extra",
            ReportFlag::WeeklyForecast => "weekly",
            ReportFlag::LocationInfo => "location",
        }
    }

    pub const fn all() -> &'static [ReportFlag] {
        &[
            ReportFlag::ExtraDailyInfo,
            ReportFlag::WeeklyForecast,
            ReportFlag::LocationInfo,
        ]
    }

    /// Accepts the short names plus a few long spellings.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "extra" | "extradailyinfo" | "extradailyinformation" => Some(Self::ExtraDailyInfo),
            "weekly" | "weeklyforecast" | "forecast" => Some(Self::WeeklyForecast),
            "location" | "locationinfo" => Some(Self::LocationInfo),
            _ => None,
        }
    }
}

/// Set of requested sections. Empty means the one-line summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportOptions {
    flags: BTreeSet<ReportFlag>,
}

impl ReportOptions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, flag: ReportFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    /// Unknown names are skipped so newer option names don't break older builds.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::default();
        for name in names {
            let name = name.as_ref();
            match ReportFlag::from_name(name) {
                Some(flag) => {
                    options.flags.insert(flag);
                }
                None => tracing::debug!(option = name, "ignoring unknown report option"),
            }
        }
        options
    }

    pub fn contains(&self, flag: ReportFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ReportFlag> + '_ {
        self.flags.iter().copied()
    }
}

impl FromIterator<ReportFlag> for ReportOptions {
    fn from_iter<T: IntoIterator<Item = ReportFlag>>(iter: T) -> Self {
        Self {
            flags: iter.into_iter().collect(),
        }
    }
}

/// Turns one payload shape into a snapshot.
pub trait PayloadParser {
    fn name(&self) -> &'static str;

    /// `as_of` is the date the report is composed for.
    fn parse(
        &self,
        payload: &RawPayload,
        options: &ReportOptions,
        as_of: NaiveDate,
    ) -> Result<WeatherSnapshot, ComposeError>;
}

/// Plausible surface air temperatures, in Celsius.
const CELSIUS_RANGE: std::ops::RangeInclusive<f64> = -150.0..=150.0;

/// Rejects temperatures no weather feed reports. NaN falls outside every range.
pub(crate) fn checked_celsius(value: f64, field: &str) -> Result<f64, ComposeError> {
    if CELSIUS_RANGE.contains(&value) {
        Ok(value)
    } else {
        Err(ComposeError::malformed(format!(
            "`{field}` temperature out of range: {value}"
        )))
    }
}

/// Picks the parser for a payload by looking at its shape.
pub fn parser_for(payload: &RawPayload) -> Result<&'static dyn PayloadParser, ComposeError> {
    match payload {
        RawPayload::Text(_) => Ok(&TextPayloadParser),
        RawPayload::Structured(value) if value.get("current_conditions").is_some() => {
            Ok(&StructuredPayloadParser)
        }
        RawPayload::Structured(value)
            if value.get("html_description").is_some_and(|v| v.is_string()) =>
        {
            Ok(&TextPayloadParser)
        }
        RawPayload::Structured(_) => Err(ComposeError::malformed(
            "structured payload has neither `current_conditions` nor `html_description`",
        )),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReportComposer {
    as_of: NaiveDate,
    unit: TemperatureUnit,
}

impl ReportComposer {
    pub fn new(as_of: NaiveDate, unit: TemperatureUnit) -> Self {
        Self { as_of, unit }
    }

    /// Composer for the local calendar date.
    pub fn today(unit: TemperatureUnit) -> Self {
        Self::new(Local::now().date_naive(), unit)
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }

    pub fn compose(
        &self,
        payload: &RawPayload,
        options: &ReportOptions,
    ) -> Result<WeatherSnapshot, ComposeError> {
        let parser = parser_for(payload)?;
        tracing::debug!(parser = parser.name(), "composing weather snapshot");
        parser.parse(payload, options, self.as_of)
    }

    pub fn render(&self, snapshot: &WeatherSnapshot, options: &ReportOptions) -> String {
        render::render(snapshot, options, self.unit)
    }

    /// `compose` followed by `render`.
    pub fn report(
        &self,
        payload: &RawPayload,
        options: &ReportOptions,
    ) -> Result<String, ComposeError> {
        let snapshot = self.compose(payload, options)?;
        Ok(self.render(&snapshot, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn composer() -> ReportComposer {
        ReportComposer::new(
            NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date"),
            TemperatureUnit::Fahrenheit,
        )
    }

    fn payload() -> RawPayload {
        RawPayload::Structured(json!({
            "current_conditions": {"temperature": "18", "text": "Partly Cloudy"},
            "forecasts": [
                {"day_of_week": "Wed", "date": "May 1", "low": 11, "high": 21,
                 "day": {"brief_text": "Sunny"}, "night": {"brief_text": "Clear"}},
                {"day_of_week": "Thu", "date": "May 2", "low": 12, "high": 19,
                 "day": {"brief_text": "Showers"}, "night": {"brief_text": "Rain"}},
                {"day_of_week": "Fri", "date": "May 3", "low": 9, "high": 17,
                 "day": {"brief_text": "Cloudy"}, "night": {"brief_text": "Fog"}}
            ]
        }))
    }

    #[test]
    fn option_names_roundtrip() {
        for flag in ReportFlag::all() {
            assert_eq!(ReportFlag::from_name(flag.as_str()), Some(*flag));
        }
        assert_eq!(
            ReportFlag::from_name("weeklyForecast"),
            Some(ReportFlag::WeeklyForecast)
        );
        assert_eq!(
            ReportFlag::from_name("extra-daily-info"),
            Some(ReportFlag::ExtraDailyInfo)
        );
    }

    #[test]
    fn unknown_option_names_are_ignored() {
        let options = ReportOptions::from_names(["weekly", "pollen", "", "weekly"]);
        assert_eq!(options.iter().collect::<Vec<_>>(), vec![ReportFlag::WeeklyForecast]);
    }

    #[test]
    fn minimal_report_has_date_and_fahrenheit_once() {
        let report = composer().report(&payload(), &ReportOptions::none()).expect("compose");

        assert_eq!(report.matches("2024-05-01").count(), 1);
        // round(18 * 1.8) + 32 = 64
        assert_eq!(report.matches("64").count(), 1);
        assert_eq!(
            report,
            "Your weather for 2024-05-01 is partly cloudy \
             with a temperature of 64 degrees Fahrenheit."
        );
    }

    #[test]
    fn weekly_report_has_one_sentence_per_day_in_order() {
        let options = ReportOptions::none().with(ReportFlag::WeeklyForecast);
        let report = composer().report(&payload(), &options).expect("compose");

        assert_eq!(report.matches("On ").count(), 3);
        let wed = report.find("On Wed").expect("wed");
        let thu = report.find("On Thu").expect("thu");
        let fri = report.find("On Fri").expect("fri");
        assert!(wed < thu && thu < fri);
    }

    #[test]
    fn render_is_idempotent() {
        let composer = composer();
        let options: ReportOptions = ReportFlag::all().iter().copied().collect();
        let payload = RawPayload::Structured(json!({
            "current_conditions": {
                "temperature": 18, "text": "Sunny",
                "last_updated": "2024-05-01 09:30", "station": "Oakland Intl",
                "wind": {"speed": 16, "text": "NW"}
            },
            "location": {"name": "Berkeley", "lat": 37.87, "lon": -122.27}
        }));

        let snapshot = composer.compose(&payload, &options).expect("compose");
        assert_eq!(
            composer.render(&snapshot, &options),
            composer.render(&snapshot, &options)
        );
    }

    #[test]
    fn text_payload_uses_text_parser() {
        let payload = RawPayload::Text("Current Conditions:\nSunny, 20 C\n".into());
        assert_eq!(parser_for(&payload).expect("parser").name(), "text");
    }

    #[test]
    fn html_description_record_uses_text_parser() {
        let payload = RawPayload::Structured(json!({
            "html_description": "Current Conditions:\nSunny, 20 C\n"
        }));
        assert_eq!(parser_for(&payload).expect("parser").name(), "text");
    }

    #[test]
    fn unrecognized_record_is_malformed() {
        let payload = RawPayload::Structured(json!({"temp": 20}));
        let err = composer().compose(&payload, &ReportOptions::none()).unwrap_err();
        assert!(matches!(err, ComposeError::MalformedPayload(_)));
    }
}
