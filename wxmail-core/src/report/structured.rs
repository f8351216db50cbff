use chrono::{DateTime, NaiveDate, NaiveDateTime, Weekday};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ComposeError;
use crate::model::{DailyExtras, DayForecast, Location, RawPayload, WeatherSnapshot};
use crate::report::{PayloadParser, ReportFlag, ReportOptions, checked_celsius};

/// Parses keyed records with `current_conditions`, `forecasts` and `location`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredPayloadParser;

#[derive(Debug, Deserialize)]
struct Record {
    date: Option<String>,
    #[serde(default)]
    units: Units,
    current_conditions: Value,
    forecasts: Option<Value>,
    location: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Units {
    temperature: String,
    speed: String,
}

impl Default for Units {
    fn default() -> Self {
        Self {
            temperature: "C".to_string(),
            speed: "km/h".to_string(),
        }
    }
}

/// Numbers arrive either as JSON numbers or as numeric strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn value(&self, field: &str) -> Result<f64, ComposeError> {
        let value = match self {
            Numeric::Number(n) => *n,
            Numeric::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                ComposeError::malformed(format!("`{field}` is not numeric: '{s}'"))
            })?,
        };
        // `parse` accepts "NaN" and "inf".
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ComposeError::malformed(format!("`{field}` is not finite: {value}")))
        }
    }

    fn celsius(&self, scale: TempScale, field: &str) -> Result<f64, ComposeError> {
        checked_celsius(scale.to_celsius(self.value(field)?), field)
    }
}

#[derive(Debug, Deserialize)]
struct CurrentRecord {
    temperature: Numeric,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ExtrasRecord {
    last_updated: String,
    station: String,
    wind: WindRecord,
}

#[derive(Debug, Deserialize)]
struct WindRecord {
    speed: Numeric,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ForecastRecord {
    day_of_week: String,
    date: String,
    low: Numeric,
    high: Numeric,
    day: BriefRecord,
    night: BriefRecord,
}

#[derive(Debug, Deserialize)]
struct BriefRecord {
    brief_text: String,
}

#[derive(Debug, Deserialize)]
struct LocationRecord {
    name: String,
    lat: Numeric,
    lon: Numeric,
}

#[derive(Debug, Clone, Copy)]
enum TempScale {
    Celsius,
    Fahrenheit,
}

impl TempScale {
    fn parse(raw: &str) -> Result<Self, ComposeError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "C" | "CELSIUS" | "METRIC" => Ok(Self::Celsius),
            "F" | "FAHRENHEIT" | "IMPERIAL" => Ok(Self::Fahrenheit),
            other => Err(ComposeError::malformed(format!(
                "unsupported temperature unit '{other}'"
            ))),
        }
    }

    fn to_celsius(self, value: f64) -> f64 {
        match self {
            Self::Celsius => value,
            Self::Fahrenheit => (value - 32.0) / 1.8,
        }
    }
}

fn speed_to_kmh(unit: &str, value: f64) -> Result<f64, ComposeError> {
    match unit.trim().to_ascii_lowercase().as_str() {
        "km/h" | "kmh" | "kph" => Ok(value),
        "mph" => Ok(value * 1.609_344),
        "m/s" | "mps" => Ok(value * 3.6),
        other => Err(ComposeError::malformed(format!(
            "unsupported speed unit '{other}'"
        ))),
    }
}

fn section<T: DeserializeOwned>(value: &Value, name: &str) -> Result<T, ComposeError> {
    T::deserialize(value).map_err(|e| ComposeError::malformed(format!("`{name}`: {e}")))
}

fn required_text(value: &str, field: &str) -> Result<String, ComposeError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ComposeError::malformed(format!("`{field}` is empty")));
    }
    Ok(value.to_string())
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, ComposeError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.naive_local());
    }
    ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| ComposeError::malformed(format!("unrecognized timestamp '{raw}'")))
}

impl StructuredPayloadParser {
    fn extras(record: &Value, scale_speed: &str) -> Result<DailyExtras, ComposeError> {
        let extras: ExtrasRecord = section(record, "current_conditions")?;
        Ok(DailyExtras {
            last_updated: parse_timestamp(&extras.last_updated)?,
            station: required_text(&extras.station, "station")?,
            wind_speed_kmh: speed_to_kmh(scale_speed, extras.wind.speed.value("wind.speed")?)?,
            wind_direction: required_text(&extras.wind.text, "wind.text")?,
        })
    }

    fn forecast(value: &Value, scale: TempScale) -> Result<Vec<DayForecast>, ComposeError> {
        let records: Vec<ForecastRecord> = section(value, "forecasts")?;
        records
            .into_iter()
            .map(|day| {
                let weekday = day.day_of_week.trim().parse::<Weekday>().map_err(|_| {
                    ComposeError::malformed(format!("unknown weekday '{}'", day.day_of_week))
                })?;
                Ok(DayForecast {
                    weekday,
                    date: required_text(&day.date, "forecasts.date")?,
                    low_c: day.low.celsius(scale, "forecasts.low")?,
                    high_c: day.high.celsius(scale, "forecasts.high")?,
                    day_condition: required_text(&day.day.brief_text, "forecasts.day")?,
                    night_condition: required_text(&day.night.brief_text, "forecasts.night")?,
                })
            })
            .collect()
    }

    fn location(value: &Value) -> Result<Location, ComposeError> {
        let location: LocationRecord = section(value, "location")?;
        Ok(Location {
            city: required_text(&location.name, "location.name")?,
            latitude: location.lat.value("location.lat")?,
            longitude: location.lon.value("location.lon")?,
        })
    }
}

impl PayloadParser for StructuredPayloadParser {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn parse(
        &self,
        payload: &RawPayload,
        options: &ReportOptions,
        as_of: NaiveDate,
    ) -> Result<WeatherSnapshot, ComposeError> {
        let RawPayload::Structured(value) = payload else {
            return Err(ComposeError::malformed("expected a structured payload"));
        };

        let record: Record = section(value, "payload")?;
        let scale = TempScale::parse(&record.units.temperature)?;

        let date = match record.date.as_deref() {
            Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map_err(|_| ComposeError::malformed(format!("unrecognized date '{raw}'")))?,
            None => as_of,
        };

        let current: CurrentRecord = section(&record.current_conditions, "current_conditions")?;
        // In range, so the cast cannot saturate.
        let current_temp_c = current
            .temperature
            .celsius(scale, "current_conditions.temperature")?
            .round() as i32;
        let current_condition = required_text(&current.text, "current_conditions.text")?;

        let extras = if options.contains(ReportFlag::ExtraDailyInfo) {
            Some(Self::extras(&record.current_conditions, &record.units.speed)?)
        } else {
            None
        };

        let forecast = if options.contains(ReportFlag::WeeklyForecast) {
            match &record.forecasts {
                Some(value) => Some(Self::forecast(value, scale)?),
                None => Some(Vec::new()),
            }
        } else {
            None
        };

        let location = if options.contains(ReportFlag::LocationInfo) {
            let value = record
                .location
                .as_ref()
                .ok_or_else(|| ComposeError::malformed("`location` missing"))?;
            Some(Self::location(value)?)
        } else {
            None
        };

        tracing::debug!(
            %date,
            current_temp_c,
            forecast_days = forecast.as_ref().map(Vec::len),
            "parsed structured payload"
        );

        Ok(WeatherSnapshot {
            date,
            current_temp_c,
            current_condition,
            extras,
            forecast,
            location,
        })
    }
}
