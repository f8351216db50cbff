use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    error::ProviderError,
    model::{RawPayload, WeatherRequest},
};

use super::{WeatherProvider, http};

const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com";
const FORECAST_DAYS: &str = "3";
const NIGHT_HOUR: &str = "21:00";

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: String, base_url: &str) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    async fn fetch_forecast(&self, request: &WeatherRequest) -> Result<Value> {
        let url = format!("{}/v1/forecast.json", self.base_url);
        let parsed: WaForecastResponse = http::get_json(
            &self.http,
            &url,
            &[
                ("key", self.api_key.as_str()),
                ("q", request.zip_code.as_str()),
                ("days", FORECAST_DAYS),
            ],
            "WeatherAPI forecast",
        )
        .await?;

        Ok(normalize(parsed))
    }
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
    #[serde(default)]
    region: String,
    lat: f64,
    lon: f64,
    localtime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    last_updated: String,
    temp_c: f64,
    wind_kph: f64,
    wind_dir: String,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    maxtemp_c: f64,
    mintemp_c: f64,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaHour {
    time: String,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: String,
    day: WaDay,
    #[serde(default)]
    hour: Vec<WaHour>,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    location: WaLocation,
    current: WaCurrent,
    forecast: WaForecast,
}

/// Rewrites a forecast.json response into the keyed payload the report parser reads.
fn normalize(parsed: WaForecastResponse) -> Value {
    let date = parsed
        .location
        .localtime
        .as_deref()
        .and_then(|t| NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M").ok())
        .map(|t| t.date().format("%Y-%m-%d").to_string());

    let forecasts: Vec<Value> = parsed
        .forecast
        .forecastday
        .iter()
        .filter_map(|day| {
            let Ok(date) = NaiveDate::parse_from_str(&day.date, "%Y-%m-%d") else {
                tracing::debug!(date = %day.date, "skipping forecast day with unreadable date");
                return None;
            };
            let night = day
                .hour
                .iter()
                .find(|h| h.time.ends_with(NIGHT_HOUR))
                .map_or(&day.day.condition.text, |h| &h.condition.text);

            Some(json!({
                "day_of_week": date.weekday().to_string(),
                "date": date.format("%b %-d").to_string(),
                "low": day.day.mintemp_c,
                "high": day.day.maxtemp_c,
                "day": { "brief_text": day.day.condition.text },
                "night": { "brief_text": night },
            }))
        })
        .collect();

    let city = if parsed.location.region.is_empty() {
        parsed.location.name.clone()
    } else {
        format!("{}, {}", parsed.location.name, parsed.location.region)
    };

    let mut payload = json!({
        "units": { "temperature": "C", "speed": "km/h" },
        "current_conditions": {
            "temperature": parsed.current.temp_c,
            "text": parsed.current.condition.text,
            "last_updated": parsed.current.last_updated,
            "station": "weatherapi.com",
            "wind": {
                "speed": parsed.current.wind_kph,
                "text": parsed.current.wind_dir,
            },
        },
        "forecasts": forecasts,
        "location": {
            "name": city,
            "lat": parsed.location.lat,
            "lon": parsed.location.lon,
        },
    });
    if let Some(date) = date {
        payload["date"] = Value::String(date);
    }
    payload
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn name(&self) -> &str {
        "weatherapi"
    }

    async fn fetch_payload(&self, request: &WeatherRequest) -> Result<RawPayload, ProviderError> {
        tracing::debug!(zip = %request.zip_code, "fetching WeatherAPI forecast");
        self.fetch_forecast(request)
            .await
            .map(RawPayload::Structured)
            .map_err(|e| ProviderError::unavailable(self.name(), format!("{e:#}")))
    }
}
