use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Timelike};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    error::ProviderError,
    model::{RawPayload, WeatherRequest},
};

use super::{WeatherProvider, http};

const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";
const COMPASS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];
/// Minutes past midnight the day and night conditions are sampled at.
const MIDDAY: i64 = 12 * 60;
const NIGHT: i64 = 21 * 60;

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherProvider {
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

    async fn fetch(&self, request: &WeatherRequest) -> Result<Value> {
        let query = [
            ("zip", request.zip_code.as_str()),
            ("appid", self.api_key.as_str()),
            ("units", "metric"),
        ];
        let current_url = format!("{}/data/2.5/weather", self.base_url);
        let forecast_url = format!("{}/data/2.5/forecast", self.base_url);

        let (current, forecast) = tokio::try_join!(
            http::get_json::<OwCurrentResponse>(
                &self.http,
                &current_url,
                &query,
                "OpenWeather current weather"
            ),
            http::get_json::<OwForecastResponse>(
                &self.http,
                &forecast_url,
                &query,
                "OpenWeather 5-day forecast"
            ),
        )?;

        normalize(current, forecast)
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct OwRange {
    temp_min: f64,
    temp_max: f64,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
    #[serde(default)]
    deg: f64,
}

#[derive(Debug, Deserialize)]
struct OwCoord {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: String,
    dt: i64,
    /// Seconds east of UTC.
    #[serde(default)]
    timezone: i32,
    coord: OwCoord,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    main: OwRange,
    weather: Vec<OwWeather>,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    list: Vec<OwForecastEntry>,
}

fn local_time(ts: i64, offset: FixedOffset) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(ts, 0).map(|t| t.with_timezone(&offset).naive_local())
}

fn description(weather: &[OwWeather]) -> &str {
    weather.first().map_or("unknown", |w| w.description.as_str())
}

pub(crate) fn compass_direction(degrees: f64) -> &'static str {
    let index = (degrees.rem_euclid(360.0) / 22.5).round() as usize % COMPASS.len();
    COMPASS[index]
}

struct DailyAggregate<'a> {
    low: f64,
    high: f64,
    samples: Vec<(NaiveDateTime, &'a str)>,
}

impl DailyAggregate<'_> {
    fn nearest(&self, minute_of_day: i64) -> &str {
        self.samples
            .iter()
            .min_by_key(|(t, _)| {
                (i64::from(t.num_seconds_from_midnight()) / 60 - minute_of_day).abs()
            })
            .map_or("unknown", |(_, text)| *text)
    }
}

fn normalize(current: OwCurrentResponse, forecast: OwForecastResponse) -> Result<Value> {
    let offset = FixedOffset::east_opt(current.timezone)
        .ok_or_else(|| anyhow!("OpenWeather timezone offset {} out of range", current.timezone))?;
    let observed = local_time(current.dt, offset)
        .ok_or_else(|| anyhow!("OpenWeather observation time {} out of range", current.dt))?;

    let mut days: BTreeMap<NaiveDate, DailyAggregate<'_>> = BTreeMap::new();
    for entry in &forecast.list {
        let Some(at) = local_time(entry.dt, offset) else {
            tracing::debug!(dt = entry.dt, "skipping forecast entry with unreadable time");
            continue;
        };
        let day = days.entry(at.date()).or_insert(DailyAggregate {
            low: f64::INFINITY,
            high: f64::NEG_INFINITY,
            samples: Vec::new(),
        });
        day.low = day.low.min(entry.main.temp_min);
        day.high = day.high.max(entry.main.temp_max);
        day.samples.push((at, description(&entry.weather)));
    }

    let forecasts: Vec<Value> = days
        .iter()
        .map(|(date, day)| {
            json!({
                "day_of_week": date.weekday().to_string(),
                "date": date.format("%b %-d").to_string(),
                "low": day.low,
                "high": day.high,
                "day": { "brief_text": day.nearest(MIDDAY) },
                "night": { "brief_text": day.nearest(NIGHT) },
            })
        })
        .collect();

    Ok(json!({
        "date": observed.date().format("%Y-%m-%d").to_string(),
        "units": { "temperature": "C", "speed": "m/s" },
        "current_conditions": {
            "temperature": current.main.temp,
            "text": description(&current.weather),
            "last_updated": observed.format("%Y-%m-%d %H:%M").to_string(),
            "station": "openweathermap.org",
            "wind": {
                "speed": current.wind.speed,
                "text": compass_direction(current.wind.deg),
            },
        },
        "forecasts": forecasts,
        "location": {
            "name": current.name,
            "lat": current.coord.lat,
            "lon": current.coord.lon,
        },
    }))
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn name(&self) -> &str {
        "openweather"
    }

    async fn fetch_payload(&self, request: &WeatherRequest) -> Result<RawPayload, ProviderError> {
        tracing::debug!(zip = %request.zip_code, "fetching OpenWeather current and forecast");
        self.fetch(request)
            .await
            .map(RawPayload::Structured)
            .map_err(|e| ProviderError::unavailable(self.name(), format!("{e:#}")))
    }
}
