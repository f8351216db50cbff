use crate::model::{DailyExtras, DayForecast, Location, TemperatureUnit, WeatherSnapshot};
use crate::report::{ReportFlag, ReportOptions};

const KMH_PER_MPH: f64 = 1.609_344;

/// `round(c * 1.8) + 32`
pub fn celsius_to_fahrenheit(celsius: f64) -> i64 {
    (celsius * 1.8).round() as i64 + 32
}

fn display_temp(celsius: f64, unit: TemperatureUnit) -> i64 {
    match unit {
        TemperatureUnit::Celsius => celsius.round() as i64,
        TemperatureUnit::Fahrenheit => celsius_to_fahrenheit(celsius),
    }
}

fn display_wind(kmh: f64, unit: TemperatureUnit) -> (i64, &'static str) {
    match unit {
        TemperatureUnit::Celsius => (kmh.round() as i64, "km/h"),
        TemperatureUnit::Fahrenheit => ((kmh / KMH_PER_MPH).round() as i64, "mph"),
    }
}

/// Renders the requested sections in fixed order, separated by one space.
pub fn render(
    snapshot: &WeatherSnapshot,
    options: &ReportOptions,
    unit: TemperatureUnit,
) -> String {
    let mut sections = vec![summary(snapshot, unit)];

    if options.contains(ReportFlag::ExtraDailyInfo) {
        if let Some(extras) = &snapshot.extras {
            sections.push(extra_daily(extras, unit));
        }
    }
    if options.contains(ReportFlag::WeeklyForecast) {
        let days = snapshot.forecast.as_deref().unwrap_or_default();
        sections.push(weekly(days, unit));
    }
    if options.contains(ReportFlag::LocationInfo) {
        if let Some(location) = &snapshot.location {
            sections.push(location_info(location));
        }
    }

    sections.retain(|s| !s.is_empty());
    sections.join(" ")
}

fn summary(snapshot: &WeatherSnapshot, unit: TemperatureUnit) -> String {
    format!(
        "Your weather for {} is {} with a temperature of {} degrees {}.",
        snapshot.date.format("%Y-%m-%d"),
        snapshot.current_condition.to_lowercase(),
        display_temp(f64::from(snapshot.current_temp_c), unit),
        unit.label(),
    )
}

fn extra_daily(extras: &DailyExtras, unit: TemperatureUnit) -> String {
    let (speed, speed_unit) = display_wind(extras.wind_speed_kmh, unit);
    format!(
        "Last updated at {} from {}. Wind is {} {} from the {}.",
        extras.last_updated.format("%Y-%m-%d %H:%M"),
        extras.station,
        speed,
        speed_unit,
        extras.wind_direction,
    )
}

fn weekly(days: &[DayForecast], unit: TemperatureUnit) -> String {
    days.iter()
        .map(|day| {
            format!(
                "On {} {} expect a low of {} and a high of {}, {} during the day and {} at night.",
                day.weekday,
                day.date,
                display_temp(day.low_c, unit),
                display_temp(day.high_c, unit),
                day.day_condition.to_lowercase(),
                day.night_condition.to_lowercase(),
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn location_info(location: &Location) -> String {
    format!(
        "This forecast was provided for {} at the coordinates ({}, {}).",
        location.city, location.latitude, location.longitude
    )
}
