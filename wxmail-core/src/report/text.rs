use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::error::ComposeError;
use crate::model::{DayForecast, RawPayload, WeatherSnapshot};
use crate::report::{PayloadParser, ReportFlag, ReportOptions, checked_celsius};

const CURRENT_CONDITIONS: &str = "Current Conditions";
const PUNCTUATION: &[char] = &['\'', '<', '>', '/', ':', '.', '-'];
/// Forecast lines carry their weekday within the first few characters.
const WEEKDAY_PREFIX_LEN: usize = 5;
const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Scrapes free-form multi-line descriptions, e.g.
///
/// ```text
/// <b>Current Conditions:</b><br />
/// Partly Cloudy, 18 C<BR />
/// <BR /><b>Forecast:</b><BR />
/// Wed - Sunny. High: 21 Low: 11<br />
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TextPayloadParser;

/// Replaces punctuation with spaces. A '-' directly before a digit is a sign and stays.
fn clean(line: &str) -> String {
    let mut chars = line.chars().peekable();
    let mut out = String::with_capacity(line.len());
    while let Some(c) = chars.next() {
        let is_sign = c == '-' && chars.peek().is_some_and(char::is_ascii_digit);
        if PUNCTUATION.contains(&c) && !is_sign {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_int(token: &str) -> Option<i32> {
    token.trim_matches(',').parse::<i32>().ok()
}

fn parse_number(token: Option<&&str>, field: &str, line: &str) -> Result<f64, ComposeError> {
    let value = token
        .and_then(|t| t.trim_matches(',').parse::<f64>().ok())
        .ok_or_else(|| {
            ComposeError::malformed(format!("no {field} temperature in '{}'", line.trim()))
        })?;
    checked_celsius(value, field)
}

fn line_weekday(line: &str) -> Option<Weekday> {
    let head: String = line.chars().take(WEEKDAY_PREFIX_LEN).collect();
    WEEKDAYS
        .into_iter()
        .find(|wd| head.contains(&wd.to_string()))
}

fn is_forecast_line(line: &str) -> bool {
    line_weekday(line).is_some()
        && clean(line)
            .split_whitespace()
            .any(|t| t.eq_ignore_ascii_case("high"))
}

impl TextPayloadParser {
    /// Temperature and condition from the line after the marker.
    fn current(lines: &[&str]) -> Result<(i32, String), ComposeError> {
        let marker = lines
            .iter()
            .position(|l| l.contains(CURRENT_CONDITIONS))
            .ok_or_else(|| ComposeError::malformed("no 'Current Conditions' line"))?;
        let line = lines
            .get(marker + 1)
            .ok_or_else(|| ComposeError::malformed("nothing after 'Current Conditions'"))?;

        let cleaned = clean(line);
        let tokens: Vec<&str> = cleaned.split_whitespace().collect();
        let (temp_index, temperature) = tokens
            .iter()
            .enumerate()
            .filter_map(|(i, t)| parse_int(t).map(|v| (i, v)))
            .last()
            .ok_or_else(|| {
                ComposeError::malformed(format!("no temperature in '{}'", line.trim()))
            })?;

        let condition = match cleaned.split_once(',') {
            Some((before, _)) => before.trim().to_string(),
            None => tokens[..temp_index].join(" "),
        };
        if condition.is_empty() {
            return Err(ComposeError::malformed(format!(
                "no condition in '{}'",
                line.trim()
            )));
        }

        checked_celsius(f64::from(temperature), "current")?;
        Ok((temperature, condition))
    }

    fn forecast_day(line: &str, as_of: NaiveDate) -> Result<DayForecast, ComposeError> {
        let weekday = line_weekday(line)
            .ok_or_else(|| ComposeError::malformed(format!("no weekday in '{}'", line.trim())))?;
        let cleaned = clean(line);
        let tokens: Vec<&str> = cleaned.split_whitespace().collect();

        let high_at = tokens
            .iter()
            .position(|t| t.eq_ignore_ascii_case("high"))
            .ok_or_else(|| ComposeError::malformed(format!("no 'High' in '{}'", line.trim())))?;
        let low_at = tokens
            .iter()
            .skip(high_at)
            .position(|t| t.eq_ignore_ascii_case("low"))
            .map(|i| i + high_at)
            .ok_or_else(|| ComposeError::malformed(format!("no 'Low' in '{}'", line.trim())))?;

        let high_c = parse_number(tokens.get(high_at + 1), "high", line)?;
        let low_c = parse_number(tokens.get(low_at + 1), "low", line)?;

        let description = tokens
            .get(1..high_at)
            .map(|words| words.join(" "))
            .unwrap_or_default();
        if description.is_empty() {
            return Err(ComposeError::malformed(format!(
                "no description in '{}'",
                line.trim()
            )));
        }

        let ahead =
            (7 + weekday.num_days_from_monday() - as_of.weekday().num_days_from_monday()) % 7;
        let date = as_of
            .checked_add_days(Days::new(u64::from(ahead)))
            .unwrap_or(as_of)
            .format("%b %-d")
            .to_string();

        Ok(DayForecast {
            weekday,
            date,
            low_c,
            high_c,
            day_condition: description.clone(),
            night_condition: description,
        })
    }

    /// Forecast lines starting at `as_of`'s weekday.
    fn forecast(lines: &[&str], as_of: NaiveDate) -> Result<Vec<DayForecast>, ComposeError> {
        let today = as_of.weekday();
        let forecast_lines: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|l| is_forecast_line(l))
            .collect();
        let start = forecast_lines
            .iter()
            .position(|l| line_weekday(l) == Some(today))
            .ok_or_else(|| ComposeError::malformed(format!("no forecast line for {today}")))?;

        forecast_lines[start..]
            .iter()
            .map(|line| Self::forecast_day(line, as_of))
            .collect()
    }
}

impl PayloadParser for TextPayloadParser {
    fn name(&self) -> &'static str {
        "text"
    }

    fn parse(
        &self,
        payload: &RawPayload,
        options: &ReportOptions,
        as_of: NaiveDate,
    ) -> Result<WeatherSnapshot, ComposeError> {
        let text = match payload {
            RawPayload::Text(text) => text.as_str(),
            RawPayload::Structured(value) => value
                .get("html_description")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ComposeError::malformed("no `html_description` text"))?,
        };
        let lines: Vec<&str> = text.lines().collect();

        let (current_temp_c, current_condition) = Self::current(&lines)?;

        if options.contains(ReportFlag::ExtraDailyInfo) {
            return Err(ComposeError::malformed(
                "text payload carries no station, update time or wind",
            ));
        }
        if options.contains(ReportFlag::LocationInfo) {
            return Err(ComposeError::malformed("text payload carries no location"));
        }

        let forecast = if options.contains(ReportFlag::WeeklyForecast) {
            Some(Self::forecast(&lines, as_of)?)
        } else {
            None
        };

        tracing::debug!(
            current_temp_c,
            forecast_days = forecast.as_ref().map(Vec::len),
            "parsed text payload"
        );

        Ok(WeatherSnapshot {
            date: as_of,
            current_temp_c,
            current_condition,
            extras: None,
            forecast,
            location: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "<b>Current Conditions:</b><br />\n\
        Partly Cloudy, 18 C<BR />\n\
        <BR /><b>Forecast:</b><BR />\n\
        Tue - Rain. High: 15 Low: 9<br />\n\
        Wed - Mostly Sunny. High: 21 Low: 11<br />\n\
        Thu - Showers. High: 19 Low: 12<br />\n\
        Fri - Sunny. High: 23 Low: 13<br />\n\
        <br />\n\
        <a href=\"http://example.com/forecast\">Full Forecast</a><BR/>\n";

    /// 2024-05-01 is a Wednesday.
    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date")
    }

    fn parse(text: &str, options: &ReportOptions) -> Result<WeatherSnapshot, ComposeError> {
        TextPayloadParser.parse(&RawPayload::Text(text.to_string()), options, as_of())
    }

    #[test]
    fn extracts_current_conditions() {
        let snapshot = parse(FEED, &ReportOptions::none()).expect("parse");
        assert_eq!(snapshot.current_temp_c, 18);
        assert_eq!(snapshot.current_condition, "Partly Cloudy");
        assert_eq!(snapshot.date, as_of());
        assert!(snapshot.forecast.is_none());
    }

    #[test]
    fn keeps_sign_of_negative_temperatures() {
        let snapshot =
            parse("Current Conditions:\nSnow, -3 C\n", &ReportOptions::none()).expect("parse");
        assert_eq!(snapshot.current_temp_c, -3);
        assert_eq!(snapshot.current_condition, "Snow");
    }

    #[test]
    fn condition_without_comma_stops_at_temperature() {
        let snapshot = parse("Current Conditions:\nLight Rain 12 C\n", &ReportOptions::none())
            .expect("parse");
        assert_eq!(snapshot.current_condition, "Light Rain");
        assert_eq!(snapshot.current_temp_c, 12);
    }

    #[test]
    fn missing_marker_is_malformed() {
        let err = parse("Sunny, 20 C\n", &ReportOptions::none()).unwrap_err();
        assert!(err.to_string().contains("Current Conditions"));
    }

    #[test]
    fn missing_temperature_is_malformed() {
        let err = parse("Current Conditions:\nSunny\n", &ReportOptions::none()).unwrap_err();
        assert!(err.to_string().contains("no temperature"));
    }

    #[test]
    fn weekly_forecast_starts_at_today() {
        let options = ReportOptions::none().with(ReportFlag::WeeklyForecast);
        let snapshot = parse(FEED, &options).expect("parse");
        let days = snapshot.forecast.expect("forecast");

        let weekdays: Vec<_> = days.iter().map(|d| d.weekday).collect();
        assert_eq!(weekdays, vec![Weekday::Wed, Weekday::Thu, Weekday::Fri]);

        assert_eq!(days[0].day_condition, "Mostly Sunny");
        assert_eq!(days[0].date, "May 1");
        assert!((days[0].high_c - 21.0).abs() < 1e-9);
        assert!((days[0].low_c - 11.0).abs() < 1e-9);
        assert_eq!(days[2].date, "May 3");
    }

    #[test]
    fn weekly_forecast_without_today_is_malformed() {
        let options = ReportOptions::none().with(ReportFlag::WeeklyForecast);
        let feed = "Current Conditions:\nSunny, 20 C\nThu - Showers. High: 19 Low: 12\n";
        let err = parse(feed, &options).unwrap_err();
        assert!(err.to_string().contains("no forecast line for Wed"));
    }

    #[test]
    fn forecast_line_without_low_is_malformed() {
        let options = ReportOptions::none().with(ReportFlag::WeeklyForecast);
        let feed = "Current Conditions:\nSunny, 20 C\nWed - Sunny. High: 21\n";
        let err = parse(feed, &options).unwrap_err();
        assert!(err.to_string().contains("no 'Low'"));
    }

    #[test]
    fn non_finite_forecast_temperatures_are_malformed() {
        let options = ReportOptions::none().with(ReportFlag::WeeklyForecast);
        for line in ["Wed - Sunny. High: inf Low: 11", "Wed - Sunny. High: 21 Low: NaN"] {
            let feed = format!("Current Conditions:\nSunny, 20 C\n{line}\n");
            let err = parse(&feed, &options).unwrap_err();
            assert!(err.to_string().contains("out of range"), "{line}: {err}");
        }
    }

    #[test]
    fn implausible_current_temperature_is_malformed() {
        let err = parse("Current Conditions:\nSunny, 99999 C\n", &ReportOptions::none())
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn text_payloads_cannot_supply_location() {
        let options = ReportOptions::none().with(ReportFlag::LocationInfo);
        let err = parse(FEED, &options).unwrap_err();
        assert!(matches!(err, ComposeError::MalformedPayload(_)));
    }

    #[test]
    fn reads_html_description_from_records() {
        let payload = RawPayload::Structured(serde_json::json!({ "html_description": FEED }));
        let snapshot = TextPayloadParser
            .parse(&payload, &ReportOptions::none(), as_of())
            .expect("parse");
        assert_eq!(snapshot.current_temp_c, 18);
    }
}
