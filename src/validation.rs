//! Range validation of decoded observations.
//!
//! [`validate`] applies the console sanity rules in a fixed order and tags the
//! record with the first matching [`DisregardReason`]. [`check_structure`] is
//! the stricter per-field bound check applied before anything is uploaded.

use chrono::{DateTime, Duration, Utc};

use crate::observation::{DisregardReason, FieldIssue, Observation, ValidatedObservation};

/// Wind speed and humidity both read this while the console is in its setup menu
/// or has lost the sensor suite.
pub const SETUP_MODE_SENTINEL: u8 = 255;
pub const MAX_PLAUSIBLE_WIND_MPH: f64 = 150.0;
pub const MAX_PLAUSIBLE_TEMPERATURE_C: f64 = 60.0;
pub const MAX_HUMIDITY_PERCENT: u8 = 100;

/// Classify an observation. First matching rule wins; a record carries one reason.
pub fn validate(observation: Observation) -> ValidatedObservation {
    match disregard_reason(&observation) {
        Some(reason) => ValidatedObservation::disregarded(observation, reason),
        None => ValidatedObservation::accepted(observation),
    }
}

fn disregard_reason(obs: &Observation) -> Option<DisregardReason> {
    if obs.wind_direction == 0 || obs.wind_direction > 360 {
        return Some(DisregardReason::WindDirectionOutOfRange);
    }
    if obs.wind_speed == f64::from(SETUP_MODE_SENTINEL) && obs.humidity == SETUP_MODE_SENTINEL {
        return Some(DisregardReason::ConsoleInSetupMode);
    }
    if obs.wind_speed > MAX_PLAUSIBLE_WIND_MPH
        || obs.temperature_c > MAX_PLAUSIBLE_TEMPERATURE_C
        || obs.humidity > MAX_HUMIDITY_PERCENT
    {
        return Some(DisregardReason::ImplausibleSensorValues);
    }
    None
}

/// How far in the future a capture timestamp may be before it is rejected.
pub fn max_clock_skew() -> Duration {
    Duration::minutes(10)
}

/// Per-field structural bounds. Returns every violated bound, empty when clean.
pub fn check_structure(obs: &Observation, now: DateTime<Utc>) -> Vec<FieldIssue> {
    let mut issues = Vec::new();

    if !obs.bar_trend.is_known() {
        issues.push(FieldIssue::new(
            "barTrend",
            format!("unknown trend code {}", obs.bar_trend.code()),
        ));
    }
    check_closed(&mut issues, "barometer", obs.barometer, 20.0, 32.5);
    check_open(&mut issues, "temperatureF", obs.temperature_f, -460.0, 150.0);
    check_open(&mut issues, "temperatureC", obs.temperature_c, -273.0, 150.0);
    check_closed(&mut issues, "windSpeed", obs.wind_speed, 0.0, 200.0);
    check_closed(&mut issues, "wind10MinAverage", obs.wind_10min_average, 0.0, 200.0);
    check_closed(&mut issues, "wind2MinAverage", obs.wind_2min_average, 0.0, 200.0);
    check_closed(&mut issues, "windGust", obs.wind_gust, 0.0, 200.0);
    check_direction(&mut issues, "windDirection", obs.wind_direction);
    check_direction(&mut issues, "windGustDirection", obs.wind_gust_direction);
    check_open(&mut issues, "dewPoint", f64::from(obs.dew_point), -460.0, 150.0);
    if obs.humidity > MAX_HUMIDITY_PERCENT {
        issues.push(FieldIssue::new(
            "humidity",
            format!("{} is above 100", obs.humidity),
        ));
    }
    for (field, value) in [
        ("rainRate", obs.rain_rate),
        ("last15MinRain", obs.last_15min_rain),
        ("lastHourRain", obs.last_hour_rain),
        ("last24HourRain", obs.last_24hour_rain),
    ] {
        if value < 0.0 {
            issues.push(FieldIssue::new(field, format!("{} is negative", value)));
        }
    }
    if obs.timestamp > now + max_clock_skew() {
        issues.push(FieldIssue::new(
            "timestamp",
            format!("{} is more than 10 minutes in the future", obs.timestamp.to_rfc3339()),
        ));
    }

    issues
}

fn check_closed(issues: &mut Vec<FieldIssue>, field: &str, value: f64, min: f64, max: f64) {
    if !(min..=max).contains(&value) {
        issues.push(FieldIssue::new(
            field,
            format!("{} outside [{}, {}]", value, min, max),
        ));
    }
}

fn check_open(issues: &mut Vec<FieldIssue>, field: &str, value: f64, min: f64, max: f64) {
    if !(value > min && value < max) {
        issues.push(FieldIssue::new(
            field,
            format!("{} outside ({}, {})", value, min, max),
        ));
    }
}

fn check_direction(issues: &mut Vec<FieldIssue>, field: &str, degrees: u16) {
    if degrees == 0 || degrees > 360 {
        issues.push(FieldIssue::new(
            field,
            format!("{} outside (0, 360]", degrees),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::decode::decode;
    use crate::station::packet_builder::PacketBuilder;

    fn obs(builder: PacketBuilder) -> Observation {
        decode(&builder.build(), 0, Utc::now()).unwrap()
    }

    #[test]
    fn typical_reading_is_structurally_clean() {
        let o = obs(PacketBuilder::typical());
        assert!(check_structure(&o, Utc::now()).is_empty());
    }

    #[test]
    fn zero_barometer_is_flagged() {
        let o = obs(PacketBuilder::typical().barometer_raw(0));
        let issues = check_structure(&o, Utc::now());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "barometer");
    }

    #[test]
    fn future_timestamp_is_flagged() {
        let mut o = obs(PacketBuilder::typical());
        o.timestamp = Utc::now() + Duration::minutes(30);
        let issues = check_structure(&o, Utc::now());
        assert!(issues.iter().any(|i| i.field == "timestamp"));
    }

    #[test]
    fn gust_direction_zero_is_flagged() {
        let o = obs(PacketBuilder::typical().wind_gust_tenths(100, 0));
        let issues = check_structure(&o, Utc::now());
        assert!(issues.iter().any(|i| i.field == "windGustDirection"));
    }

    #[test]
    fn boundary_direction_360_is_accepted() {
        let v = validate(obs(PacketBuilder::typical().wind_direction(360)));
        assert!(v.is_accepted());
        let v = validate(obs(PacketBuilder::typical().wind_direction(361)));
        assert_eq!(v.disregard_reason, Some(DisregardReason::WindDirectionOutOfRange));
    }
}
