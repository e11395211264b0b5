//! Decoded console readings and their validation verdict.
//!
//! An [`Observation`] is built once per decoded LOOP packet and never mutated
//! afterwards. Validation wraps it in a [`ValidatedObservation`] which carries
//! the single reason (if any) the record was disregarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Three-hour barometric trend reported by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i8", into = "i8")]
pub enum BarTrend {
    FallingRapidly,
    FallingSlowly,
    Steady,
    RisingSlowly,
    RisingRapidly,
    /// Rev A firmware reports `P` in place of a trend code
    NotAvailable,
    Unknown(i8),
}

impl BarTrend {
    pub fn code(self) -> i8 {
        match self {
            BarTrend::FallingRapidly => -60,
            BarTrend::FallingSlowly => -20,
            BarTrend::Steady => 0,
            BarTrend::RisingSlowly => 20,
            BarTrend::RisingRapidly => 60,
            BarTrend::NotAvailable => 80,
            BarTrend::Unknown(code) => code,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BarTrend::FallingRapidly => "Falling Rapidly",
            BarTrend::FallingSlowly => "Falling Slowly",
            BarTrend::Steady => "Steady",
            BarTrend::RisingSlowly => "Rising Slowly",
            BarTrend::RisingRapidly => "Rising Rapidly",
            BarTrend::NotAvailable => "P",
            BarTrend::Unknown(_) => "Unknown",
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, BarTrend::Unknown(_))
    }
}

impl From<i8> for BarTrend {
    fn from(code: i8) -> Self {
        match code {
            -60 => BarTrend::FallingRapidly,
            -20 => BarTrend::FallingSlowly,
            0 => BarTrend::Steady,
            20 => BarTrend::RisingSlowly,
            60 => BarTrend::RisingRapidly,
            80 => BarTrend::NotAvailable,
            other => BarTrend::Unknown(other),
        }
    }
}

impl From<BarTrend> for i8 {
    fn from(trend: BarTrend) -> Self {
        trend.code()
    }
}

impl fmt::Display for BarTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One decoded LOOP packet. Values are not range checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub bar_trend: BarTrend,
    /// inches of mercury
    pub barometer: f64,
    pub temperature_f: f64,
    pub temperature_c: f64,
    /// mph
    pub wind_speed: f64,
    /// degrees, 1..=360 when valid
    pub wind_direction: u16,
    #[serde(rename = "wind10MinAverage")]
    pub wind_10min_average: f64,
    #[serde(rename = "wind2MinAverage")]
    pub wind_2min_average: f64,
    pub wind_gust: f64,
    pub wind_gust_direction: u16,
    /// °F
    pub dew_point: i16,
    /// percent
    pub humidity: u8,
    /// mm per hour
    pub rain_rate: f64,
    pub uv: u8,
    /// W/m²
    pub solar_radiation: u16,
    /// mm
    #[serde(rename = "last15MinRain")]
    pub last_15min_rain: f64,
    pub last_hour_rain: f64,
    #[serde(rename = "last24HourRain")]
    pub last_24hour_rain: f64,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn dew_point_c(&self) -> f64 {
        fahrenheit_to_celsius(f64::from(self.dew_point))
    }
}

/// Round to one decimal place, matching the console's display precision.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    round1((f - 32.0) * 5.0 / 9.0)
}

/// Why an observation was kept out of normal storage and delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisregardReason {
    WindDirectionOutOfRange,
    ConsoleInSetupMode,
    ImplausibleSensorValues,
    FailedStructuralValidation,
}

impl DisregardReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DisregardReason::WindDirectionOutOfRange => "wind direction out of range",
            DisregardReason::ConsoleInSetupMode => "console in setup mode",
            DisregardReason::ImplausibleSensorValues => "implausible sensor values",
            DisregardReason::FailedStructuralValidation => "failed structural validation",
        }
    }
}

impl fmt::Display for DisregardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field that failed a structural bound check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedObservation {
    pub observation: Observation,
    pub disregard_reason: Option<DisregardReason>,
    /// Only populated when the record failed structural checks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub structural_errors: Vec<FieldIssue>,
}

impl ValidatedObservation {
    pub fn accepted(observation: Observation) -> Self {
        Self {
            observation,
            disregard_reason: None,
            structural_errors: Vec::new(),
        }
    }

    pub fn disregarded(observation: Observation, reason: DisregardReason) -> Self {
        Self {
            observation,
            disregard_reason: Some(reason),
            structural_errors: Vec::new(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.disregard_reason.is_none()
    }

    /// Human-readable reason; empty for accepted records.
    pub fn reason_text(&self) -> &'static str {
        self.disregard_reason.map(DisregardReason::as_str).unwrap_or("")
    }
}
