//! Fixed-layout LOOP packet decoder.
//!
//! Offsets are relative to the `LOO` marker and all multi-byte values are
//! little-endian. Decoding is total: any buffer holding at least
//! [`PACKET_SPAN`] bytes past the offset yields an [`Observation`], however odd
//! its values. Range sanity is left to [`crate::validation`].
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::observation::{fahrenheit_to_celsius, round1, BarTrend, Observation};

/// Bytes from the marker covered by the decoded fields.
pub const PACKET_SPAN: usize = 60;

/// Rain collector resolution: one bucket tip.
pub const MM_PER_RAIN_CLICK: f64 = 0.2;

const OFF_BAR_TREND: usize = 3;
const OFF_BAROMETER: usize = 7;
const OFF_OUTSIDE_TEMP: usize = 12;
const OFF_WIND_SPEED: usize = 14;
const OFF_WIND_DIRECTION: usize = 16;
const OFF_WIND_AVG_10MIN: usize = 18;
const OFF_WIND_AVG_2MIN: usize = 20;
const OFF_WIND_GUST: usize = 22;
const OFF_WIND_GUST_DIRECTION: usize = 24;
const OFF_DEW_POINT: usize = 30;
const OFF_HUMIDITY: usize = 33;
const OFF_RAIN_RATE: usize = 34;
const OFF_UV: usize = 43;
const OFF_SOLAR: usize = 44;
const OFF_RAIN_15MIN: usize = 52;
const OFF_RAIN_HOUR: usize = 54;
const OFF_RAIN_24HOUR: usize = 58;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet truncated: need {needed} bytes from offset {offset}, buffer holds {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },
}

struct Reader<'a> {
    packet: &'a [u8],
}

impl Reader<'_> {
    fn u8(&self, at: usize) -> u8 {
        self.packet[at]
    }
    fn i8(&self, at: usize) -> i8 {
        self.packet[at] as i8
    }
    fn u16(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.packet[at], self.packet[at + 1]])
    }
    fn i16(&self, at: usize) -> i16 {
        i16::from_le_bytes([self.packet[at], self.packet[at + 1]])
    }
    fn tenths(&self, at: usize) -> f64 {
        round1(f64::from(self.u16(at)) / 10.0)
    }
    fn rain_mm(&self, at: usize) -> f64 {
        round1(f64::from(self.u16(at)) * MM_PER_RAIN_CLICK)
    }
}

/// Decode the packet whose marker starts at `offset`.
pub fn decode(
    buffer: &[u8],
    offset: usize,
    captured_at: DateTime<Utc>,
) -> Result<Observation, DecodeError> {
    let end = offset
        .checked_add(PACKET_SPAN)
        .filter(|end| *end <= buffer.len())
        .ok_or(DecodeError::Truncated {
            offset,
            needed: PACKET_SPAN,
            len: buffer.len(),
        })?;
    let r = Reader {
        packet: &buffer[offset..end],
    };

    let temperature_f = round1(f64::from(r.i16(OFF_OUTSIDE_TEMP)) / 10.0);
    Ok(Observation {
        bar_trend: BarTrend::from(r.i8(OFF_BAR_TREND)),
        barometer: f64::from(r.u16(OFF_BAROMETER)) / 1000.0,
        temperature_f,
        temperature_c: fahrenheit_to_celsius(temperature_f),
        wind_speed: f64::from(r.u8(OFF_WIND_SPEED)),
        wind_direction: r.u16(OFF_WIND_DIRECTION),
        wind_10min_average: r.tenths(OFF_WIND_AVG_10MIN),
        wind_2min_average: r.tenths(OFF_WIND_AVG_2MIN),
        wind_gust: r.tenths(OFF_WIND_GUST),
        wind_gust_direction: r.u16(OFF_WIND_GUST_DIRECTION),
        dew_point: r.i16(OFF_DEW_POINT),
        humidity: r.u8(OFF_HUMIDITY),
        rain_rate: r.rain_mm(OFF_RAIN_RATE),
        uv: r.u8(OFF_UV),
        solar_radiation: r.u16(OFF_SOLAR),
        last_15min_rain: r.rain_mm(OFF_RAIN_15MIN),
        last_hour_rain: r.rain_mm(OFF_RAIN_HOUR),
        last_24hour_rain: r.rain_mm(OFF_RAIN_24HOUR),
        timestamp: captured_at,
    })
}
