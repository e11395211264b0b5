//! Synthetic LOOP packets for tests.
//!
//! Compiled into the library's unit tests and shared with the integration
//! tests through `tests/common.rs`. It has no crate imports so both can
//! include the same file. Offsets are written out independently of the
//! decoder's own table.
#![allow(dead_code)]

const SPAN: usize = 60;

#[derive(Debug, Clone)]
pub struct PacketBuilder {
    bytes: [u8; SPAN],
}

impl Default for PacketBuilder {
    fn default() -> Self {
        let mut bytes = [0u8; SPAN];
        bytes[..3].copy_from_slice(b"LOO");
        Self { bytes }
    }
}

impl PacketBuilder {
    fn put_u16(mut self, at: usize, value: u16) -> Self {
        self.bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
        self
    }

    fn put_i16(mut self, at: usize, value: i16) -> Self {
        self.bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn bar_trend(mut self, code: i8) -> Self {
        self.bytes[3] = code as u8;
        self
    }
    /// thousandths of an inch of mercury
    pub fn barometer_raw(self, raw: u16) -> Self {
        self.put_u16(7, raw)
    }
    /// tenths of °F
    pub fn temperature_tenths_f(self, raw: i16) -> Self {
        self.put_i16(12, raw)
    }
    pub fn wind_speed(mut self, mph: u8) -> Self {
        self.bytes[14] = mph;
        self
    }
    pub fn wind_direction(self, degrees: u16) -> Self {
        self.put_u16(16, degrees)
    }
    /// tenths of mph
    pub fn wind_averages_tenths(self, ten_min: u16, two_min: u16) -> Self {
        self.put_u16(18, ten_min).put_u16(20, two_min)
    }
    /// tenths of mph
    pub fn wind_gust_tenths(self, gust: u16, direction: u16) -> Self {
        self.put_u16(22, gust).put_u16(24, direction)
    }
    pub fn dew_point(self, f: i16) -> Self {
        self.put_i16(30, f)
    }
    pub fn humidity(mut self, percent: u8) -> Self {
        self.bytes[33] = percent;
        self
    }
    /// rain clicks
    pub fn rain_clicks(self, rate: u16, last_15min: u16, last_hour: u16, last_24hour: u16) -> Self {
        self.put_u16(34, rate)
            .put_u16(52, last_15min)
            .put_u16(54, last_hour)
            .put_u16(58, last_24hour)
    }
    pub fn uv(mut self, index: u8) -> Self {
        self.bytes[43] = index;
        self
    }
    pub fn solar_radiation(self, watts: u16) -> Self {
        self.put_u16(44, watts)
    }

    /// A calm, plausible reading: 64.4°F, 12 mph from 90°, 55% humidity, 29.921 inHg.
    pub fn typical() -> Self {
        PacketBuilder::default()
            .bar_trend(0)
            .barometer_raw(29_921)
            .temperature_tenths_f(644)
            .wind_speed(12)
            .wind_direction(90)
            .wind_averages_tenths(110, 120)
            .wind_gust_tenths(180, 95)
            .dew_point(48)
            .humidity(55)
            .rain_clicks(0, 0, 1, 4)
            .uv(3)
            .solar_radiation(420)
    }

    pub fn build(&self) -> [u8; SPAN] {
        self.bytes
    }
}
