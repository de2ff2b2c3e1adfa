//! Typed decoding of fixed-offset console fields.
//!
//! Each field family has a documented "dashed" raw value that means the
//! console has no measurement; those decode to `None`. Everything else is
//! scaled into engineering units (US customary, matching the console).

use chrono::{NaiveDate, NaiveTime};
use tracing::warn;
use vantage_sync_core::units::RainCollectorSize;
use vantage_sync_core::{
    Evapotranspiration, Heading, Humidity, LeafWetness, Pressure, Rainfall, SoilMoisture,
    SolarRadiation, Speed, Temperature, UvIndex,
};

use crate::codec;

const INVALID_16BIT_TEMPERATURE: i16 = 32767;
const INVALID_16BIT_HIGH_TEMPERATURE: i16 = -32768;
const INVALID_8BIT_TEMPERATURE: u8 = 255;
const INVALID_HUMIDITY: u8 = 255;
const INVALID_WIND_DIRECTION_SLICE: u8 = 255;
const INVALID_WIND_DIRECTION: u16 = 0;
const INVALID_WIND_SPEED: u8 = 255;
const INVALID_16BIT_AVG_WIND_SPEED: u16 = 32767;
const INVALID_UV_INDEX: u8 = 255;
const INVALID_SOLAR_RADIATION: u16 = 32767;
const INVALID_ET: u16 = 0;
const INVALID_BAROMETER: u16 = 0;
const INVALID_TIME: u16 = 65535;
const NO_STORM_ACTIVE_DATE: i16 = -1;

const TEMPERATURE_16BIT_SCALE: f64 = 10.0;
const TEMPERATURE_8BIT_OFFSET: f64 = 90.0;
const BAROMETER_SCALE: f64 = 1000.0;
const AVG_WIND_SPEED_SCALE: f64 = 10.0;
const UV_INDEX_SCALE: f64 = 10.0;
const DAY_ET_SCALE: f64 = 1000.0;
const MONTH_YEAR_ET_SCALE: f64 = 100.0;
const STORM_RAIN_SCALE: f64 = 100.0;
const NORTH_HEADING_VALUE: u16 = 360;
const DEGREES_PER_SLICE: f64 = 22.5;
const YEAR_OFFSET: i32 = 2000;

/// Field decoder for one console.
///
/// The rain collector click size is a property of the installed sensor suite
/// and must be configured before any rain field is decoded; decoding without
/// it logs a warning and assumes the 0.01 inch collector.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    rain_collector: Option<RainCollectorSize>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rain_collector(collector: RainCollectorSize) -> Self {
        Self {
            rain_collector: Some(collector),
        }
    }

    pub fn set_rain_collector(&mut self, collector: RainCollectorSize) {
        self.rain_collector = Some(collector);
    }

    pub fn rain_collector(&self) -> Option<RainCollectorSize> {
        self.rain_collector
    }

    /// 16-bit temperature in tenths of a degree, dashed at 32767
    pub fn temperature_16(&self, buf: &[u8], offset: usize) -> Option<Temperature> {
        match codec::read_i16(buf, offset) {
            INVALID_16BIT_TEMPERATURE => None,
            raw => Some(raw as f64 / TEMPERATURE_16BIT_SCALE),
        }
    }

    /// 16-bit temperature whose dashed value is -32768 (archive highs)
    pub fn temperature_16_high(&self, buf: &[u8], offset: usize) -> Option<Temperature> {
        match codec::read_i16(buf, offset) {
            INVALID_16BIT_HIGH_TEMPERATURE => None,
            raw => Some(raw as f64 / TEMPERATURE_16BIT_SCALE),
        }
    }

    /// 16-bit whole-degree temperature (LOOP2 derived values)
    pub fn temperature_16_whole(&self, buf: &[u8], offset: usize) -> Option<Temperature> {
        match codec::read_i16(buf, offset) {
            INVALID_16BIT_TEMPERATURE => None,
            raw => Some(raw as f64),
        }
    }

    /// 8-bit temperature with a 90 degree bias, dashed at 255
    pub fn temperature_8(&self, buf: &[u8], offset: usize) -> Option<Temperature> {
        match codec::read_u8(buf, offset) {
            INVALID_8BIT_TEMPERATURE => None,
            raw => Some(raw as f64 - TEMPERATURE_8BIT_OFFSET),
        }
    }

    pub fn humidity(&self, buf: &[u8], offset: usize) -> Option<Humidity> {
        match codec::read_u8(buf, offset) {
            INVALID_HUMIDITY => None,
            raw => Some(raw as f64),
        }
    }

    pub fn barometer(&self, buf: &[u8], offset: usize) -> Option<Pressure> {
        match codec::read_u16(buf, offset) {
            INVALID_BAROMETER => None,
            raw => Some(raw as f64 / BAROMETER_SCALE),
        }
    }

    pub fn uv_index(&self, buf: &[u8], offset: usize) -> Option<UvIndex> {
        match codec::read_u8(buf, offset) {
            INVALID_UV_INDEX => None,
            raw => Some(raw as f64 / UV_INDEX_SCALE),
        }
    }

    pub fn solar_radiation(&self, buf: &[u8], offset: usize) -> Option<SolarRadiation> {
        match codec::read_u16(buf, offset) {
            INVALID_SOLAR_RADIATION => None,
            raw => Some(raw as f64),
        }
    }

    pub fn day_et(&self, buf: &[u8], offset: usize) -> Option<Evapotranspiration> {
        match codec::read_u16(buf, offset) {
            INVALID_ET => None,
            raw => Some(raw as f64 / DAY_ET_SCALE),
        }
    }

    pub fn month_year_et(&self, buf: &[u8], offset: usize) -> Option<Evapotranspiration> {
        match codec::read_u16(buf, offset) {
            INVALID_ET => None,
            raw => Some(raw as f64 / MONTH_YEAR_ET_SCALE),
        }
    }

    /// 8-bit archive ET in thousandths of an inch
    pub fn archive_et(&self, buf: &[u8], offset: usize) -> Option<Evapotranspiration> {
        match codec::read_u8(buf, offset) {
            0 => None,
            raw => Some(raw as f64 / DAY_ET_SCALE),
        }
    }

    /// 8-bit wind speed in mph, dashed at 255
    pub fn wind_speed(&self, buf: &[u8], offset: usize) -> Option<Speed> {
        match codec::read_u8(buf, offset) {
            INVALID_WIND_SPEED => None,
            raw => Some(raw as f64),
        }
    }

    /// 16-bit gust speed, not dashed
    pub fn wind_speed_16(&self, buf: &[u8], offset: usize) -> Option<Speed> {
        Some(codec::read_u16(buf, offset) as f64)
    }

    /// 16-bit averaged wind speed in tenths of mph, dashed at 32767
    pub fn avg_wind_speed(&self, buf: &[u8], offset: usize) -> Option<Speed> {
        match codec::read_u16(buf, offset) {
            INVALID_16BIT_AVG_WIND_SPEED => None,
            raw => Some(raw as f64 / AVG_WIND_SPEED_SCALE),
        }
    }

    /// 16-bit wind direction in degrees; 0 is dashed and 360 wraps to north
    pub fn wind_direction(&self, buf: &[u8], offset: usize) -> Option<Heading> {
        match codec::read_u16(buf, offset) {
            INVALID_WIND_DIRECTION => None,
            NORTH_HEADING_VALUE => Some(0.0),
            raw => Some(raw as f64),
        }
    }

    /// 8-bit compass slice index 0..15, dashed at 255
    pub fn wind_direction_slice(&self, buf: &[u8], offset: usize) -> Option<Heading> {
        match codec::read_u8(buf, offset) {
            INVALID_WIND_DIRECTION_SLICE => None,
            raw => Some(raw as f64 * DEGREES_PER_SLICE),
        }
    }

    /// Rain clicks scaled by the configured collector size
    pub fn rain(&self, buf: &[u8], offset: usize) -> Rainfall {
        let clicks = codec::read_u16(buf, offset);
        clicks as f64 * self.click_size()
    }

    pub fn storm_rain(&self, buf: &[u8], offset: usize) -> Rainfall {
        codec::read_u16(buf, offset) as f64 / STORM_RAIN_SCALE
    }

    /// Packed storm start date, dashed at -1
    pub fn storm_start(&self, buf: &[u8], offset: usize) -> Option<NaiveDate> {
        match codec::read_i16(buf, offset) {
            NO_STORM_ACTIVE_DATE => None,
            raw => {
                let raw = raw as u16;
                let year = (raw & 0x3F) as i32 + YEAR_OFFSET;
                let day = ((raw >> 7) & 0x1F) as u32;
                let month = ((raw >> 12) & 0xF) as u32;
                NaiveDate::from_ymd_opt(year, month, day)
            }
        }
    }

    /// Console battery voltage from the raw ADC reading
    pub fn console_battery_voltage(&self, buf: &[u8], offset: usize) -> f64 {
        let raw = codec::read_u16(buf, offset);
        (raw as f64 * 300.0) / 512.0 / 100.0
    }

    /// Time packed as hour * 100 + minute
    pub fn packed_time(&self, buf: &[u8], offset: usize) -> Option<NaiveTime> {
        match codec::read_u16(buf, offset) {
            INVALID_TIME => None,
            raw => {
                let hour = (raw / 100) as u32;
                let minute = (raw % 100) as u32;
                NaiveTime::from_hms_opt(hour, minute, 0)
            }
        }
    }

    pub fn leaf_wetness(&self, buf: &[u8], offset: usize) -> Option<LeafWetness> {
        match codec::read_u8(buf, offset) {
            raw @ 0..=15 => Some(raw),
            _ => None,
        }
    }

    pub fn soil_moisture(&self, buf: &[u8], offset: usize) -> Option<SoilMoisture> {
        match codec::read_u8(buf, offset) {
            255 => None,
            raw => Some(raw),
        }
    }

    fn click_size(&self) -> f64 {
        match self.rain_collector {
            Some(collector) => collector.click_inches(),
            None => {
                warn!("decoding rain value before rain collector size has been set");
                RainCollectorSize::PointZeroOneInch.click_inches()
            }
        }
    }
}
