//! The LOOP packet: the console's primary real-time status report.

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use vantage_sync_core::{ProtocolError, Result};

use crate::abi::{frame, LOOP_PACKET_SIZE};
use crate::codec;
use crate::crc;
use crate::decode::Decoder;
use crate::types::{BaroTrend, ForecastIcon};

pub const LOOP_PACKET_TYPE: u8 = 0;
pub const ALARM_BITMAP_BYTES: usize = 16;
pub const ALARM_BITS: usize = ALARM_BITMAP_BYTES * 8;

pub const MAX_EXTRA_TEMPERATURES: usize = 7;
pub const MAX_EXTRA_HUMIDITIES: usize = 7;
pub const MAX_SOIL_TEMPERATURES: usize = 4;
pub const MAX_LEAF_TEMPERATURES: usize = 4;
pub const MAX_SOIL_MOISTURES: usize = 4;
pub const MAX_LEAF_WETNESSES: usize = 4;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopPacket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baro_trend: Option<BaroTrend>,
    /// Cursor of the next archive record the console will write
    pub next_record: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barometer: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inside_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inside_humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outside_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed_10_minute_average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_direction: Option<f64>,
    pub extra_temperatures: [Option<f64>; MAX_EXTRA_TEMPERATURES],
    pub soil_temperatures: [Option<f64>; MAX_SOIL_TEMPERATURES],
    pub leaf_temperatures: [Option<f64>; MAX_LEAF_TEMPERATURES],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outside_humidity: Option<f64>,
    pub extra_humidities: [Option<f64>; MAX_EXTRA_HUMIDITIES],
    pub rain_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uv_index: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solar_radiation: Option<f64>,
    pub storm_rain: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storm_start: Option<NaiveDate>,
    pub day_rain: f64,
    pub month_rain: f64,
    pub year_rain: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_et: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month_et: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_et: Option<f64>,
    pub soil_moistures: [Option<u8>; MAX_SOIL_MOISTURES],
    pub leaf_wetnesses: [Option<u8>; MAX_LEAF_WETNESSES],
    /// Raw 128-bit alarm bitmap, least significant bit first
    #[serde(skip)]
    pub alarm_bitmap: [u8; ALARM_BITMAP_BYTES],
    #[serde(skip)]
    pub transmitter_battery_status: u8,
    pub console_battery_voltage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast_icon: Option<ForecastIcon>,
    pub forecast_rule: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sunrise: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sunset: Option<NaiveTime>,
}

impl LoopPacket {
    /// Decode a 99-byte LOOP frame.
    ///
    /// The frame must start with "LOO", carry packet type 0, end with
    /// <LF><CR>, and checksum to zero. Dashed fields decode as absent.
    pub fn decode(buffer: &[u8], decoder: &Decoder) -> Result<Self> {
        if buffer.len() != LOOP_PACKET_SIZE {
            return Err(ProtocolError::DecodeInvalidField("LOOP packet length"));
        }
        if &buffer[0..3] != b"LOO" {
            return Err(ProtocolError::FramingBadPrefix);
        }
        if !crc::check(buffer) {
            return Err(ProtocolError::CrcFailure);
        }
        if codec::read_u8(buffer, 4) != LOOP_PACKET_TYPE {
            return Err(ProtocolError::DecodeInvalidField("LOOP packet type"));
        }
        if buffer[95] != frame::LINE_FEED || buffer[96] != frame::CARRIAGE_RETURN {
            return Err(ProtocolError::FramingBadTerminator);
        }

        let baro_trend = BaroTrend::from_raw(buffer[3])?;

        let mut extra_temperatures = [None; MAX_EXTRA_TEMPERATURES];
        for (i, slot) in extra_temperatures.iter_mut().enumerate() {
            *slot = decoder.temperature_8(buffer, 18 + i);
        }
        let mut soil_temperatures = [None; MAX_SOIL_TEMPERATURES];
        for (i, slot) in soil_temperatures.iter_mut().enumerate() {
            *slot = decoder.temperature_8(buffer, 25 + i);
        }
        let mut leaf_temperatures = [None; MAX_LEAF_TEMPERATURES];
        for (i, slot) in leaf_temperatures.iter_mut().enumerate() {
            *slot = decoder.temperature_8(buffer, 29 + i);
        }
        let mut extra_humidities = [None; MAX_EXTRA_HUMIDITIES];
        for (i, slot) in extra_humidities.iter_mut().enumerate() {
            *slot = decoder.humidity(buffer, 34 + i);
        }
        let mut soil_moistures = [None; MAX_SOIL_MOISTURES];
        for (i, slot) in soil_moistures.iter_mut().enumerate() {
            *slot = decoder.soil_moisture(buffer, 62 + i);
        }
        let mut leaf_wetnesses = [None; MAX_LEAF_WETNESSES];
        for (i, slot) in leaf_wetnesses.iter_mut().enumerate() {
            *slot = decoder.leaf_wetness(buffer, 66 + i);
        }

        let mut alarm_bitmap = [0u8; ALARM_BITMAP_BYTES];
        alarm_bitmap.copy_from_slice(&buffer[70..70 + ALARM_BITMAP_BYTES]);

        Ok(Self {
            baro_trend,
            next_record: codec::read_u16(buffer, 5),
            barometer: decoder.barometer(buffer, 7),
            inside_temperature: decoder.temperature_16(buffer, 9),
            inside_humidity: decoder.humidity(buffer, 11),
            outside_temperature: decoder.temperature_16(buffer, 12),
            wind_speed: decoder.wind_speed(buffer, 14),
            wind_speed_10_minute_average: decoder.wind_speed(buffer, 15),
            wind_direction: decoder.wind_direction(buffer, 16),
            extra_temperatures,
            soil_temperatures,
            leaf_temperatures,
            outside_humidity: decoder.humidity(buffer, 33),
            extra_humidities,
            rain_rate: decoder.rain(buffer, 41),
            uv_index: decoder.uv_index(buffer, 43),
            solar_radiation: decoder.solar_radiation(buffer, 44),
            storm_rain: decoder.storm_rain(buffer, 46),
            storm_start: decoder.storm_start(buffer, 48),
            day_rain: decoder.rain(buffer, 50),
            month_rain: decoder.rain(buffer, 52),
            year_rain: decoder.rain(buffer, 54),
            day_et: decoder.day_et(buffer, 56),
            month_et: decoder.month_year_et(buffer, 58),
            year_et: decoder.month_year_et(buffer, 60),
            soil_moistures,
            leaf_wetnesses,
            alarm_bitmap,
            transmitter_battery_status: codec::read_u8(buffer, 86),
            console_battery_voltage: decoder.console_battery_voltage(buffer, 87),
            forecast_icon: ForecastIcon::from_raw(codec::read_u8(buffer, 89)),
            forecast_rule: codec::read_u8(buffer, 90),
            sunrise: decoder.packed_time(buffer, 91),
            sunset: decoder.packed_time(buffer, 93),
        })
    }

    /// State of one of the 128 alarm bits
    pub fn alarm_bit(&self, bit: usize) -> bool {
        debug_assert!(bit < ALARM_BITS);
        self.alarm_bitmap[bit / 8] & (1 << (bit % 8)) != 0
    }

    /// Battery state of a transmitter, `channel` in 1..=8
    pub fn is_transmitter_battery_good(&self, channel: u8) -> bool {
        self.transmitter_battery_status & (1 << (channel - 1)) == 0
    }

    /// The last LOOP packets of a storm report a valid start date with zero
    /// storm rain; by definition an ongoing storm has rain in it
    pub fn is_storm_ongoing(&self) -> bool {
        self.storm_start.is_some() && self.storm_rain > 0.0
    }
}

/// Frame fixtures shared by protocol and driver tests
#[doc(hidden)]
pub mod test_support {
    use super::*;

    /// Build a CRC-valid LOOP frame with every field dashed
    pub fn empty_loop_frame() -> Vec<u8> {
        let mut buf = vec![0u8; LOOP_PACKET_SIZE - 2];
        buf[0] = b'L';
        buf[1] = b'O';
        buf[2] = b'O';
        buf[3] = b'P'; // no trend available
        buf[4] = LOOP_PACKET_TYPE;
        codec::write_u16(&mut buf, 5, 130);
        codec::write_u16(&mut buf, 7, 0); // barometer dashed
        codec::write_i16(&mut buf, 9, 32767);
        buf[11] = 255;
        codec::write_i16(&mut buf, 12, 32767);
        buf[14] = 255;
        buf[15] = 255;
        codec::write_u16(&mut buf, 16, 0);
        for i in 18..34 {
            buf[i] = 255; // extra/soil/leaf temperatures + outside humidity
        }
        for i in 34..41 {
            buf[i] = 255; // extra humidities
        }
        buf[43] = 255; // uv
        codec::write_u16(&mut buf, 44, 32767); // solar
        codec::write_i16(&mut buf, 48, -1); // no storm
        for i in 62..70 {
            buf[i] = 255; // soil moisture + leaf wetness
        }
        codec::write_u16(&mut buf, 91, 65535);
        codec::write_u16(&mut buf, 93, 65535);
        buf[95] = frame::LINE_FEED;
        buf[96] = frame::CARRIAGE_RETURN;
        crc::append(&mut buf);
        buf
    }
}
