//! The 52-byte Rev-B archive record.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde_json::{json, Map, Value};
use vantage_sync_core::{ProtocolError, Result};

use crate::codec;
use crate::decode::Decoder;

pub const BYTES_PER_RECORD: usize = 52;
pub const REV_B_RECORD_TYPE: u8 = 0;

pub const MAX_EXTRA_TEMPERATURES: usize = 3;
pub const MAX_EXTRA_HUMIDITIES: usize = 2;
// The serial protocol document says 4, but the 4th slot is not dashed when
// no soil temperature sensors are installed.
pub const MAX_SOIL_TEMPERATURES: usize = 3;
pub const MAX_SOIL_MOISTURES: usize = 4;
pub const MAX_LEAF_WETNESSES: usize = 2;
pub const MAX_LEAF_TEMPERATURES: usize = 2;

const DATE_STAMP_OFFSET: usize = 0;
const TIME_STAMP_OFFSET: usize = 2;
const OUTSIDE_TEMPERATURE_OFFSET: usize = 4;
const HIGH_OUTSIDE_TEMPERATURE_OFFSET: usize = 6;
const LOW_OUTSIDE_TEMPERATURE_OFFSET: usize = 8;
const RAINFALL_OFFSET: usize = 10;
const HIGH_RAIN_RATE_OFFSET: usize = 12;
const BAROMETER_OFFSET: usize = 14;
const SOLAR_RADIATION_OFFSET: usize = 16;
const NUM_WIND_SAMPLES_OFFSET: usize = 18;
const INSIDE_TEMPERATURE_OFFSET: usize = 20;
const INSIDE_HUMIDITY_OFFSET: usize = 22;
const OUTSIDE_HUMIDITY_OFFSET: usize = 23;
const AVG_WIND_SPEED_OFFSET: usize = 24;
const HIGH_WIND_SPEED_OFFSET: usize = 25;
const DIR_OF_HIGH_WIND_SPEED_OFFSET: usize = 26;
const PREVAILING_WIND_DIRECTION_OFFSET: usize = 27;
const AVG_UV_INDEX_OFFSET: usize = 28;
const ET_OFFSET: usize = 29;
const HIGH_SOLAR_RADIATION_OFFSET: usize = 30;
const HIGH_UV_INDEX_OFFSET: usize = 32;
const FORECAST_RULE_OFFSET: usize = 33;
const LEAF_TEMPERATURE_BASE_OFFSET: usize = 34;
const LEAF_WETNESS_BASE_OFFSET: usize = 36;
const SOIL_TEMPERATURE_BASE_OFFSET: usize = 38;
const RECORD_TYPE_OFFSET: usize = 42;
const EXTRA_HUMIDITIES_BASE_OFFSET: usize = 43;
const EXTRA_TEMPERATURES_BASE_OFFSET: usize = 45;
const SOIL_MOISTURES_BASE_OFFSET: usize = 48;

/// One archive interval summary as stored in the console's circular buffer
/// and in the local archive file.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRecord {
    data: [u8; BYTES_PER_RECORD],
    date_time: NaiveDateTime,
    wind_sample_count: u16,
}

impl ArchiveRecord {
    /// Decode a record starting at `offset`.
    ///
    /// Fails when the packed stamps do not form a valid Gregorian date and a
    /// 24-hour time; individual dashed measurements do not fail the record.
    pub fn decode(buffer: &[u8], offset: usize) -> Result<Self> {
        if buffer.len() < offset + BYTES_PER_RECORD {
            return Err(ProtocolError::DecodeInvalidField("archive record length"));
        }
        let mut data = [0u8; BYTES_PER_RECORD];
        data.copy_from_slice(&buffer[offset..offset + BYTES_PER_RECORD]);

        let date_time = decode_stamps(
            codec::read_u16(&data, DATE_STAMP_OFFSET),
            codec::read_u16(&data, TIME_STAMP_OFFSET),
        )?;
        let wind_sample_count = codec::read_u16(&data, NUM_WIND_SAMPLES_OFFSET);

        Ok(Self {
            data,
            date_time,
            wind_sample_count,
        })
    }

    /// Whether the packet slot at `offset` holds data. Empty slots at the end
    /// of the console buffer carry zeroed date and time stamps.
    pub fn slot_contains_data(buffer: &[u8], offset: usize) -> bool {
        codec::read_u16(buffer, offset + DATE_STAMP_OFFSET) != 0
            || codec::read_u16(buffer, offset + TIME_STAMP_OFFSET) != 0
    }

    /// Build a record that carries only a timestamp, every measurement dashed.
    /// Used by archive repair tooling and tests.
    pub fn with_timestamp(date_time: NaiveDateTime) -> Self {
        let mut data = [0xFFu8; BYTES_PER_RECORD];
        codec::write_u16(&mut data, DATE_STAMP_OFFSET, encode_date_stamp(date_time.date()));
        codec::write_u16(&mut data, TIME_STAMP_OFFSET, encode_time_stamp(date_time.time()));
        // Dash the fields whose sentinel is not 0xFF
        codec::write_i16(&mut data, OUTSIDE_TEMPERATURE_OFFSET, 32767);
        codec::write_i16(&mut data, HIGH_OUTSIDE_TEMPERATURE_OFFSET, -32768);
        codec::write_i16(&mut data, LOW_OUTSIDE_TEMPERATURE_OFFSET, 32767);
        codec::write_u16(&mut data, RAINFALL_OFFSET, 0);
        codec::write_u16(&mut data, HIGH_RAIN_RATE_OFFSET, 0);
        codec::write_u16(&mut data, BAROMETER_OFFSET, 0);
        codec::write_u16(&mut data, SOLAR_RADIATION_OFFSET, 32767);
        codec::write_u16(&mut data, NUM_WIND_SAMPLES_OFFSET, 0);
        codec::write_i16(&mut data, INSIDE_TEMPERATURE_OFFSET, 32767);
        codec::write_u8(&mut data, ET_OFFSET, 0);
        codec::write_u16(&mut data, HIGH_SOLAR_RADIATION_OFFSET, 0);
        codec::write_u8(&mut data, RECORD_TYPE_OFFSET, REV_B_RECORD_TYPE);
        let date_time = date_time.with_second(0).unwrap_or(date_time);
        Self {
            data,
            date_time,
            wind_sample_count: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8; BYTES_PER_RECORD] {
        &self.data
    }

    pub fn date_time(&self) -> NaiveDateTime {
        self.date_time
    }

    pub fn wind_sample_count(&self) -> u16 {
        self.wind_sample_count
    }

    pub fn record_type(&self) -> u8 {
        codec::read_u8(&self.data, RECORD_TYPE_OFFSET)
    }

    pub fn forecast_rule(&self) -> u8 {
        codec::read_u8(&self.data, FORECAST_RULE_OFFSET)
    }

    pub fn outside_temperature(&self) -> Option<f64> {
        Decoder::new().temperature_16(&self.data, OUTSIDE_TEMPERATURE_OFFSET)
    }

    pub fn high_outside_temperature(&self) -> Option<f64> {
        Decoder::new().temperature_16_high(&self.data, HIGH_OUTSIDE_TEMPERATURE_OFFSET)
    }

    pub fn low_outside_temperature(&self) -> Option<f64> {
        Decoder::new().temperature_16(&self.data, LOW_OUTSIDE_TEMPERATURE_OFFSET)
    }

    pub fn rainfall(&self, decoder: &Decoder) -> f64 {
        decoder.rain(&self.data, RAINFALL_OFFSET)
    }

    pub fn high_rain_rate(&self, decoder: &Decoder) -> f64 {
        decoder.rain(&self.data, HIGH_RAIN_RATE_OFFSET)
    }

    pub fn barometer(&self) -> Option<f64> {
        Decoder::new().barometer(&self.data, BAROMETER_OFFSET)
    }

    pub fn solar_radiation(&self) -> Option<f64> {
        Decoder::new().solar_radiation(&self.data, SOLAR_RADIATION_OFFSET)
    }

    pub fn inside_temperature(&self) -> Option<f64> {
        Decoder::new().temperature_16(&self.data, INSIDE_TEMPERATURE_OFFSET)
    }

    pub fn inside_humidity(&self) -> Option<f64> {
        Decoder::new().humidity(&self.data, INSIDE_HUMIDITY_OFFSET)
    }

    pub fn outside_humidity(&self) -> Option<f64> {
        Decoder::new().humidity(&self.data, OUTSIDE_HUMIDITY_OFFSET)
    }

    pub fn average_wind_speed(&self) -> Option<f64> {
        Decoder::new().wind_speed(&self.data, AVG_WIND_SPEED_OFFSET)
    }

    pub fn prevailing_wind_direction(&self) -> Option<f64> {
        Decoder::new().wind_direction_slice(&self.data, PREVAILING_WIND_DIRECTION_OFFSET)
    }

    pub fn high_wind_speed(&self) -> Option<f64> {
        Decoder::new().wind_speed(&self.data, HIGH_WIND_SPEED_OFFSET)
    }

    pub fn high_wind_direction(&self) -> Option<f64> {
        Decoder::new().wind_direction_slice(&self.data, DIR_OF_HIGH_WIND_SPEED_OFFSET)
    }

    pub fn average_uv_index(&self) -> Option<f64> {
        Decoder::new().uv_index(&self.data, AVG_UV_INDEX_OFFSET)
    }

    pub fn evapotranspiration(&self) -> Option<f64> {
        Decoder::new().archive_et(&self.data, ET_OFFSET)
    }

    pub fn high_solar_radiation(&self) -> Option<f64> {
        match codec::read_u16(&self.data, HIGH_SOLAR_RADIATION_OFFSET) {
            0 => None,
            raw => Some(raw as f64),
        }
    }

    pub fn high_uv_index(&self) -> Option<f64> {
        Decoder::new().uv_index(&self.data, HIGH_UV_INDEX_OFFSET)
    }

    pub fn extra_humidity(&self, index: usize) -> Option<f64> {
        assert!(index < MAX_EXTRA_HUMIDITIES);
        Decoder::new().humidity(&self.data, EXTRA_HUMIDITIES_BASE_OFFSET + index)
    }

    pub fn extra_temperature(&self, index: usize) -> Option<f64> {
        assert!(index < MAX_EXTRA_TEMPERATURES);
        Decoder::new().temperature_8(&self.data, EXTRA_TEMPERATURES_BASE_OFFSET + index)
    }

    pub fn leaf_temperature(&self, index: usize) -> Option<f64> {
        assert!(index < MAX_LEAF_TEMPERATURES);
        Decoder::new().temperature_8(&self.data, LEAF_TEMPERATURE_BASE_OFFSET + index)
    }

    pub fn leaf_wetness(&self, index: usize) -> Option<u8> {
        assert!(index < MAX_LEAF_WETNESSES);
        Decoder::new().leaf_wetness(&self.data, LEAF_WETNESS_BASE_OFFSET + index)
    }

    pub fn soil_temperature(&self, index: usize) -> Option<f64> {
        assert!(index < MAX_SOIL_TEMPERATURES);
        Decoder::new().temperature_8(&self.data, SOIL_TEMPERATURE_BASE_OFFSET + index)
    }

    pub fn soil_moisture(&self, index: usize) -> Option<u8> {
        assert!(index < MAX_SOIL_MOISTURES);
        Decoder::new().soil_moisture(&self.data, SOIL_MOISTURES_BASE_OFFSET + index)
    }

    /// Render the record as a JSON object; dashed measurements are omitted
    pub fn to_json(&self, decoder: &Decoder) -> Value {
        let mut map = Map::new();
        map.insert(
            "time".into(),
            json!(self.date_time.format("%Y-%m-%d %H:%M").to_string()),
        );
        put(&mut map, "outsideTemperature", self.outside_temperature());
        put(
            &mut map,
            "highOutsideTemperature",
            self.high_outside_temperature(),
        );
        put(
            &mut map,
            "lowOutsideTemperature",
            self.low_outside_temperature(),
        );
        map.insert("rainfall".into(), json!(self.rainfall(decoder)));
        map.insert("highRainRate".into(), json!(self.high_rain_rate(decoder)));
        put(&mut map, "barometer", self.barometer());
        put(&mut map, "avgSolarRadiation", self.solar_radiation());
        put(&mut map, "insideTemperature", self.inside_temperature());
        put(&mut map, "insideHumidity", self.inside_humidity());
        put(&mut map, "outsideHumidity", self.outside_humidity());
        map.insert("windSampleCount".into(), json!(self.wind_sample_count));

        // Wind speed and direction are rendered together, both must be valid
        if let (Some(speed), Some(direction)) =
            (self.average_wind_speed(), self.prevailing_wind_direction())
        {
            map.insert(
                "avgWind".into(),
                json!({ "speed": speed, "direction": direction }),
            );
        }
        if let (Some(speed), Some(direction)) =
            (self.high_wind_speed(), self.high_wind_direction())
        {
            map.insert(
                "highWind".into(),
                json!({ "speed": speed, "direction": direction }),
            );
        }

        put(&mut map, "avgUvIndex", self.average_uv_index());
        put(&mut map, "evapotranspiration", self.evapotranspiration());
        put(&mut map, "highSolarRadiation", self.high_solar_radiation());
        put(&mut map, "highUvIndex", self.high_uv_index());
        map.insert("forecastRule".into(), json!(self.forecast_rule()));

        let extra_humidities: Vec<Value> = (0..MAX_EXTRA_HUMIDITIES)
            .filter_map(|i| {
                self.extra_humidity(i)
                    .map(|h| json!({ "index": i, "value": h }))
            })
            .collect();
        if !extra_humidities.is_empty() {
            map.insert("extraHumidities".into(), Value::Array(extra_humidities));
        }

        let extra_temperatures: Vec<Value> = (0..MAX_EXTRA_TEMPERATURES)
            .filter_map(|i| {
                self.extra_temperature(i)
                    .map(|t| json!({ "index": i, "value": t }))
            })
            .collect();
        if !extra_temperatures.is_empty() {
            map.insert("extraTemperatures".into(), Value::Array(extra_temperatures));
        }

        Value::Object(map)
    }
}

fn put(map: &mut Map<String, Value>, key: &str, value: Option<f64>) {
    if let Some(value) = value {
        map.insert(key.into(), json!(value));
    }
}

/// Unpack the 16-bit date and time stamps into calendar fields
fn decode_stamps(date: u16, time: u16) -> Result<NaiveDateTime> {
    let year = ((date >> 9) & 0x3F) as i32 + 2000;
    let month = ((date >> 5) & 0xF) as u32;
    let day = (date & 0x1F) as u32;
    let hour = (time / 100) as u32;
    let minute = (time % 100) as u32;

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or(ProtocolError::DecodeInvalidField("archive date stamp"))?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or(ProtocolError::DecodeInvalidField("archive time stamp"))?;
    Ok(NaiveDateTime::new(date, time))
}

pub fn encode_date_stamp(date: NaiveDate) -> u16 {
    (date.day() + (date.month() * 32) + ((date.year() as u32 - 2000) * 512)) as u16
}

pub fn encode_time_stamp(time: NaiveTime) -> u16 {
    (time.hour() * 100 + time.minute()) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn timestamp_round_trip() {
        for ts in [
            stamp(2023, 1, 1, 0, 0),
            stamp(2024, 2, 29, 23, 59),
            stamp(2031, 12, 31, 12, 30),
        ] {
            let record = ArchiveRecord::with_timestamp(ts);
            let decoded = ArchiveRecord::decode(record.as_bytes(), 0).unwrap();
            assert_eq!(decoded.date_time(), ts);
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn invalid_stamps_are_rejected() {
        let mut buf = [0u8; BYTES_PER_RECORD];
        // February 30th
        codec::write_u16(&mut buf, 0, 30 + (2 * 32) + (23 * 512));
        codec::write_u16(&mut buf, 2, 1200);
        assert!(matches!(
            ArchiveRecord::decode(&buf, 0),
            Err(ProtocolError::DecodeInvalidField(_))
        ));

        // 25:61
        let mut buf = [0u8; BYTES_PER_RECORD];
        codec::write_u16(&mut buf, 0, 14 + (6 * 32) + (23 * 512));
        codec::write_u16(&mut buf, 2, 2561);
        assert!(ArchiveRecord::decode(&buf, 0).is_err());
    }

    #[test]
    fn empty_slot_detection() {
        let buf = [0u8; BYTES_PER_RECORD];
        assert!(!ArchiveRecord::slot_contains_data(&buf, 0));
        let record = ArchiveRecord::with_timestamp(stamp(2023, 6, 14, 8, 15));
        assert!(ArchiveRecord::slot_contains_data(record.as_bytes(), 0));
    }

    #[test]
    fn synthesized_record_is_fully_dashed() {
        let record = ArchiveRecord::with_timestamp(stamp(2023, 6, 14, 8, 15));
        assert_eq!(record.outside_temperature(), None);
        assert_eq!(record.high_outside_temperature(), None);
        assert_eq!(record.barometer(), None);
        assert_eq!(record.inside_humidity(), None);
        assert_eq!(record.average_wind_speed(), None);
        assert_eq!(record.average_uv_index(), None);
        assert_eq!(record.evapotranspiration(), None);
        assert_eq!(record.wind_sample_count(), 0);
    }

    #[test]
    fn measurement_decoding_at_offsets() {
        let ts = stamp(2023, 6, 14, 8, 15);
        let mut data = *ArchiveRecord::with_timestamp(ts).as_bytes();
        codec::write_i16(&mut data, OUTSIDE_TEMPERATURE_OFFSET, 685);
        codec::write_u16(&mut data, BAROMETER_OFFSET, 30125);
        codec::write_u8(&mut data, INSIDE_HUMIDITY_OFFSET, 44);
        codec::write_u8(&mut data, AVG_WIND_SPEED_OFFSET, 7);
        codec::write_u8(&mut data, PREVAILING_WIND_DIRECTION_OFFSET, 4);
        codec::write_u16(&mut data, RAINFALL_OFFSET, 12);

        let record = ArchiveRecord::decode(&data, 0).unwrap();
        assert_eq!(record.outside_temperature(), Some(68.5));
        assert_eq!(record.barometer(), Some(30.125));
        assert_eq!(record.inside_humidity(), Some(44.0));
        assert_eq!(record.average_wind_speed(), Some(7.0));
        // Slice 4 is east
        assert_eq!(record.prevailing_wind_direction(), Some(90.0));

        let decoder =
            Decoder::with_rain_collector(vantage_sync_core::units::RainCollectorSize::PointZeroOneInch);
        assert!((record.rainfall(&decoder) - 0.12).abs() < 1e-9);

        let rendered = record.to_json(&decoder);
        assert_eq!(rendered["outsideTemperature"], json!(68.5));
        assert_eq!(rendered["avgWind"]["direction"], json!(90.0));
        assert!(rendered.get("avgUvIndex").is_none());
    }
}
