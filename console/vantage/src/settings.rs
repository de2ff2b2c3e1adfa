//! Typed access to the console's EEPROM configuration fields.

use serde::Serialize;
use vantage_sync_core::units::{
    BarometerUnits, ElevationUnits, RainCollectorSize, RainUnits, TemperatureUnits, WindUnits,
};
use vantage_sync_core::{NamedEnum, ProtocolError, Result};

use crate::codec;
use crate::VantageConsole;

pub const EE_LATITUDE_ADDRESS: u16 = 0x0B;
pub const EE_LONGITUDE_ADDRESS: u16 = 0x0D;
pub const EE_ELEVATION_ADDRESS: u16 = 0x0F;
pub const EE_TIME_FIELDS_START_ADDRESS: u16 = 0x11;
pub const EE_STATION_LIST_ADDRESS: u16 = 0x19;
pub const EE_UNIT_BITS_ADDRESS: u16 = 0x29;
pub const EE_SETUP_BITS_ADDRESS: u16 = 0x2B;
pub const EE_ARCHIVE_PERIOD_ADDRESS: u16 = 0x2D;
/// Start of the alarm threshold block
pub const EE_ALARM_THRESHOLDS_ADDRESS: u16 = 0x52;

const LAT_LON_SCALE: f64 = 10.0;
pub const STATION_LIST_BYTES: usize = 16;

/// Display unit selections packed into the unit bits byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitsSettings {
    pub baro_units: BarometerUnits,
    pub temperature_units: TemperatureUnits,
    pub elevation_units: ElevationUnits,
    pub rain_units: RainUnits,
    pub wind_units: WindUnits,
}

impl UnitsSettings {
    pub fn from_byte(byte: u8) -> Result<Self> {
        let decode_err = ProtocolError::DecodeInvalidField("unit bits");
        Ok(Self {
            baro_units: BarometerUnits::from_raw(byte & 0x3).ok_or(decode_err)?,
            temperature_units: TemperatureUnits::from_raw((byte >> 2) & 0x3)
                .ok_or(ProtocolError::DecodeInvalidField("unit bits"))?,
            elevation_units: ElevationUnits::from_raw((byte >> 4) & 0x1)
                .ok_or(ProtocolError::DecodeInvalidField("unit bits"))?,
            rain_units: RainUnits::from_raw((byte >> 5) & 0x1)
                .ok_or(ProtocolError::DecodeInvalidField("unit bits"))?,
            wind_units: WindUnits::from_raw((byte >> 6) & 0x3)
                .ok_or(ProtocolError::DecodeInvalidField("unit bits"))?,
        })
    }

    pub fn to_byte(self) -> u8 {
        (self.baro_units.raw() & 0x3)
            | ((self.temperature_units.raw() & 0x3) << 2)
            | ((self.elevation_units.raw() & 0x1) << 4)
            | ((self.rain_units.raw() & 0x1) << 5)
            | ((self.wind_units.raw() & 0x3) << 6)
    }

    pub fn to_json(self) -> serde_json::Value {
        serde_json::json!({
            "baroUnits": self.baro_units.name(),
            "temperatureUnits": self.temperature_units.name(),
            "elevationUnits": self.elevation_units.name(),
            "rainUnits": self.rain_units.name(),
            "windUnits": self.wind_units.name(),
        })
    }
}

/// Hardware setup flags packed into the setup bits byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupBits {
    pub am_pm_time: bool,
    pub day_month_format: bool,
    pub large_wind_cup: bool,
    pub rain_collector_size: RainCollectorSize,
    pub latitude_north: bool,
    pub longitude_east: bool,
}

impl SetupBits {
    pub fn from_byte(byte: u8) -> Result<Self> {
        Ok(Self {
            am_pm_time: byte & 0x2 != 0,
            day_month_format: byte & 0x4 != 0,
            large_wind_cup: byte & 0x8 != 0,
            rain_collector_size: RainCollectorSize::from_raw((byte >> 4) & 0x3)
                .ok_or(ProtocolError::DecodeInvalidField("setup bits"))?,
            latitude_north: byte & 0x40 != 0,
            longitude_east: byte & 0x80 != 0,
        })
    }

    pub fn to_byte(self) -> u8 {
        (u8::from(self.am_pm_time) << 1)
            | (u8::from(self.day_month_format) << 2)
            | (u8::from(self.large_wind_cup) << 3)
            | ((self.rain_collector_size.raw() & 0x3) << 4)
            | (u8::from(self.latitude_north) << 6)
            | (u8::from(self.longitude_east) << 7)
    }
}

/// Console time zone configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSettings {
    pub timezone_index: u8,
    pub manual_daylight_savings: bool,
    pub daylight_savings_on: bool,
    pub gmt_offset_minutes: i16,
    pub use_gmt_offset: bool,
}

/// Station position as stored in EEPROM
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_feet: i16,
}

impl VantageConsole {
    pub fn retrieve_units_settings(&mut self) -> Result<UnitsSettings> {
        let bytes = self.eeprom_read_binary(EE_UNIT_BITS_ADDRESS, 1)?;
        UnitsSettings::from_byte(bytes[0])
    }

    /// Write the unit bits and their inverted shadow byte
    pub fn update_units_settings(&mut self, settings: UnitsSettings) -> Result<()> {
        let byte = settings.to_byte();
        self.eeprom_write_binary(EE_UNIT_BITS_ADDRESS, &[byte])?;
        self.eeprom_write_binary(EE_UNIT_BITS_ADDRESS + 1, &[!byte])
    }

    /// Read the setup bits and point the decoder at the configured rain
    /// collector, which must happen before any rain field is decoded
    pub fn retrieve_setup_bits(&mut self) -> Result<SetupBits> {
        let bytes = self.eeprom_read_binary(EE_SETUP_BITS_ADDRESS, 1)?;
        let setup = SetupBits::from_byte(bytes[0])?;
        self.decoder_mut()
            .set_rain_collector(setup.rain_collector_size);
        Ok(setup)
    }

    pub fn update_setup_bits(&mut self, setup: SetupBits) -> Result<()> {
        self.eeprom_write_binary(EE_SETUP_BITS_ADDRESS, &[setup.to_byte()])?;
        self.decoder_mut()
            .set_rain_collector(setup.rain_collector_size);
        Ok(())
    }

    pub fn retrieve_position(&mut self) -> Result<Position> {
        let bytes = self.eeprom_read_binary(EE_LATITUDE_ADDRESS, 6)?;
        Ok(Position {
            latitude: codec::read_i16(&bytes, 0) as f64 / LAT_LON_SCALE,
            longitude: codec::read_i16(&bytes, 2) as f64 / LAT_LON_SCALE,
            elevation_feet: codec::read_i16(&bytes, 4),
        })
    }

    /// Update the stored position. Elevation goes through the barometric
    /// calibration command so the console recomputes its offsets.
    pub fn update_position(&mut self, position: Position) -> Result<()> {
        let mut bytes = [0u8; 4];
        codec::write_i16(&mut bytes, 0, (position.latitude * LAT_LON_SCALE).round() as i16);
        codec::write_i16(
            &mut bytes,
            2,
            (position.longitude * LAT_LON_SCALE).round() as i16,
        );
        self.eeprom_write_binary(EE_LATITUDE_ADDRESS, &bytes)?;
        self.update_barometric_calibration(0.0, position.elevation_feet as i32)
    }

    pub fn retrieve_time_settings(&mut self) -> Result<TimeSettings> {
        let bytes = self.eeprom_read_binary(EE_TIME_FIELDS_START_ADDRESS, 6)?;
        let packed = codec::read_i16(&bytes, 3);
        Ok(TimeSettings {
            timezone_index: bytes[0].wrapping_sub(b'0'),
            manual_daylight_savings: bytes[1] == 1,
            daylight_savings_on: bytes[2] == 1,
            gmt_offset_minutes: (packed / 100) * 60 + (packed % 100),
            use_gmt_offset: bytes[5] == 1,
        })
    }

    pub fn update_time_settings(&mut self, settings: TimeSettings) -> Result<()> {
        let mut bytes = [0u8; 6];
        bytes[0] = b'0' + settings.timezone_index;
        bytes[1] = u8::from(settings.manual_daylight_savings);
        bytes[2] = u8::from(settings.daylight_savings_on);
        let packed = (settings.gmt_offset_minutes / 60) * 100 + (settings.gmt_offset_minutes % 60);
        codec::write_i16(&mut bytes, 3, packed);
        bytes[5] = u8::from(settings.use_gmt_offset);
        self.eeprom_write_binary(EE_TIME_FIELDS_START_ADDRESS, &bytes)
    }

    /// Raw two-bytes-per-channel station list used by the network model
    pub fn retrieve_station_list(&mut self) -> Result<[u8; STATION_LIST_BYTES]> {
        let bytes = self.eeprom_read_binary(EE_STATION_LIST_ADDRESS, STATION_LIST_BYTES)?;
        let mut list = [0u8; STATION_LIST_BYTES];
        list.copy_from_slice(&bytes);
        Ok(list)
    }
}
