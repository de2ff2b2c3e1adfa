//! The LOOP2 packet: derived values and short-interval wind/rain data.

use serde::Serialize;
use vantage_sync_core::{ProtocolError, Result};

use crate::abi::{frame, LOOP_PACKET_SIZE};
use crate::codec;
use crate::crc;
use crate::decode::Decoder;

pub const LOOP2_PACKET_TYPE: u8 = 1;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Loop2Packet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_direction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed_10_minute_average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed_2_minute_average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_gust_10_minute: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_gust_direction_10_minute: Option<f64>,
    pub rain_15_minute: f64,
    pub rain_hour: f64,
    pub rain_24_hour: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dew_point: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat_index: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_chill: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thsw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atm_pressure: Option<f64>,
}

impl Loop2Packet {
    /// Decode a 99-byte LOOP2 frame, same framing rules as LOOP
    pub fn decode(buffer: &[u8], decoder: &Decoder) -> Result<Self> {
        if buffer.len() != LOOP_PACKET_SIZE {
            return Err(ProtocolError::DecodeInvalidField("LOOP2 packet length"));
        }
        if &buffer[0..3] != b"LOO" {
            return Err(ProtocolError::FramingBadPrefix);
        }
        if !crc::check(buffer) {
            return Err(ProtocolError::CrcFailure);
        }
        if codec::read_u8(buffer, 4) != LOOP2_PACKET_TYPE {
            return Err(ProtocolError::DecodeInvalidField("LOOP2 packet type"));
        }
        if buffer[95] != frame::LINE_FEED || buffer[96] != frame::CARRIAGE_RETURN {
            return Err(ProtocolError::FramingBadTerminator);
        }

        Ok(Self {
            wind_speed: decoder.wind_speed(buffer, 14),
            wind_direction: decoder.wind_direction(buffer, 16),
            wind_speed_10_minute_average: decoder.avg_wind_speed(buffer, 18),
            wind_speed_2_minute_average: decoder.avg_wind_speed(buffer, 20),
            wind_gust_10_minute: decoder.wind_speed_16(buffer, 22),
            wind_gust_direction_10_minute: decoder.wind_direction(buffer, 24),
            rain_15_minute: decoder.rain(buffer, 52),
            rain_hour: decoder.rain(buffer, 54),
            rain_24_hour: decoder.rain(buffer, 58),
            dew_point: decoder.temperature_16_whole(buffer, 30),
            heat_index: decoder.temperature_16_whole(buffer, 35),
            wind_chill: decoder.temperature_16_whole(buffer, 37),
            thsw: decoder.temperature_16_whole(buffer, 39),
            atm_pressure: decoder.barometer(buffer, 65),
        })
    }
}

/// Frame fixtures shared by protocol and driver tests
#[doc(hidden)]
pub mod test_support {
    use super::*;

    /// Build a CRC-valid LOOP2 frame with every field dashed
    pub fn empty_loop2_frame() -> Vec<u8> {
        let mut buf = vec![0u8; LOOP_PACKET_SIZE - 2];
        buf[0] = b'L';
        buf[1] = b'O';
        buf[2] = b'O';
        buf[3] = b'P';
        buf[4] = LOOP2_PACKET_TYPE;
        buf[14] = 255;
        codec::write_u16(&mut buf, 16, 0);
        codec::write_u16(&mut buf, 18, 32767);
        codec::write_u16(&mut buf, 20, 32767);
        codec::write_u16(&mut buf, 24, 0);
        codec::write_i16(&mut buf, 30, 32767);
        codec::write_i16(&mut buf, 35, 32767);
        codec::write_i16(&mut buf, 37, 32767);
        codec::write_i16(&mut buf, 39, 32767);
        codec::write_u16(&mut buf, 65, 0);
        buf[95] = frame::LINE_FEED;
        buf[96] = frame::CARRIAGE_RETURN;
        crc::append(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::empty_loop2_frame;
    use super::*;

    #[test]
    fn dashed_frame_decodes_with_absent_fields() {
        let packet = Loop2Packet::decode(&empty_loop2_frame(), &Decoder::new()).unwrap();
        assert_eq!(packet.wind_speed, None);
        assert_eq!(packet.wind_speed_10_minute_average, None);
        assert_eq!(packet.dew_point, None);
        assert_eq!(packet.atm_pressure, None);
        // The 10-minute gust field has no dash value
        assert_eq!(packet.wind_gust_10_minute, Some(0.0));
    }

    #[test]
    fn derived_values_decode_whole_degrees() {
        let mut frame = empty_loop2_frame();
        frame.truncate(LOOP_PACKET_SIZE - 2);
        codec::write_i16(&mut frame, 30, 54);
        codec::write_i16(&mut frame, 37, -12);
        codec::write_u16(&mut frame, 18, 87); // 8.7 mph
        codec::write_u16(&mut frame, 22, 23);
        crc::append(&mut frame);

        let packet = Loop2Packet::decode(&frame, &Decoder::new()).unwrap();
        assert_eq!(packet.dew_point, Some(54.0));
        assert_eq!(packet.wind_chill, Some(-12.0));
        assert_eq!(packet.wind_speed_10_minute_average, Some(8.7));
        assert_eq!(packet.wind_gust_10_minute, Some(23.0));
    }

    #[test]
    fn loop_packet_type_is_rejected() {
        let mut frame = empty_loop2_frame();
        frame.truncate(LOOP_PACKET_SIZE - 2);
        frame[4] = 0;
        crc::append(&mut frame);
        assert!(Loop2Packet::decode(&frame, &Decoder::new()).is_err());
    }
}
