//! The HILOWS packet: daily, monthly and yearly extremes per field.
//!
//! 436 bytes plus CRC. Day extremes carry a packed time of occurrence;
//! month and year extremes are values only. The extra temperature, soil and
//! leaf extreme blocks beyond offset 125 are not surfaced.

use chrono::NaiveTime;
use serde::Serialize;
use vantage_sync_core::{ProtocolError, Result};

use crate::abi::HILOW_PACKET_SIZE;
use crate::crc;
use crate::decode::Decoder;

/// A day extreme and the time it was observed
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DayExtreme {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
}

/// Day/month/year extremes of one direction (high or low)
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Extremes {
    pub day: DayExtreme,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<f64>,
}

/// Both directions for fields that track highs and lows
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HighLow {
    pub low: Extremes,
    pub high: Extremes,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HiLowPacket {
    pub barometer: HighLow,
    pub wind: Extremes,
    pub inside_temperature: HighLow,
    pub inside_humidity: HighLow,
    pub outside_temperature: HighLow,
    pub dew_point: HighLow,
    pub wind_chill: Extremes,
    pub heat_index: Extremes,
    pub thsw: Extremes,
    pub solar_radiation: Extremes,
    pub uv_index: Extremes,
    pub rain_rate: Extremes,
    pub high_hour_rain_rate: f64,
}

impl HiLowPacket {
    /// Decode a 438-byte HILOWS frame (436 data bytes + CRC)
    pub fn decode(buffer: &[u8], decoder: &Decoder) -> Result<Self> {
        if buffer.len() != HILOW_PACKET_SIZE {
            return Err(ProtocolError::DecodeInvalidField("HILOWS packet length"));
        }
        if !crc::check(buffer) {
            return Err(ProtocolError::CrcFailure);
        }

        let d = decoder;
        let baro = |off| d.barometer(buffer, off);
        let time = |off| d.packed_time(buffer, off);
        let whole = |off| d.temperature_16_whole(buffer, off);
        let tenths = |off| d.temperature_16(buffer, off);
        let tenths_high = |off| d.temperature_16_high(buffer, off);
        let hum = |off| d.humidity(buffer, off);

        let barometer = HighLow {
            low: Extremes {
                day: DayExtreme {
                    value: baro(0),
                    time: time(12),
                },
                month: baro(4),
                year: baro(8),
            },
            high: Extremes {
                day: DayExtreme {
                    value: baro(2),
                    time: time(14),
                },
                month: baro(6),
                year: baro(10),
            },
        };

        let wind = Extremes {
            day: DayExtreme {
                value: d.wind_speed(buffer, 16),
                time: time(17),
            },
            month: d.wind_speed(buffer, 19),
            year: d.wind_speed(buffer, 20),
        };

        let inside_temperature = HighLow {
            low: Extremes {
                day: DayExtreme {
                    value: tenths(23),
                    time: time(27),
                },
                month: tenths(29),
                year: tenths(33),
            },
            high: Extremes {
                day: DayExtreme {
                    value: tenths_high(21),
                    time: time(25),
                },
                month: tenths_high(31),
                year: tenths_high(35),
            },
        };

        let inside_humidity = HighLow {
            low: Extremes {
                day: DayExtreme {
                    value: hum(38),
                    time: time(41),
                },
                month: hum(44),
                year: hum(46),
            },
            high: Extremes {
                day: DayExtreme {
                    value: hum(37),
                    time: time(39),
                },
                month: hum(43),
                year: hum(45),
            },
        };

        let outside_temperature = HighLow {
            low: Extremes {
                day: DayExtreme {
                    value: tenths(47),
                    time: time(51),
                },
                month: tenths(57),
                year: tenths(61),
            },
            high: Extremes {
                day: DayExtreme {
                    value: tenths_high(49),
                    time: time(53),
                },
                month: tenths_high(55),
                year: tenths_high(59),
            },
        };

        let dew_point = HighLow {
            low: Extremes {
                day: DayExtreme {
                    value: whole(63),
                    time: time(67),
                },
                month: whole(73),
                year: whole(77),
            },
            high: Extremes {
                day: DayExtreme {
                    value: whole(65),
                    time: time(69),
                },
                month: whole(71),
                year: whole(75),
            },
        };

        let wind_chill = Extremes {
            day: DayExtreme {
                value: whole(79),
                time: time(81),
            },
            month: whole(83),
            year: whole(85),
        };

        let heat_index = Extremes {
            day: DayExtreme {
                value: whole(87),
                time: time(89),
            },
            month: whole(91),
            year: whole(93),
        };

        let thsw = Extremes {
            day: DayExtreme {
                value: whole(95),
                time: time(97),
            },
            month: whole(99),
            year: whole(101),
        };

        let solar = |off| match crate::codec::read_u16(buffer, off) {
            0 => None,
            raw => Some(raw as f64),
        };
        let solar_radiation = Extremes {
            day: DayExtreme {
                value: solar(103),
                time: time(105),
            },
            month: solar(107),
            year: solar(109),
        };

        let uv_index = Extremes {
            day: DayExtreme {
                value: d.uv_index(buffer, 111),
                time: time(112),
            },
            month: d.uv_index(buffer, 114),
            year: d.uv_index(buffer, 115),
        };

        let rate = |off| match crate::codec::read_u16(buffer, off) {
            0 => None,
            _ => Some(d.rain(buffer, off)),
        };
        let rain_rate = Extremes {
            day: DayExtreme {
                value: rate(116),
                time: time(118),
            },
            month: rate(122),
            year: rate(124),
        };
        let high_hour_rain_rate = d.rain(buffer, 120);

        Ok(Self {
            barometer,
            wind,
            inside_temperature,
            inside_humidity,
            outside_temperature,
            dew_point,
            wind_chill,
            heat_index,
            thsw,
            solar_radiation,
            uv_index,
            rain_rate,
            high_hour_rain_rate,
        })
    }
}
