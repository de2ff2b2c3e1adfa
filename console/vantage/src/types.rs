//! Console-level type definitions.

use serde::Serialize;
use vantage_sync_core::{ProtocolError, Result};

/// Barometric pressure trend reported in LOOP byte 3.
/// The console sends ASCII 'P' (0x50) when no trend is available yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BaroTrend {
    FallingRapidly,
    FallingSlowly,
    Steady,
    RisingSlowly,
    RisingRapidly,
}

impl BaroTrend {
    pub fn from_raw(raw: u8) -> Result<Option<Self>> {
        match raw as i8 {
            -60 => Ok(Some(BaroTrend::FallingRapidly)),
            -20 => Ok(Some(BaroTrend::FallingSlowly)),
            0 => Ok(Some(BaroTrend::Steady)),
            20 => Ok(Some(BaroTrend::RisingSlowly)),
            60 => Ok(Some(BaroTrend::RisingRapidly)),
            _ if raw == b'P' => Ok(None),
            _ => Err(ProtocolError::DecodeInvalidField("barometer trend")),
        }
    }
}

/// Forecast icon bitmap from LOOP byte 89
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForecastIcon {
    MostlyClear,
    PartlyCloudy,
    MostlyCloudy,
    MostlyCloudyChanceOfRain,
    MostlyCloudyChanceOfSnow,
    MostlyCloudyChanceOfRainOrSnow,
    PartlyCloudyChanceOfRain,
    PartlyCloudyChanceOfSnow,
    PartlyCloudyChanceOfRainOrSnow,
}

impl ForecastIcon {
    const RAIN: u8 = 0x1;
    const CLOUDY: u8 = 0x2;
    const PARTLY_CLOUDY: u8 = 0x4;
    const SUNNY: u8 = 0x8;
    const SNOW: u8 = 0x10;

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            r if r == Self::SUNNY => Some(ForecastIcon::MostlyClear),
            r if r == Self::PARTLY_CLOUDY | Self::CLOUDY => Some(ForecastIcon::PartlyCloudy),
            r if r == Self::CLOUDY => Some(ForecastIcon::MostlyCloudy),
            r if r == Self::CLOUDY | Self::RAIN => Some(ForecastIcon::MostlyCloudyChanceOfRain),
            r if r == Self::CLOUDY | Self::SNOW => Some(ForecastIcon::MostlyCloudyChanceOfSnow),
            r if r == Self::CLOUDY | Self::RAIN | Self::SNOW => {
                Some(ForecastIcon::MostlyCloudyChanceOfRainOrSnow)
            }
            r if r == Self::PARTLY_CLOUDY | Self::RAIN => {
                Some(ForecastIcon::PartlyCloudyChanceOfRain)
            }
            r if r == Self::PARTLY_CLOUDY | Self::SNOW => {
                Some(ForecastIcon::PartlyCloudyChanceOfSnow)
            }
            r if r == Self::PARTLY_CLOUDY | Self::RAIN | Self::SNOW => {
                Some(ForecastIcon::PartlyCloudyChanceOfRainOrSnow)
            }
            _ => None,
        }
    }
}

/// Console family reported by the WRD command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StationType {
    VantagePro2,
    VantageVue,
    Unknown,
}

impl StationType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            16 => StationType::VantagePro2,
            17 => StationType::VantageVue,
            _ => StationType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StationType::VantagePro2 => "Vantage Pro2",
            StationType::VantageVue => "Vantage Vue",
            StationType::Unknown => "Unknown",
        }
    }
}

/// Radio reception counters from the RXCHECK report
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleDiagnostics {
    pub packet_count: i32,
    pub missed_packet_count: i32,
    pub resync_count: i32,
    pub max_packet_sequence: i32,
    pub crc_error_count: i32,
}

impl ConsoleDiagnostics {
    /// Parse the five whitespace-separated counters of an RXCHECK reply
    pub fn parse(report: &str) -> Result<Self> {
        let mut fields = report.split_whitespace().map(str::parse::<i32>);
        let mut next = || {
            fields
                .next()
                .and_then(|f| f.ok())
                .ok_or(ProtocolError::DecodeInvalidField("console diagnostics"))
        };
        Ok(Self {
            packet_count: next()?,
            missed_packet_count: next()?,
            resync_count: next()?,
            max_packet_sequence: next()?,
            crc_error_count: next()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baro_trend_values() {
        assert_eq!(
            BaroTrend::from_raw(196).unwrap(),
            Some(BaroTrend::FallingRapidly)
        );
        assert_eq!(BaroTrend::from_raw(0).unwrap(), Some(BaroTrend::Steady));
        assert_eq!(BaroTrend::from_raw(b'P').unwrap(), None);
        assert!(BaroTrend::from_raw(42).is_err());
    }

    #[test]
    fn forecast_icon_bit_combinations() {
        assert_eq!(ForecastIcon::from_raw(0x08), Some(ForecastIcon::MostlyClear));
        assert_eq!(
            ForecastIcon::from_raw(0x06),
            Some(ForecastIcon::PartlyCloudy)
        );
        assert_eq!(
            ForecastIcon::from_raw(0x13),
            Some(ForecastIcon::MostlyCloudyChanceOfRainOrSnow)
        );
        assert_eq!(
            ForecastIcon::from_raw(0x15),
            Some(ForecastIcon::PartlyCloudyChanceOfRainOrSnow)
        );
        assert_eq!(ForecastIcon::from_raw(0x40), None);
    }

    #[test]
    fn station_types() {
        assert_eq!(StationType::from_raw(16), StationType::VantagePro2);
        assert_eq!(StationType::from_raw(17), StationType::VantageVue);
        assert_eq!(StationType::from_raw(3), StationType::Unknown);
    }

    #[test]
    fn diagnostics_report_parses() {
        let report = ConsoleDiagnostics::parse("21629 15 0 3204 128").unwrap();
        assert_eq!(report.packet_count, 21629);
        assert_eq!(report.missed_packet_count, 15);
        assert_eq!(report.crc_error_count, 128);
        assert!(ConsoleDiagnostics::parse("1 2 three").is_err());
    }
}
