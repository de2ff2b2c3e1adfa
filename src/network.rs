//! Model of the wireless sensor transmitter network.
//!
//! Built from the RECEIVERS bitmask and the EEPROM station list: each of the
//! eight channels carries a station type and optional repeater in one byte
//! and its temperature/humidity index assignments in the next. Battery state
//! comes from the LOOP transmitter bitmap, link quality from archive wind
//! sample counts.

use serde_json::{json, Value};
use vantage_console::packets::LoopPacket;
use vantage_console::settings::STATION_LIST_BYTES;
use vantage_console::VantageConsole;
use vantage_sync_core::{name_table, NamedEnum, Result};

name_table! {
    /// Transmitter types from the station list EEPROM encoding
    pub enum TransmitterType {
        IntegratedSensorStation = 0 => "iss",
        TemperatureOnly = 1 => "temperature",
        HumidityOnly = 2 => "humidity",
        TemperatureHumidity = 3 => "temperature-humidity",
        Anemometer = 4 => "anemometer",
        Rain = 5 => "rain",
        Leaf = 6 => "leaf",
        Soil = 7 => "soil",
        SoilLeaf = 8 => "soil-leaf",
        NoStation = 10 => "none",
    }
}

name_table! {
    pub enum RepeaterId {
        RepeaterA = 8 => "A",
        RepeaterB = 9 => "B",
        RepeaterC = 10 => "C",
        RepeaterD = 11 => "D",
        RepeaterE = 12 => "E",
        RepeaterF = 13 => "F",
        RepeaterG = 14 => "G",
        RepeaterH = 15 => "H",
    }
}

/// One configured transmitter slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmitter {
    pub channel: u8,
    pub transmitter_type: TransmitterType,
    pub repeater: Option<RepeaterId>,
    pub temperature_index: Option<u8>,
    pub humidity_index: Option<u8>,
    pub heard: bool,
    pub battery_good: bool,
    pub link_quality: Option<u8>,
}

impl Transmitter {
    pub fn has_anemometer(&self) -> bool {
        matches!(
            self.transmitter_type,
            TransmitterType::IntegratedSensorStation | TransmitterType::Anemometer
        )
    }

    pub fn to_json(&self) -> Value {
        json!({
            "channel": self.channel,
            "type": self.transmitter_type.name(),
            "repeater": self.repeater.map(NamedEnum::name),
            "temperatureIndex": self.temperature_index,
            "humidityIndex": self.humidity_index,
            "heard": self.heard,
            "batteryGood": self.battery_good,
            "linkQuality": self.link_quality,
        })
    }
}

/// The up-to-eight transmitter inventory
#[derive(Debug, Default)]
pub struct StationNetwork {
    transmitters: Vec<Transmitter>,
}

impl StationNetwork {
    /// Read the receiver bitmask and station list from the console and
    /// build the inventory of configured transmitters.
    pub fn discover(console: &mut VantageConsole) -> Result<Self> {
        let heard = console.retrieve_receiver_list()?;
        let list = console.retrieve_station_list()?;
        Ok(Self::from_station_list(&list, &heard))
    }

    pub fn from_station_list(list: &[u8; STATION_LIST_BYTES], heard: &[u8]) -> Self {
        let mut transmitters = Vec::new();
        for channel in 1..=8u8 {
            let config = list[(channel as usize - 1) * 2];
            let indexes = list[(channel as usize - 1) * 2 + 1];
            let Some(transmitter_type) = TransmitterType::from_raw(config & 0x0F) else {
                continue;
            };
            if transmitter_type == TransmitterType::NoStation {
                continue;
            }
            let temperature_index = match indexes & 0x0F {
                0x0F => None,
                index => Some(index),
            };
            let humidity_index = match (indexes >> 4) & 0x0F {
                0x0F => None,
                index => Some(index),
            };
            transmitters.push(Transmitter {
                channel,
                transmitter_type,
                repeater: RepeaterId::from_raw((config >> 4) & 0x0F),
                temperature_index,
                humidity_index,
                heard: heard.contains(&channel),
                battery_good: true,
                link_quality: None,
            });
        }
        Self { transmitters }
    }

    pub fn transmitters(&self) -> &[Transmitter] {
        &self.transmitters
    }

    /// Update per-transmitter battery state from a LOOP packet
    pub fn update_battery_status(&mut self, packet: &LoopPacket) {
        for transmitter in &mut self.transmitters {
            transmitter.battery_good = packet.is_transmitter_battery_good(transmitter.channel);
        }
    }

    /// Record the link quality derived from an archive record's wind sample
    /// count on the stations that carry the anemometer
    pub fn update_link_quality(&mut self, quality: Option<u8>) {
        for transmitter in &mut self.transmitters {
            if transmitter.has_anemometer() {
                transmitter.link_quality = quality;
            }
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "transmitters": self
                .transmitters
                .iter()
                .map(Transmitter::to_json)
                .collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station_list(slots: &[(usize, u8, u8)]) -> [u8; STATION_LIST_BYTES] {
        // Unconfigured slots read as "no station" with dashed indexes
        let mut list = [0u8; STATION_LIST_BYTES];
        for i in 0..8 {
            list[i * 2] = TransmitterType::NoStation.raw();
            list[i * 2 + 1] = 0xFF;
        }
        for (channel, config, indexes) in slots {
            list[(channel - 1) * 2] = *config;
            list[(channel - 1) * 2 + 1] = *indexes;
        }
        list
    }

    #[test]
    fn station_list_decodes_configured_slots() {
        // Channel 1: ISS, no repeater. Channel 3: temp/hum through repeater A.
        let list = station_list(&[(1, 0x00, 0xFF), (3, 0x83, 0x21)]);
        let network = StationNetwork::from_station_list(&list, &[1]);

        let transmitters = network.transmitters();
        assert_eq!(transmitters.len(), 2);

        let iss = &transmitters[0];
        assert_eq!(iss.channel, 1);
        assert_eq!(iss.transmitter_type, TransmitterType::IntegratedSensorStation);
        assert_eq!(iss.repeater, None);
        assert!(iss.heard);
        assert!(iss.has_anemometer());

        let th = &transmitters[1];
        assert_eq!(th.transmitter_type, TransmitterType::TemperatureHumidity);
        assert_eq!(th.repeater, Some(RepeaterId::RepeaterA));
        assert_eq!(th.temperature_index, Some(1));
        assert_eq!(th.humidity_index, Some(2));
        assert!(!th.heard);
        assert!(!th.has_anemometer());
    }

    #[test]
    fn link_quality_lands_on_anemometer_stations() {
        let list = station_list(&[(1, 0x00, 0xFF), (2, 0x03, 0x11)]);
        let mut network = StationNetwork::from_station_list(&list, &[1, 2]);
        network.update_link_quality(Some(87));

        assert_eq!(network.transmitters()[0].link_quality, Some(87));
        assert_eq!(network.transmitters()[1].link_quality, None);
    }
}
