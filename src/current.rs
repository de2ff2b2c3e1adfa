//! Current weather pipeline: combines the latest LOOP and LOOP2 packets
//! into a snapshot, feeds the dominant wind tracker, and hands finished
//! snapshots to an external sink after each LOOP2.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, Local, NaiveDateTime};
use serde_json::{json, Value};
use tracing::{debug, warn};
use vantage_console::decode::Decoder;
use vantage_console::packets::{ArchiveRecord, Loop2Packet, LoopPacket};
use vantage_console::LoopSubscriber;
use vantage_sync_core::Result;

use crate::wind::DominantWindTracker;

/// Snapshot of the station's current state
#[derive(Debug, Clone, Default)]
pub struct CurrentWeather {
    pub loop_packet: Option<LoopPacket>,
    pub loop2_packet: Option<Loop2Packet>,
    pub dominant_wind_directions: Vec<&'static str>,
}

impl CurrentWeather {
    /// Merge both packets into one JSON object; LOOP2 fields win on overlap
    /// because they are the fresher derived values
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "time".into(),
            json!(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        if let Some(packet) = &self.loop_packet {
            if let Ok(Value::Object(fields)) = serde_json::to_value(packet) {
                map.extend(fields);
            }
        }
        if let Some(packet) = &self.loop2_packet {
            if let Ok(Value::Object(fields)) = serde_json::to_value(packet) {
                map.extend(fields);
            }
        }
        map.insert(
            "dominantWindDirections".into(),
            json!(self.dominant_wind_directions),
        );
        Value::Object(map)
    }
}

/// Seam to the out-of-scope publication transport (multicast in production)
pub trait CurrentWeatherSink: Send {
    fn publish(&mut self, snapshot: &CurrentWeather);
}

/// Sink that only logs, for running without a publication transport
#[derive(Default)]
pub struct TracingSink;

impl CurrentWeatherSink for TracingSink {
    fn publish(&mut self, snapshot: &CurrentWeather) {
        debug!(
            directions = ?snapshot.dominant_wind_directions,
            "current weather snapshot ready"
        );
    }
}

/// LOOP subscriber that assembles snapshots and drives the wind tracker
pub struct CurrentWeatherPublisher {
    current: CurrentWeather,
    wind: DominantWindTracker,
    sink: Box<dyn CurrentWeatherSink>,
}

impl CurrentWeatherPublisher {
    pub fn new(wind: DominantWindTracker, sink: Box<dyn CurrentWeatherSink>) -> Self {
        Self {
            current: CurrentWeather::default(),
            wind,
            sink,
        }
    }

    pub fn current(&self) -> &CurrentWeather {
        &self.current
    }

    fn feed_wind_sample(&mut self, packet: &LoopPacket, now_epoch: i64) {
        if let (Some(heading), Some(speed)) = (packet.wind_direction, packet.wind_speed) {
            self.wind.process_sample(now_epoch, heading, speed);
        }
    }
}

impl LoopSubscriber for CurrentWeatherPublisher {
    fn process_loop(&mut self, packet: &LoopPacket) -> bool {
        self.feed_wind_sample(packet, Local::now().timestamp());
        self.current.loop_packet = Some(packet.clone());
        self.current.dominant_wind_directions = self.wind.dominant_directions();
        true
    }

    fn process_loop2(&mut self, packet: &Loop2Packet) -> bool {
        self.current.loop2_packet = Some(packet.clone());
        // A LOOP2 completes one LPS iteration: publish the combined snapshot
        self.sink.publish(&self.current);
        true
    }
}

/// Replays archived packet files from `packets/YYYY/MM/DD/ap-HH-MM.dat`
pub struct PacketReplay {
    packet_dir: PathBuf,
}

impl PacketReplay {
    pub fn new(packet_dir: &Path) -> Self {
        Self {
            packet_dir: packet_dir.to_path_buf(),
        }
    }

    /// Records from the trailing `hours`, oldest first
    pub fn query(&self, hours: u32, now: NaiveDateTime) -> Result<Vec<ArchiveRecord>> {
        let earliest = now - Duration::hours(hours as i64);
        let mut records = Vec::new();

        let mut day = earliest.date();
        while day <= now.date() {
            let dir = self.packet_dir.join(day.format("%Y/%m/%d").to_string());
            day += Duration::days(1);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let bytes = match fs::read(entry.path()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(file = %entry.path().display(), error = %e, "unreadable packet file");
                        continue;
                    }
                };
                match ArchiveRecord::decode(&bytes, 0) {
                    Ok(record) if record.date_time() >= earliest && record.date_time() <= now => {
                        records.push(record)
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(file = %entry.path().display(), error = %e, "undecodable packet file")
                    }
                }
            }
        }

        records.sort_by_key(ArchiveRecord::date_time);
        Ok(records)
    }

    pub fn to_json(records: &[ArchiveRecord], decoder: &Decoder) -> Value {
        Value::Array(records.iter().map(|r| r.to_json(decoder)).collect())
    }
}
