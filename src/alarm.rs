//! Console alarm tracking.
//!
//! The console exposes 128 alarm bits in every LOOP packet; the catalog below
//! names the ones that are actually wired to thresholds in EEPROM. The
//! manager diffs each LOOP's bitmap against the previous one, opening a timed
//! event on a 0→1 transition and appending the closed event to the history
//! file on 1→0.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use tracing::{info, warn};
use vantage_console::packets::{Loop2Packet, LoopPacket};
use vantage_console::{codec, LoopSubscriber};
use vantage_sync_core::Result;

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How one alarm is wired: its LOOP bitmap bit and where its threshold
/// lives in EEPROM.
#[derive(Debug, Clone)]
pub struct AlarmProperties {
    pub name: String,
    pub bit: usize,
    pub threshold_address: u16,
    pub threshold_size: u8,
    pub threshold_scale: f64,
    pub threshold_offset: f64,
    pub not_set: u32,
}

fn alarm(
    name: &str,
    bit: usize,
    threshold_address: u16,
    threshold_size: u8,
    threshold_scale: f64,
    threshold_offset: f64,
    not_set: u32,
) -> AlarmProperties {
    AlarmProperties {
        name: name.to_string(),
        bit,
        threshold_address,
        threshold_size,
        threshold_scale,
        threshold_offset,
        not_set,
    }
}

/// Every alarm the console monitors, bound to its LOOP bitmap bit
static CATALOG: LazyLock<Vec<AlarmProperties>> = LazyLock::new(|| {
    let mut alarms = vec![
        // Byte 70: inside alarms
        alarm("falling-bar-trend", 0, 0x52, 1, 1000.0, 0.0, 255),
        alarm("rising-bar-trend", 1, 0x53, 1, 1000.0, 0.0, 255),
        alarm("low-inside-temperature", 2, 0x58, 1, 1.0, 90.0, 255),
        alarm("high-inside-temperature", 3, 0x59, 1, 1.0, 90.0, 255),
        alarm("low-inside-humidity", 4, 0x6C, 1, 1.0, 0.0, 255),
        alarm("high-inside-humidity", 5, 0x6D, 1, 1.0, 0.0, 255),
        alarm("time", 6, 0x54, 2, 1.0, 0.0, 0xFFFF),
        // Byte 71: rain alarms
        alarm("high-rain-rate", 8, 0x88, 2, 100.0, 0.0, 0xFFFF),
        alarm("fifteen-minute-rain", 9, 0x8A, 2, 100.0, 0.0, 0xFFFF),
        alarm("twenty-four-hour-rain", 10, 0x8C, 2, 100.0, 0.0, 0xFFFF),
        alarm("storm-total-rain", 11, 0x8E, 2, 100.0, 0.0, 0xFFFF),
        alarm("daily-et", 12, 0x90, 2, 1000.0, 0.0, 0xFFFF),
        // Byte 72: outside alarms
        alarm("low-outside-temperature", 16, 0x5A, 1, 1.0, 90.0, 255),
        alarm("high-outside-temperature", 17, 0x5B, 1, 1.0, 90.0, 255),
        alarm("wind-speed", 18, 0x7E, 1, 1.0, 0.0, 255),
        alarm("ten-minute-avg-wind-speed", 19, 0x7F, 1, 1.0, 0.0, 255),
        alarm("low-dew-point", 20, 0x80, 1, 1.0, 120.0, 255),
        alarm("high-dew-point", 21, 0x81, 1, 1.0, 120.0, 255),
        alarm("high-heat-index", 22, 0x84, 1, 1.0, 90.0, 255),
        alarm("low-wind-chill", 23, 0x85, 1, 1.0, 120.0, 255),
        // Byte 73: additional outside alarms
        alarm("high-thsw", 24, 0x92, 1, 1.0, 90.0, 255),
        alarm("high-solar-radiation", 25, 0x94, 2, 1.0, 0.0, 0xFFFF),
        alarm("high-uv-index", 26, 0x96, 1, 10.0, 0.0, 255),
        alarm("uv-dose", 27, 0x97, 1, 10.0, 0.0, 255),
        alarm("uv-dose-enabled", 28, 0x97, 1, 10.0, 0.0, 255),
    ];

    // Bytes 74..=81: one byte per extra temperature/humidity station
    for station in 1..=8usize {
        let base_bit = 32 + (station - 1) * 8;
        let base_addr = 0x98 + (station as u16 - 1) * 4;
        alarms.push(alarm(
            &format!("low-extra-temperature-{station}"),
            base_bit,
            base_addr,
            1,
            1.0,
            90.0,
            255,
        ));
        alarms.push(alarm(
            &format!("high-extra-temperature-{station}"),
            base_bit + 1,
            base_addr + 1,
            1,
            1.0,
            90.0,
            255,
        ));
        alarms.push(alarm(
            &format!("low-extra-humidity-{station}"),
            base_bit + 2,
            base_addr + 2,
            1,
            1.0,
            0.0,
            255,
        ));
        alarms.push(alarm(
            &format!("high-extra-humidity-{station}"),
            base_bit + 3,
            base_addr + 3,
            1,
            1.0,
            0.0,
            255,
        ));
    }

    // Bytes 96..=99 of the bitmap: leaf and soil sensors
    for sensor in 1..=4usize {
        let base_bit = 96 + (sensor - 1) * 8;
        let base_addr = 0xB8 + (sensor as u16 - 1) * 8;
        let groups = [
            ("low-leaf-wetness", 0, 1.0, 0.0),
            ("high-leaf-wetness", 1, 1.0, 0.0),
            ("low-soil-moisture", 2, 1.0, 0.0),
            ("high-soil-moisture", 3, 1.0, 0.0),
            ("low-leaf-temperature", 4, 1.0, 90.0),
            ("high-leaf-temperature", 5, 1.0, 90.0),
            ("low-soil-temperature", 6, 1.0, 90.0),
            ("high-soil-temperature", 7, 1.0, 90.0),
        ];
        for (name, offset, scale, bias) in groups {
            alarms.push(alarm(
                &format!("{name}-{sensor}"),
                base_bit + offset,
                base_addr + offset as u16,
                1,
                scale,
                bias,
                255,
            ));
        }
    }

    alarms
});

#[derive(Debug, Clone)]
struct Alarm {
    properties: &'static AlarmProperties,
    threshold: Option<f64>,
    triggered_at: Option<NaiveDateTime>,
}

/// A closed alarm event as stored in the history file
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmEvent {
    pub name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Append-only alarm event history, shared between the console thread
/// (writer) and the data thread (reader).
pub struct AlarmHistory {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AlarmHistory {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn append(&self, event: &AlarmEvent) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "{}\t{}\t{}",
            event.start.format(DATE_TIME_FORMAT),
            event.end.format(DATE_TIME_FORMAT),
            event.name
        )?;
        Ok(())
    }

    /// Events whose start date falls in `start..=end`
    pub fn query(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<AlarmEvent>> {
        let _guard = self.lock.lock().unwrap();
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for line in contents.lines() {
            let mut fields = line.split('\t');
            let event = (|| {
                let start =
                    NaiveDateTime::parse_from_str(fields.next()?, DATE_TIME_FORMAT).ok()?;
                let end = NaiveDateTime::parse_from_str(fields.next()?, DATE_TIME_FORMAT).ok()?;
                let name = fields.next()?.to_string();
                Some(AlarmEvent { name, start, end })
            })();
            match event {
                Some(event) if event.start.date() >= start && event.start.date() <= end => {
                    events.push(event)
                }
                Some(_) => {}
                None => warn!(line, "unparseable alarm history line"),
            }
        }
        Ok(events)
    }
}

/// Diffs LOOP alarm bitmaps and maintains the event history.
pub struct AlarmManager {
    alarms: Vec<Alarm>,
    history: Arc<AlarmHistory>,
}

impl AlarmManager {
    pub fn new(history: Arc<AlarmHistory>) -> Self {
        Self {
            alarms: CATALOG
                .iter()
                .map(|properties| Alarm {
                    properties,
                    threshold: None,
                    triggered_at: None,
                })
                .collect(),
            history,
        }
    }

    /// Decode the current thresholds from an EEPROM image. A threshold at
    /// its "not set" value means the alarm is disarmed on the console.
    pub fn load_thresholds(&mut self, eeprom: &[u8]) {
        for alarm in &mut self.alarms {
            let props = alarm.properties;
            let address = props.threshold_address as usize;
            if address + props.threshold_size as usize > eeprom.len() {
                continue;
            }
            let raw = match props.threshold_size {
                2 => codec::read_u16(eeprom, address) as u32,
                _ => codec::read_u8(eeprom, address) as u32,
            };
            alarm.threshold = (raw != props.not_set)
                .then(|| raw as f64 / props.threshold_scale - props.threshold_offset);
        }
    }

    /// Apply one LOOP bitmap; 0→1 transitions open events, 1→0 transitions
    /// close them and append to the history.
    pub fn apply_bitmap(&mut self, packet: &LoopPacket, now: NaiveDateTime) {
        for alarm in &mut self.alarms {
            let active = packet.alarm_bit(alarm.properties.bit);
            match (alarm.triggered_at, active) {
                (None, true) => {
                    info!(alarm = %alarm.properties.name, "alarm triggered");
                    alarm.triggered_at = Some(now);
                }
                (Some(start), false) => {
                    info!(alarm = %alarm.properties.name, "alarm cleared");
                    alarm.triggered_at = None;
                    let event = AlarmEvent {
                        name: alarm.properties.name.clone(),
                        start,
                        end: now,
                    };
                    if let Err(e) = self.history.append(&event) {
                        warn!(error = %e, "failed to append alarm history");
                    }
                }
                _ => {}
            }
        }
    }

    /// Currently triggered alarms with their start times
    pub fn active_alarms(&self) -> Vec<Value> {
        self.alarms
            .iter()
            .filter_map(|alarm| {
                alarm.triggered_at.map(|start| {
                    json!({
                        "alarm": alarm.properties.name,
                        "triggeredAt": start.format(DATE_TIME_FORMAT).to_string(),
                        "threshold": alarm.threshold,
                    })
                })
            })
            .collect()
    }
}

impl LoopSubscriber for AlarmManager {
    fn process_loop(&mut self, packet: &LoopPacket) -> bool {
        self.apply_bitmap(packet, Local::now().naive_local());
        true
    }

    fn process_loop2(&mut self, _packet: &Loop2Packet) -> bool {
        true
    }
}

/// Render alarm history events for the JSON surface
pub fn events_to_json(events: &[AlarmEvent]) -> Value {
    Value::Array(
        events
            .iter()
            .map(|event| {
                json!({
                    "alarm": event.name,
                    "start": event.start.format(DATE_TIME_FORMAT).to_string(),
                    "end": event.end.format(DATE_TIME_FORMAT).to_string(),
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_console::decode::Decoder;
    use vantage_console::packets::loop_packet::test_support::empty_loop_frame;
    use vantage_console::{abi, crc};

    fn packet_with_alarm_bytes(bytes: &[(usize, u8)]) -> LoopPacket {
        let mut frame = empty_loop_frame();
        frame.truncate(abi::LOOP_PACKET_SIZE - 2);
        for (offset, value) in bytes {
            frame[70 + offset] = *value;
        }
        crc::append(&mut frame);
        LoopPacket::decode(&frame, &Decoder::new()).unwrap()
    }

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn catalog_covers_the_documented_alarms() {
        assert_eq!(CATALOG.len(), 89);
        assert!(CATALOG.iter().all(|a| a.bit < 128));
        // Bits are unique
        let mut bits: Vec<usize> = CATALOG.iter().map(|a| a.bit).collect();
        bits.sort_unstable();
        bits.dedup();
        assert_eq!(bits.len(), 89);
    }

    #[test]
    fn transitions_open_and_close_events() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(AlarmHistory::new(&dir.path().join("alarms.log")));
        let mut manager = AlarmManager::new(history.clone());

        // high-rain-rate is bit 8, the first bit of byte 71
        manager.apply_bitmap(&packet_with_alarm_bytes(&[(1, 0x01)]), ts(8, 0));
        assert_eq!(manager.active_alarms().len(), 1);

        // Still set: no new event
        manager.apply_bitmap(&packet_with_alarm_bytes(&[(1, 0x01)]), ts(8, 5));
        assert_eq!(manager.active_alarms().len(), 1);

        // Cleared: the event lands in the history
        manager.apply_bitmap(&packet_with_alarm_bytes(&[]), ts(8, 10));
        assert!(manager.active_alarms().is_empty());

        let events = history
            .query(
                NaiveDate::from_ymd_opt(2023, 6, 14).unwrap(),
                NaiveDate::from_ymd_opt(2023, 6, 14).unwrap(),
            )
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "high-rain-rate");
        assert_eq!(events[0].start, ts(8, 0));
        assert_eq!(events[0].end, ts(8, 10));
    }

    #[test]
    fn history_query_filters_by_date() {
        let dir = tempfile::tempdir().unwrap();
        let history = AlarmHistory::new(&dir.path().join("alarms.log"));
        history
            .append(&AlarmEvent {
                name: "wind-speed".into(),
                start: ts(8, 0),
                end: ts(8, 30),
            })
            .unwrap();

        let hit = history
            .query(
                NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(),
            )
            .unwrap();
        assert_eq!(hit.len(), 1);

        let miss = history
            .query(
                NaiveDate::from_ymd_opt(2023, 7, 1).unwrap(),
                NaiveDate::from_ymd_opt(2023, 7, 31).unwrap(),
            )
            .unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn thresholds_decode_with_scale_and_bias() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(AlarmHistory::new(&dir.path().join("alarms.log")));
        let mut manager = AlarmManager::new(history);

        let mut eeprom = vec![0xFFu8; 4096];
        eeprom[0x5B] = 185; // high outside temperature: 185 - 90 = 95 F
        manager.load_thresholds(&eeprom);

        let alarm = manager
            .alarms
            .iter()
            .find(|a| a.properties.name == "high-outside-temperature")
            .unwrap();
        assert_eq!(alarm.threshold, Some(95.0));

        // Everything else is at the not-set sentinel
        let other = manager
            .alarms
            .iter()
            .find(|a| a.properties.name == "low-inside-temperature")
            .unwrap();
        assert_eq!(other.threshold, None);
    }
}
