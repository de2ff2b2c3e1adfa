//! Storm detection and the storm archive.
//!
//! The console reports a storm start date and running storm rain total in
//! every LOOP packet. A storm opens when a start date appears with rain in
//! it and closes when the start date is cleared; closed storms are appended
//! to a line-oriented archive file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDate};
use serde_json::{json, Value};
use tracing::{info, warn};
use vantage_console::packets::{Loop2Packet, LoopPacket};
use vantage_console::LoopSubscriber;
use vantage_sync_core::Result;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One completed storm interval
#[derive(Debug, Clone, PartialEq)]
pub struct StormRecord {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub total_rainfall: f64,
}

impl StormRecord {
    pub fn to_json(&self) -> Value {
        json!({
            "startDate": self.start.format(DATE_FORMAT).to_string(),
            "endDate": self.end.format(DATE_FORMAT).to_string(),
            "totalRainfall": self.total_rainfall,
        })
    }
}

/// Append-only text archive of completed storms
pub struct StormArchive {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StormArchive {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn append(&self, record: &StormRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "{} {} {:.2}",
            record.start.format(DATE_FORMAT),
            record.end.format(DATE_FORMAT),
            record.total_rainfall
        )?;
        Ok(())
    }

    /// Storms whose start date falls in `start..=end`
    pub fn query(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<StormRecord>> {
        let _guard = self.lock.lock().unwrap();
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut storms = Vec::new();
        for line in contents.lines() {
            let mut fields = line.split_whitespace();
            let record = (|| {
                let start = NaiveDate::parse_from_str(fields.next()?, DATE_FORMAT).ok()?;
                let end = NaiveDate::parse_from_str(fields.next()?, DATE_FORMAT).ok()?;
                let total_rainfall: f64 = fields.next()?.parse().ok()?;
                Some(StormRecord {
                    start,
                    end,
                    total_rainfall,
                })
            })();
            match record {
                Some(record) if record.start >= start && record.start <= end => {
                    storms.push(record)
                }
                Some(_) => {}
                None => warn!(line, "unparseable storm archive line"),
            }
        }
        Ok(storms)
    }
}

/// LOOP subscriber that opens and closes storms
pub struct StormTracker {
    archive: Arc<StormArchive>,
    current: Option<(NaiveDate, f64)>,
}

impl StormTracker {
    pub fn new(archive: Arc<StormArchive>) -> Self {
        Self {
            archive,
            current: None,
        }
    }

    /// Whether a storm is currently open
    pub fn storm_active(&self) -> bool {
        self.current.is_some()
    }

    fn observe(&mut self, packet: &LoopPacket, today: NaiveDate) {
        match (self.current, packet.storm_start) {
            (None, Some(start)) if packet.storm_rain > 0.0 => {
                info!(%start, "storm started");
                self.current = Some((start, packet.storm_rain));
            }
            (Some((start, _)), Some(_)) => {
                // Track the running total while the storm is open
                self.current = Some((start, packet.storm_rain));
            }
            (Some((start, total)), None) => {
                info!(%start, total, "storm ended");
                self.current = None;
                let record = StormRecord {
                    start,
                    end: today,
                    total_rainfall: total,
                };
                if let Err(e) = self.archive.append(&record) {
                    warn!(error = %e, "failed to append storm archive");
                }
            }
            _ => {}
        }
    }
}

impl LoopSubscriber for StormTracker {
    fn process_loop(&mut self, packet: &LoopPacket) -> bool {
        self.observe(packet, Local::now().date_naive());
        true
    }

    fn process_loop2(&mut self, _packet: &Loop2Packet) -> bool {
        true
    }
}
