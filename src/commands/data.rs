//! Data-plane command handlers.
//!
//! These never touch the serial transport: they serve archive queries,
//! summaries, storm and alarm history, and current-weather replay from the
//! local files, running on their own worker thread in parallel with the
//! console handler.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Value};
use tracing::{info, warn};
use vantage_console::decode::Decoder;
use vantage_sync_core::units::{SummaryPeriod, WindUnits};
use vantage_sync_core::{ProtocolError, Result};

use crate::alarm::{events_to_json, AlarmHistory};
use crate::archive::ArchiveManager;
use crate::commands::{failure, success, CommandData, CommandReceiver};
use crate::current::PacketReplay;
use crate::storm::StormArchive;

/// Command names claimed by the data worker
pub const HANDLED: &[&str] = &[
    "query-archive",
    "query-archive-statistics",
    "query-archive-summary",
    "query-storm-archive",
    "query-alarm-history",
    "query-current-weather",
    "clear-extended-archive",
];

const QUEUE_POLL: Duration = Duration::from_millis(500);
const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct DataCommandHandler {
    archive: Arc<ArchiveManager>,
    storms: Arc<StormArchive>,
    alarms: Arc<AlarmHistory>,
    replay: PacketReplay,
    decoder: Decoder,
    receiver: CommandReceiver,
    shutdown: Arc<AtomicBool>,
}

impl DataCommandHandler {
    pub fn new(
        archive: Arc<ArchiveManager>,
        storms: Arc<StormArchive>,
        alarms: Arc<AlarmHistory>,
        decoder: Decoder,
        receiver: CommandReceiver,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let replay = PacketReplay::new(archive.packet_dir());
        Self {
            archive,
            storms,
            alarms,
            replay,
            decoder,
            receiver,
            shutdown,
        }
    }

    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("data-commands".into())
            .spawn(move || self.main_loop())
    }

    fn main_loop(self) {
        info!("entering data command handler thread");
        while !self.shutdown.load(Ordering::SeqCst) {
            if let Some(command) = self.receiver.next_timeout(QUEUE_POLL) {
                let response = self.execute(&command);
                command.respond(response);
            }
        }
        info!("exiting data command handler thread");
    }

    /// Execute one data command and build its response envelope
    pub fn execute(&self, command: &CommandData) -> Value {
        let result = match command.name.as_str() {
            "query-archive" => self.query_archive(command),
            "query-archive-statistics" => self.query_archive_statistics(),
            "query-archive-summary" => self.query_archive_summary(command),
            "query-storm-archive" => self.query_storm_archive(command),
            "query-alarm-history" => self.query_alarm_history(command),
            "query-current-weather" => self.query_current_weather(command),
            "clear-extended-archive" => self.clear_extended_archive(),
            name => Err(ProtocolError::ArgumentInvalid(name.to_string())),
        };

        match result {
            Ok(data) => success(&command.name, data),
            Err(e) => failure(&command.name, &e.to_string()),
        }
    }

    fn query_archive(&self, command: &CommandData) -> Result<Option<Value>> {
        let (start, end) = time_range_arguments(command)?;
        let records = self.archive.query(start, end)?;
        let rendered: Vec<Value> = records.iter().map(|r| r.to_json(&self.decoder)).collect();
        Ok(Some(Value::Array(rendered)))
    }

    fn query_archive_statistics(&self) -> Result<Option<Value>> {
        let range = self.archive.range();
        Ok(Some(json!({
            "oldestRecordTime": range.oldest.map(|t| t.format(DATE_TIME_FORMAT).to_string()),
            "newestRecordTime": range.newest.map(|t| t.format(DATE_TIME_FORMAT).to_string()),
            "recordCount": range.count,
            "archivingActive": self.archive.is_archiving_active(),
        })))
    }

    fn query_archive_summary(&self, command: &CommandData) -> Result<Option<Value>> {
        let (start, end) = time_range_arguments(command)?;
        let period: SummaryPeriod = required_argument(command, "summary-period")?.parse()?;
        let bin_count: usize = parse_argument(command, "speed-bin-count")?;
        let bin_increment: f64 = parse_argument(command, "speed-bin-increment")?;
        let speed_units: WindUnits = required_argument(command, "speed-units")?.parse()?;
        if bin_count == 0 || bin_increment <= 0.0 {
            return Err(ProtocolError::ArgumentInvalid("speed bins".to_string()));
        }

        let records = self.archive.query(start, end)?;
        let mut buckets: BTreeMap<NaiveDate, SummaryBucket> = BTreeMap::new();
        for record in &records {
            let bucket = buckets
                .entry(bucket_start(record.date_time().date(), period))
                .or_insert_with(|| SummaryBucket::new(bin_count));
            bucket.add(record, &self.decoder, bin_increment, speed_units);
        }

        let rendered: Vec<Value> = buckets
            .iter()
            .map(|(date, bucket)| bucket.to_json(*date, period))
            .collect();
        Ok(Some(json!({
            "summaryPeriod": period.to_string(),
            "speedUnits": speed_units.to_string(),
            "summaries": rendered,
        })))
    }

    fn query_storm_archive(&self, command: &CommandData) -> Result<Option<Value>> {
        let (start, end) = time_range_arguments(command)?;
        let storms = self.storms.query(start.date(), end.date())?;
        let rendered: Vec<Value> = storms.iter().map(|s| s.to_json()).collect();
        Ok(Some(Value::Array(rendered)))
    }

    fn query_alarm_history(&self, command: &CommandData) -> Result<Option<Value>> {
        let (start, end) = time_range_arguments(command)?;
        let events = self.alarms.query(start.date(), end.date())?;
        Ok(Some(events_to_json(&events)))
    }

    fn query_current_weather(&self, command: &CommandData) -> Result<Option<Value>> {
        let hours: u32 = match command.argument("hours") {
            Some(text) => text
                .parse()
                .map_err(|_| ProtocolError::ArgumentInvalid(text.to_string()))?,
            None => 1,
        };
        let records = self.replay.query(hours, Local::now().naive_local())?;
        Ok(Some(PacketReplay::to_json(&records, &self.decoder)))
    }

    /// Back up and truncate the local extended archive. The console's own
    /// buffer is untouched; that is what clear-archive is for.
    fn clear_extended_archive(&self) -> Result<Option<Value>> {
        self.archive.consider_backup()?;
        self.archive.clear()?;
        warn!("extended archive cleared by command");
        Ok(None)
    }
}

fn required_argument<'a>(command: &'a CommandData, key: &str) -> Result<&'a str> {
    command
        .argument(key)
        .ok_or_else(|| ProtocolError::ArgumentInvalid(format!("missing {key}")))
}

fn parse_argument<T: std::str::FromStr>(command: &CommandData, key: &str) -> Result<T> {
    let text = required_argument(command, key)?;
    text.parse()
        .map_err(|_| ProtocolError::ArgumentInvalid(text.to_string()))
}

/// Parse the start-time/end-time argument pair. Accepts ISO-like date-times
/// and bare dates (which start at midnight).
fn time_range_arguments(command: &CommandData) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let start = parse_time(required_argument(command, "start-time")?)?;
    let end = parse_time(required_argument(command, "end-time")?)?;
    Ok((start, end))
}

fn parse_time(text: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, DATE_TIME_FORMAT))
        .or_else(|_| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN))
        })
        .map_err(|_| ProtocolError::ArgumentInvalid(text.to_string()))
}

/// First day of the summary bucket containing `date`
fn bucket_start(date: NaiveDate, period: SummaryPeriod) -> NaiveDate {
    match period {
        SummaryPeriod::Day => date,
        SummaryPeriod::Week => {
            date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64)
        }
        SummaryPeriod::Month => date.with_day(1).unwrap_or(date),
        SummaryPeriod::Year => date.with_ordinal(1).unwrap_or(date),
    }
}

/// Per-mph conversion factor into the requested display unit
fn speed_factor(units: WindUnits) -> f64 {
    match units {
        WindUnits::MilesPerHour => 1.0,
        WindUnits::MetersPerSecond => 0.44704,
        WindUnits::KilometersPerHour => 1.609344,
        WindUnits::Knots => 0.868976,
    }
}

struct SummaryBucket {
    record_count: u64,
    temperature_min: Option<f64>,
    temperature_max: Option<f64>,
    temperature_sum: f64,
    temperature_samples: u64,
    rainfall_total: f64,
    high_rain_rate: f64,
    barometer_sum: f64,
    barometer_samples: u64,
    speed_bins: Vec<u64>,
    wind_samples: u64,
}

impl SummaryBucket {
    fn new(bin_count: usize) -> Self {
        Self {
            record_count: 0,
            temperature_min: None,
            temperature_max: None,
            temperature_sum: 0.0,
            temperature_samples: 0,
            rainfall_total: 0.0,
            high_rain_rate: 0.0,
            barometer_sum: 0.0,
            barometer_samples: 0,
            speed_bins: vec![0; bin_count],
            wind_samples: 0,
        }
    }

    fn add(
        &mut self,
        record: &vantage_console::packets::ArchiveRecord,
        decoder: &Decoder,
        bin_increment: f64,
        speed_units: WindUnits,
    ) {
        self.record_count += 1;

        if let Some(temperature) = record.outside_temperature() {
            self.temperature_min = Some(match self.temperature_min {
                Some(min) => min.min(temperature),
                None => temperature,
            });
            self.temperature_max = Some(match self.temperature_max {
                Some(max) => max.max(temperature),
                None => temperature,
            });
            self.temperature_sum += temperature;
            self.temperature_samples += 1;
        }

        self.rainfall_total += record.rainfall(decoder);
        self.high_rain_rate = self.high_rain_rate.max(record.high_rain_rate(decoder));

        if let Some(barometer) = record.barometer() {
            self.barometer_sum += barometer;
            self.barometer_samples += 1;
        }

        if let Some(speed) = record.average_wind_speed() {
            let converted = speed * speed_factor(speed_units);
            let bin = ((converted / bin_increment) as usize).min(self.speed_bins.len() - 1);
            self.speed_bins[bin] += 1;
            self.wind_samples += 1;
        }
    }

    fn to_json(&self, start: NaiveDate, period: SummaryPeriod) -> Value {
        let mean = |sum: f64, n: u64| (n > 0).then(|| sum / n as f64);
        json!({
            "period": period.to_string(),
            "start": start.format("%Y-%m-%d").to_string(),
            "recordCount": self.record_count,
            "outsideTemperature": {
                "min": self.temperature_min,
                "mean": mean(self.temperature_sum, self.temperature_samples),
                "max": self.temperature_max,
            },
            "rainfall": self.rainfall_total,
            "highRainRate": self.high_rain_rate,
            "meanBarometer": mean(self.barometer_sum, self.barometer_samples),
            "windRose": {
                "samples": self.wind_samples,
                "bins": self.speed_bins,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_console::codec;
    use vantage_console::packets::ArchiveRecord;
    use vantage_sync_core::units::RainCollectorSize;

    fn handler(records: &[ArchiveRecord]) -> (tempfile::TempDir, DataCommandHandler) {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(ArchiveManager::open(dir.path()).unwrap());
        archive.append(records).unwrap();
        let storms = Arc::new(StormArchive::new(&dir.path().join("storms.txt")));
        let alarms = Arc::new(AlarmHistory::new(&dir.path().join("alarms.log")));
        let (_queue, receiver) = crate::commands::command_queue();
        let handler = DataCommandHandler::new(
            archive,
            storms,
            alarms,
            Decoder::with_rain_collector(RainCollectorSize::PointZeroOneInch),
            receiver,
            Arc::new(AtomicBool::new(false)),
        );
        (dir, handler)
    }

    fn command(name: &str, arguments: &[(&str, &str)]) -> CommandData {
        let (response_tx, _response_rx) = std::sync::mpsc::channel();
        CommandData {
            name: name.to_string(),
            arguments: arguments
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            response_tx,
        }
    }

    fn ts(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn record_with_temp(d: u32, h: u32, m: u32, tenths: i16) -> ArchiveRecord {
        let mut data = *ArchiveRecord::with_timestamp(ts(d, h, m)).as_bytes();
        codec::write_i16(&mut data, 4, tenths);
        ArchiveRecord::decode(&data, 0).unwrap()
    }

    #[test]
    fn archive_query_requires_time_arguments() {
        let (_dir, handler) = handler(&[]);
        let response = handler.execute(&command("query-archive", &[]));
        assert_eq!(response["result"], "failure");

        let response = handler.execute(&command(
            "query-archive",
            &[
                ("start-time", "2023-06-14T00:00:00"),
                ("end-time", "not-a-time"),
            ],
        ));
        assert_eq!(response["result"], "failure");
    }

    #[test]
    fn archive_query_returns_rendered_records() {
        let records = [
            record_with_temp(14, 8, 0, 701),
            record_with_temp(14, 8, 5, 705),
            record_with_temp(14, 8, 10, 712),
        ];
        let (_dir, handler) = handler(&records);

        let response = handler.execute(&command(
            "query-archive",
            &[
                ("start-time", "2023-06-14T08:00:00"),
                ("end-time", "2023-06-14T08:05:00"),
            ],
        ));
        assert_eq!(response["result"], "success");
        let data = response["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["outsideTemperature"], json!(70.1));
    }

    #[test]
    fn archive_statistics_reflect_the_range() {
        let records = [record_with_temp(14, 8, 0, 700), record_with_temp(14, 8, 5, 700)];
        let (_dir, handler) = handler(&records);

        let response = handler.execute(&command("query-archive-statistics", &[]));
        assert_eq!(response["result"], "success");
        assert_eq!(response["data"]["recordCount"], 2);
        assert_eq!(response["data"]["oldestRecordTime"], "2023-06-14 08:00:00");
    }

    #[test]
    fn summary_buckets_by_day() {
        let records = [
            record_with_temp(14, 8, 0, 600),
            record_with_temp(14, 20, 0, 800),
            record_with_temp(15, 8, 0, 700),
        ];
        let (_dir, handler) = handler(&records);

        let response = handler.execute(&command(
            "query-archive-summary",
            &[
                ("start-time", "2023-06-14"),
                ("end-time", "2023-06-16"),
                ("summary-period", "day"),
                ("speed-bin-count", "4"),
                ("speed-bin-increment", "5"),
                ("speed-units", "mph"),
            ],
        ));
        assert_eq!(response["result"], "success");
        let summaries = response["data"]["summaries"].as_array().unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0]["start"], "2023-06-14");
        assert_eq!(summaries[0]["recordCount"], 2);
        assert_eq!(summaries[0]["outsideTemperature"]["min"], json!(60.0));
        assert_eq!(summaries[0]["outsideTemperature"]["max"], json!(80.0));
        assert_eq!(summaries[0]["outsideTemperature"]["mean"], json!(70.0));
    }

    #[test]
    fn summary_validates_enum_arguments() {
        let (_dir, handler) = handler(&[]);
        let response = handler.execute(&command(
            "query-archive-summary",
            &[
                ("start-time", "2023-06-14"),
                ("end-time", "2023-06-16"),
                ("summary-period", "fortnight"),
                ("speed-bin-count", "4"),
                ("speed-bin-increment", "5"),
                ("speed-units", "mph"),
            ],
        ));
        assert_eq!(response["result"], "failure");
    }

    #[test]
    fn clear_extended_archive_backs_up_first() {
        let (dir, handler) = handler(&[record_with_temp(14, 8, 0, 700)]);
        let response = handler.execute(&command("clear-extended-archive", &[]));
        assert_eq!(response["result"], "success");
        assert_eq!(handler.archive.range().count, 0);
        assert!(dir.path().join("backup").exists());
    }
}
