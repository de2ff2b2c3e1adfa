//! Local archive of console records.
//!
//! The archive file is a raw concatenation of 52-byte Rev-B records with no
//! header: record `i` lives at byte offset `i * 52` and records are strictly
//! increasing in time (the append filter guarantees it). All file access is
//! serialized through the manager's internal mutex; the console thread
//! appends while the data thread queries.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Duration, Local, NaiveDateTime};
use tracing::{debug, error, info, warn};
use vantage_console::packets::archive::BYTES_PER_RECORD;
use vantage_console::packets::ArchiveRecord;
use vantage_console::VantageConsole;
use vantage_sync_core::{ProtocolError, Result};

pub const ARCHIVE_FILE_NAME: &str = "weather-archive.dat";
const BACKUP_DIR: &str = "backup";
const PACKET_SAVE_DIR: &str = "packets";
const VERIFY_LOG: &str = "archive-verify.log";
const BACKUP_RETAIN_DAYS: i64 = 30;
const SYNC_RETRIES: usize = 5;
/// Consecutive delta mismatches that re-baseline the expected interval
const DELTA_MISMATCH_TOLERANCE: u32 = 2;

/// Time span covered by the archive file
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveRange {
    pub oldest: Option<NaiveDateTime>,
    pub newest: Option<NaiveDateTime>,
    pub count: u64,
}

/// Result of a verification scan
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyReport {
    pub records: u64,
    pub errors: u32,
    pub warnings: u32,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.errors == 0 && self.warnings == 0
    }
}

#[derive(Default)]
struct State {
    oldest: Option<NaiveDateTime>,
    newest: Option<NaiveDateTime>,
    count: u64,
    next_backup: Option<NaiveDateTime>,
    archive_period_minutes: u32,
    archiving_active: bool,
}

pub struct ArchiveManager {
    archive_file: PathBuf,
    packet_dir: PathBuf,
    backup_dir: PathBuf,
    verify_log: PathBuf,
    state: Mutex<State>,
}

impl ArchiveManager {
    /// Open (or create) the archive under `data_dir` and establish its
    /// time range from the first and last records.
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let manager = Self {
            archive_file: data_dir.join(ARCHIVE_FILE_NAME),
            packet_dir: data_dir.join(PACKET_SAVE_DIR),
            backup_dir: data_dir.join(BACKUP_DIR),
            verify_log: data_dir.join(VERIFY_LOG),
            state: Mutex::new(State::default()),
        };
        if !manager.archive_file.exists() {
            File::create(&manager.archive_file)?;
        }
        manager.find_time_range()?;
        Ok(manager)
    }

    pub fn archive_file(&self) -> &Path {
        &self.archive_file
    }

    pub fn packet_dir(&self) -> &Path {
        &self.packet_dir
    }

    pub fn range(&self) -> ArchiveRange {
        let state = self.state.lock().unwrap();
        ArchiveRange {
            oldest: state.oldest,
            newest: state.newest,
            count: state.count,
        }
    }

    /// The archive period is needed to judge whether archiving is active
    pub fn set_archive_period(&self, minutes: u32) {
        self.state.lock().unwrap().archive_period_minutes = minutes;
    }

    pub fn is_archiving_active(&self) -> bool {
        self.state.lock().unwrap().archiving_active
    }

    /// Append records that are strictly newer than the newest on file.
    /// Accepted records are also materialised as standalone packet files
    /// for offline replay. Returns the number written.
    pub fn append(&self, records: &[ArchiveRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock().unwrap();
        let mut file = OpenOptions::new().append(true).open(&self.archive_file)?;

        let mut appended = 0;
        for record in records {
            if state.newest.is_some_and(|newest| record.date_time() <= newest) {
                info!(time = %record.date_time(), "skipping archive of stale record");
                continue;
            }
            file.write_all(record.as_bytes())?;
            state.newest = Some(record.date_time());
            state.oldest.get_or_insert(record.date_time());
            state.count += 1;
            appended += 1;
            debug!(time = %record.date_time(), "archived record");
            if let Err(e) = self.save_packet_file(record) {
                error!(error = %e, "failed to save replay packet file");
            }
        }
        file.sync_data()?;

        Self::refresh_archiving_active(&mut state);
        Ok(appended)
    }

    /// Records with `start <= time <= end`, located with a ratio seek plus
    /// a bounded linear scan.
    pub fn query(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ArchiveRecord>> {
        let state = self.state.lock().unwrap();
        let (Some(oldest), Some(newest)) = (state.oldest, state.newest) else {
            return Ok(Vec::new());
        };
        if start > newest || end < oldest {
            return Ok(Vec::new());
        }
        let count = state.count;
        let mut file = File::open(&self.archive_file)?;

        // Interpolate the expected position from the archive's time range,
        // then correct with linear scans. Correct because record times are
        // monotone in file order.
        let mut index = if start <= oldest || count < 2 {
            0
        } else {
            let span = (newest - oldest).num_seconds().max(1) as f64;
            let delta = (start - oldest).num_seconds() as f64;
            let guess = ((count - 1) as f64 * (delta / span)).round() as u64;
            guess.min(count - 1)
        };

        while index < count && Self::record_at(&mut file, index)?.date_time() < start {
            index += 1;
        }
        while index > 0 && Self::record_at(&mut file, index - 1)?.date_time() >= start {
            index -= 1;
        }

        let mut records = Vec::new();
        while index < count {
            let record = Self::record_at(&mut file, index)?;
            if record.date_time() > end {
                break;
            }
            records.push(record);
            index += 1;
        }
        debug!(count = records.len(), %start, %end, "archive query");
        Ok(records)
    }

    pub fn newest_record(&self) -> Result<Option<ArchiveRecord>> {
        let state = self.state.lock().unwrap();
        if state.count == 0 {
            return Ok(None);
        }
        let mut file = File::open(&self.archive_file)?;
        Ok(Some(Self::record_at(&mut file, state.count - 1)?))
    }

    /// Pull everything newer than the local archive from the console and
    /// append it. Considers a daily backup afterwards.
    pub fn synchronize(&self, console: &mut VantageConsole) -> Result<usize> {
        info!("synchronizing local archive from the console");
        let newest = self.state.lock().unwrap().newest;

        let mut last_err = ProtocolError::ProtocolAbort;
        let mut appended = None;
        for _ in 0..SYNC_RETRIES {
            let result = console
                .wakeup()
                .and_then(|()| console.dump_after(newest))
                .and_then(|records| self.append(&records));
            match result {
                Ok(count) => {
                    appended = Some(count);
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "archive synchronization attempt failed");
                    last_err = e;
                }
            }
        }

        if let Err(e) = self.consider_backup() {
            warn!(error = %e, "archive backup failed");
        }

        appended.ok_or(last_err)
    }

    /// Copy the archive into the backup directory at most once per day and
    /// delete backups past the retention window.
    pub fn consider_backup(&self) -> Result<bool> {
        let now = Local::now().naive_local();
        {
            let mut state = self.state.lock().unwrap();
            if state.next_backup.is_some_and(|next| now < next) {
                return Ok(false);
            }
            state.next_backup = Some(now + Duration::days(1));
        }

        fs::create_dir_all(&self.backup_dir)?;
        let backup_file = self
            .backup_dir
            .join(format!("{}_{}", now.format("%Y-%m-%d"), ARCHIVE_FILE_NAME));
        {
            let _guard = self.state.lock().unwrap();
            fs::copy(&self.archive_file, &backup_file)?;
        }
        info!(backup = %backup_file.display(), "backed up archive file");

        self.trim_backup_directory(now);
        Ok(true)
    }

    fn trim_backup_directory(&self, now: NaiveDateTime) {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to open archive backup directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            // Backup names start with the year, good until the year 3000
            if !name.to_string_lossy().starts_with('2') {
                continue;
            }
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .map(chrono::DateTime::<Local>::from)
                .is_some_and(|mtime| {
                    mtime.naive_local() + Duration::days(BACKUP_RETAIN_DAYS) < now
                });
            if expired {
                info!(file = %entry.path().display(), "deleting expired archive backup");
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(error = %e, "failed to delete archive backup");
                }
            }
        }
    }

    pub fn backup_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        if self.backup_dir.exists() {
            for entry in fs::read_dir(&self.backup_dir)?.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('2') {
                    files.push(name);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Replace the archive with a backup. The current file is preserved as
    /// a save file; a failed copy moves it back.
    pub fn restore(&self, backup_name: &str) -> Result<()> {
        let backup_file = self.backup_dir.join(backup_name);
        let save_file = self.backup_dir.join(format!(
            "save_{}_{}",
            Local::now().format("%Y-%m-%d"),
            ARCHIVE_FILE_NAME
        ));

        {
            let _guard = self.state.lock().unwrap();
            fs::rename(&self.archive_file, &save_file)?;
            if let Err(e) = fs::copy(&backup_file, &self.archive_file) {
                error!(error = %e, "failed to restore archive backup, moving save file back");
                fs::rename(&save_file, &self.archive_file)?;
                return Err(e.into());
            }
        }
        self.find_time_range()
    }

    /// Truncate the archive. Only meaningful after a backup.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        File::create(&self.archive_file)?;
        state.oldest = None;
        state.newest = None;
        state.count = 0;
        state.archiving_active = false;
        Ok(())
    }

    /// Verify the current archive, appending the outcome to the verify log
    pub fn verify(&self) -> Result<VerifyReport> {
        let report = {
            let _guard = self.state.lock().unwrap();
            Self::verify_file(&self.archive_file)?
        };
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.verify_log)?;
        writeln!(
            log,
            "{} verified {}: {} records, {} errors, {} warnings",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.archive_file.display(),
            report.records,
            report.errors,
            report.warnings
        )?;
        Ok(report)
    }

    /// Sequential scan of an archive file. Out-of-order records are errors;
    /// inconsistent inter-record deltas are warnings until three consecutive
    /// mismatches re-baseline the expected delta, which absorbs archive
    /// period changes and the spring-forward DST jump.
    pub fn verify_file(path: &Path) -> Result<VerifyReport> {
        let mut file = File::open(path)?;
        let mut report = VerifyReport::default();
        let mut buffer = [0u8; BYTES_PER_RECORD];
        let mut last_time: Option<NaiveDateTime> = None;
        let mut last_delta: Option<i64> = None;
        let mut mismatch_run = 0u32;

        loop {
            match file.read_exact(&mut buffer) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            report.records += 1;

            let record = match ArchiveRecord::decode(&buffer, 0) {
                Ok(record) => record,
                Err(e) => {
                    warn!(record = report.records, error = %e, "undecodable archive record");
                    report.errors += 1;
                    continue;
                }
            };
            let time = record.date_time();

            if let Some(last) = last_time {
                if time <= last {
                    warn!(record = report.records, %time, %last, "out of order archive records");
                    report.errors += 1;
                }

                let delta = (time - last).num_seconds();
                if report.records == 2 {
                    last_delta = Some(delta);
                } else if last_delta != Some(delta) {
                    debug!(
                        record = report.records,
                        expected = last_delta.unwrap_or(0),
                        actual = delta,
                        "inconsistent archive record time delta"
                    );
                    report.warnings += 1;
                    mismatch_run += 1;
                    if mismatch_run > DELTA_MISMATCH_TOLERANCE {
                        last_delta = Some(delta);
                        mismatch_run = 0;
                    }
                } else {
                    mismatch_run = 0;
                }
            }
            last_time = Some(time);
        }
        Ok(report)
    }

    fn record_at(file: &mut File, index: u64) -> Result<ArchiveRecord> {
        let mut buffer = [0u8; BYTES_PER_RECORD];
        file.seek(SeekFrom::Start(index * BYTES_PER_RECORD as u64))?;
        file.read_exact(&mut buffer)?;
        ArchiveRecord::decode(&buffer, 0)
    }

    fn find_time_range(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let size = fs::metadata(&self.archive_file)?.len();
        state.count = size / BYTES_PER_RECORD as u64;
        if state.count == 0 {
            state.oldest = None;
            state.newest = None;
            state.archiving_active = false;
            return Ok(());
        }
        let mut file = File::open(&self.archive_file)?;
        state.oldest = Some(Self::record_at(&mut file, 0)?.date_time());
        state.newest = Some(Self::record_at(&mut file, state.count - 1)?.date_time());
        Self::refresh_archiving_active(&mut state);
        Ok(())
    }

    fn refresh_archiving_active(state: &mut State) {
        state.archiving_active = match (state.newest, state.archive_period_minutes) {
            (Some(newest), minutes) if minutes > 0 => {
                let horizon = Local::now().naive_local() - Duration::minutes(minutes as i64);
                newest > horizon
            }
            _ => false,
        };
    }

    /// One record per file under packets/YYYY/MM/DD/ap-HH-MM.dat
    fn save_packet_file(&self, record: &ArchiveRecord) -> Result<()> {
        let ts = record.date_time();
        let dir = self.packet_dir.join(ts.format("%Y/%m/%d").to_string());
        fs::create_dir_all(&dir)?;
        let path = dir.join(ts.format("ap-%H-%M.dat").to_string());
        fs::write(path, record.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use vantage_console::transport::testing::ScriptedConnection;
    use vantage_console::{codec, crc, packets};

    fn ts(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn record(d: u32, h: u32, m: u32) -> ArchiveRecord {
        ArchiveRecord::with_timestamp(ts(d, h, m))
    }

    fn manager_with(records: &[ArchiveRecord]) -> (tempfile::TempDir, ArchiveManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArchiveManager::open(dir.path()).unwrap();
        manager.append(records).unwrap();
        (dir, manager)
    }

    #[test]
    fn append_keeps_records_monotone() {
        let (_dir, manager) = manager_with(&[record(14, 8, 0), record(14, 8, 5)]);
        // Stale and duplicate records are filtered
        let appended = manager
            .append(&[record(14, 8, 5), record(14, 7, 0), record(14, 8, 10)])
            .unwrap();
        assert_eq!(appended, 1);

        let range = manager.range();
        assert_eq!(range.count, 3);
        assert_eq!(range.oldest, Some(ts(14, 8, 0)));
        assert_eq!(range.newest, Some(ts(14, 8, 10)));
    }

    #[test]
    fn append_materialises_replay_packet_files() {
        let (_dir, manager) = manager_with(&[record(14, 8, 5)]);
        let packet = manager.packet_dir().join("2023/06/14/ap-08-05.dat");
        assert!(packet.exists());
        assert_eq!(
            fs::read(packet).unwrap().len(),
            BYTES_PER_RECORD
        );
    }

    #[test]
    fn query_returns_inclusive_time_range() {
        let records: Vec<ArchiveRecord> = (0..12).map(|i| record(14, 8 + i / 12, (i % 12) * 5)).collect();
        let (_dir, manager) = manager_with(&records);

        let result = manager.query(ts(14, 8, 10), ts(14, 8, 30)).unwrap();
        assert_eq!(result.len(), 5);
        assert_eq!(result[0].date_time(), ts(14, 8, 10));
        assert_eq!(result[4].date_time(), ts(14, 8, 30));
    }

    #[test]
    fn query_boundaries() {
        let records: Vec<ArchiveRecord> = (0..6).map(|i| record(14, 8, i * 5)).collect();
        let (_dir, manager) = manager_with(&records);

        // start before the oldest record begins at offset zero
        let result = manager.query(ts(13, 0, 0), ts(14, 8, 7)).unwrap();
        assert_eq!(result.len(), 2);

        // start after the newest record is empty
        assert!(manager.query(ts(14, 9, 0), ts(14, 10, 0)).unwrap().is_empty());

        // whole-range query returns everything
        assert_eq!(manager.query(ts(13, 0, 0), ts(15, 0, 0)).unwrap().len(), 6);
    }

    #[test]
    fn synchronize_appends_console_records() {
        let t0 = ts(14, 8, 0);
        let (_dir, manager) = manager_with(&[record(14, 8, 0)]);

        // One page of five records, 5 minutes apart, starting after t0
        let records: Vec<ArchiveRecord> = (1..=5)
            .map(|i| ArchiveRecord::with_timestamp(t0 + Duration::minutes(i * 5)))
            .collect();
        let mut page = vec![0u8; 265];
        for (i, r) in records.iter().enumerate() {
            let offset = 1 + i * BYTES_PER_RECORD;
            page[offset..offset + BYTES_PER_RECORD].copy_from_slice(r.as_bytes());
        }
        crc::append(&mut page);

        let mut stamp_payload = vec![0u8; 4];
        codec::write_u16(
            &mut stamp_payload,
            0,
            packets::archive::encode_date_stamp(t0.date()),
        );
        codec::write_u16(
            &mut stamp_payload,
            2,
            packets::archive::encode_time_stamp(t0.time()),
        );
        crc::append(&mut stamp_payload);

        let mut page_count_reply = vec![0u8; 4];
        codec::write_u16(&mut page_count_reply, 0, 1);
        crc::append(&mut page_count_reply);
        let mut reply = vec![0x06];
        reply.extend_from_slice(&page_count_reply);

        let script = ScriptedConnection::new()
            .expect(b"\n", b"\n\r")
            .expect(b"DMPAFT\n", [0x06])
            .expect(stamp_payload, reply)
            .expect([0x06], page)
            .expect([0x06], []);
        let mut console = VantageConsole::new(Box::new(script));

        let appended = manager.synchronize(&mut console).unwrap();
        assert_eq!(appended, 5);

        let range = manager.range();
        assert_eq!(range.count, 6);
        assert_eq!(range.oldest, Some(t0));
        assert_eq!(range.newest, Some(t0 + Duration::minutes(25)));
    }

    #[test]
    fn verify_flags_out_of_order_records() {
        // DST fall-back produces a repeated timestamp, which is an error
        let dir = tempfile::tempdir().unwrap();
        let manager = ArchiveManager::open(dir.path()).unwrap();
        let mut bytes = Vec::new();
        for r in [record(14, 1, 55), record(14, 1, 55), record(14, 2, 0)] {
            bytes.extend_from_slice(r.as_bytes());
        }
        fs::write(manager.archive_file(), bytes).unwrap();

        let report = ArchiveManager::verify_file(manager.archive_file()).unwrap();
        assert_eq!(report.records, 3);
        assert_eq!(report.errors, 1);
    }

    #[test]
    fn verify_rebaselines_after_three_mismatches() {
        // Archive period change: 5 minute deltas become 10 minute deltas.
        // Three consecutive mismatches re-baseline, later records are clean.
        let dir = tempfile::tempdir().unwrap();
        let manager = ArchiveManager::open(dir.path()).unwrap();
        let times = [
            ts(14, 8, 0),
            ts(14, 8, 5),
            ts(14, 8, 10),
            ts(14, 8, 20),
            ts(14, 8, 30),
            ts(14, 8, 40),
            ts(14, 8, 50),
            ts(14, 9, 0),
        ];
        let mut bytes = Vec::new();
        for t in times {
            bytes.extend_from_slice(ArchiveRecord::with_timestamp(t).as_bytes());
        }
        fs::write(manager.archive_file(), bytes).unwrap();

        let report = ArchiveManager::verify_file(manager.archive_file()).unwrap();
        assert_eq!(report.errors, 0);
        assert_eq!(report.warnings, 3);
    }

    #[test]
    fn verify_tolerates_spring_forward_jump() {
        // One 65-minute gap at the spring-forward transition is a single
        // warning, never an error
        let dir = tempfile::tempdir().unwrap();
        let manager = ArchiveManager::open(dir.path()).unwrap();
        let times = [
            ts(14, 1, 50),
            ts(14, 1, 55),
            ts(14, 3, 0),
            ts(14, 3, 5),
            ts(14, 3, 10),
        ];
        let mut bytes = Vec::new();
        for t in times {
            bytes.extend_from_slice(ArchiveRecord::with_timestamp(t).as_bytes());
        }
        fs::write(manager.archive_file(), bytes).unwrap();

        let report = ArchiveManager::verify_file(manager.archive_file()).unwrap();
        assert_eq!(report.errors, 0);
        assert_eq!(report.warnings, 1);
    }

    #[test]
    fn clear_resets_the_range() {
        let (_dir, manager) = manager_with(&[record(14, 8, 0), record(14, 8, 5)]);
        manager.clear().unwrap();
        let range = manager.range();
        assert_eq!(range.count, 0);
        assert_eq!(range.oldest, None);
        assert!(manager
            .query(ts(14, 0, 0), ts(15, 0, 0))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn backup_runs_at_most_daily() {
        let (_dir, manager) = manager_with(&[record(14, 8, 0)]);
        assert!(manager.consider_backup().unwrap());
        assert_eq!(manager.backup_files().unwrap().len(), 1);
        // Second call inside the same day is a no-op
        assert!(!manager.consider_backup().unwrap());
        assert_eq!(manager.backup_files().unwrap().len(), 1);
    }

    #[test]
    fn restore_replaces_the_archive() {
        let (_dir, manager) = manager_with(&[record(14, 8, 0)]);
        manager.consider_backup().unwrap();
        let backup = manager.backup_files().unwrap().remove(0);

        manager.append(&[record(14, 8, 5)]).unwrap();
        assert_eq!(manager.range().count, 2);

        manager.restore(&backup).unwrap();
        let range = manager.range();
        assert_eq!(range.count, 1);
        assert_eq!(range.newest, Some(ts(14, 8, 0)));
    }
}
