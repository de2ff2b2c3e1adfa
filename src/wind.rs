//! Dominant wind direction tracking.
//!
//! Reproduces the console's six-arrow display: time is partitioned into
//! tumbling 10-minute windows aligned on the minute, each window elects the
//! compass slice that collected the most samples, and a slice stays
//! "dominant" for the hour following its last win. State survives restarts
//! through a small text checkpoint.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub const NUM_SLICES: usize = 16;
const DEGREES_PER_SLICE: f64 = 22.5;
const HALF_SLICE: f64 = DEGREES_PER_SLICE / 2.0;
const MAX_HEADING: f64 = 360.0;
/// Length of one sampling window in seconds
const AGE_SPAN: i64 = 600;
/// How long a slice stays dominant after winning a window
const DOMINANT_DIR_DURATION: i64 = 3600;

const SLICE_NAMES: [&str; NUM_SLICES] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

#[derive(Debug, Clone)]
struct WindSlice {
    name: &'static str,
    low: f64,
    high: f64,
    sample_count: u32,
    last_dominant: Option<i64>,
}

impl WindSlice {
    fn new(index: usize) -> Self {
        let center = index as f64 * DEGREES_PER_SLICE;
        Self {
            name: SLICE_NAMES[index],
            low: center - HALF_SLICE,
            high: center + HALF_SLICE,
            sample_count: 0,
            last_dominant: None,
        }
    }

    fn center(&self) -> f64 {
        self.low + HALF_SLICE
    }

    fn contains(&self, heading: f64) -> bool {
        heading >= self.low && heading < self.high
    }
}

/// Tracks the dominant wind directions over the trailing hour.
pub struct DominantWindTracker {
    slices: Vec<WindSlice>,
    window_start: Option<i64>,
    window_end: Option<i64>,
    checkpoint_path: PathBuf,
}

impl DominantWindTracker {
    /// Create a tracker, restoring any usable checkpoint found at `path`.
    /// `now` bounds the checkpoint's timestamps.
    pub fn open(path: &Path, now: i64) -> Self {
        let mut tracker = Self {
            slices: (0..NUM_SLICES).map(WindSlice::new).collect(),
            window_start: None,
            window_end: None,
            checkpoint_path: path.to_path_buf(),
        };
        tracker.restore_checkpoint(now);
        tracker
    }

    /// Feed one wind sample. Zero-speed samples carry no heading information
    /// and neither open nor close windows.
    pub fn process_sample(&mut self, time: i64, heading: f64, speed: f64) {
        if speed <= 0.0 {
            return;
        }

        let window_ended = self.check_for_end_of_window(time);
        if self.window_end.is_none() || window_ended {
            self.start_window(time);
        }

        // The north slice spans 348.75 to 11.25 degrees; move the upper part
        // below zero so a single range check covers it
        let heading = if heading > MAX_HEADING - HALF_SLICE {
            heading - MAX_HEADING
        } else {
            heading
        };

        for slice in &mut self.slices {
            if slice.contains(heading) {
                slice.sample_count += 1;
            }
        }
    }

    /// Names of the slices dominant within the trailing hour, e.g.
    /// `["N", "NE", "W"]`
    pub fn dominant_directions(&self) -> Vec<&'static str> {
        self.slices
            .iter()
            .filter(|s| s.last_dominant.is_some())
            .map(|s| s.name)
            .collect()
    }

    fn check_for_end_of_window(&mut self, time: i64) -> bool {
        match self.window_end {
            Some(end) if time >= end => {
                self.end_window(time);
                true
            }
            _ => false,
        }
    }

    fn start_window(&mut self, time: i64) {
        for slice in &mut self.slices {
            slice.sample_count = 0;
        }

        let minute_aligned = time - (time % 60);
        let start = match (self.window_start, self.window_end) {
            (None, _) => minute_aligned,
            // A gap of strictly more than an hour abandons the old
            // alignment; skipped windows in smaller gaps count as calm
            (_, Some(end)) if end + DOMINANT_DIR_DURATION < time => {
                debug!("resetting window alignment after a large sample gap");
                minute_aligned
            }
            (Some(mut start), _) => {
                while time >= start + AGE_SPAN {
                    start += AGE_SPAN;
                }
                start
            }
        };

        self.window_start = Some(start);
        self.window_end = Some(start + AGE_SPAN);
        debug!(start, end = start + AGE_SPAN, "starting wind window");
        self.save_checkpoint();
    }

    fn end_window(&mut self, time: i64) {
        let window_end = self.window_end.unwrap_or(time);

        // Highest sample count wins, lower-indexed slice on a tie
        let mut winner: Option<(usize, u32)> = None;
        for (index, slice) in self.slices.iter().enumerate() {
            if slice.sample_count > 0
                && winner.map_or(true, |(_, count)| slice.sample_count > count)
            {
                winner = Some((index, slice.sample_count));
            }
        }
        if let Some((index, _)) = winner {
            debug!(direction = self.slices[index].name, "dominant wind direction");
            self.slices[index].last_dominant = Some(window_end);
        }

        for slice in &mut self.slices {
            slice.sample_count = 0;
            if slice
                .last_dominant
                .is_some_and(|t| t + DOMINANT_DIR_DURATION < time)
            {
                slice.last_dominant = None;
            }
        }

        if self.slices.iter().all(|s| s.last_dominant.is_none()) {
            self.window_start = None;
            self.window_end = None;
        }
    }

    /// Persist per-slice state as 16 lines of "<heading> <epoch> <count>"
    fn save_checkpoint(&self) {
        let mut contents = String::new();
        for slice in &self.slices {
            contents.push_str(&format!(
                "{:5.1} {:10} {:5}\n",
                slice.center(),
                slice.last_dominant.unwrap_or(0),
                slice.sample_count
            ));
        }

        let tmp = self.checkpoint_path.with_extension("tmp");
        let result = fs::write(&tmp, contents).and_then(|()| fs::rename(&tmp, &self.checkpoint_path));
        if let Err(e) = result {
            warn!(error = %e, "failed to write dominant wind checkpoint");
        }
    }

    fn restore_checkpoint(&mut self, now: i64) {
        let contents = match fs::read_to_string(&self.checkpoint_path) {
            Ok(contents) => contents,
            Err(_) => return,
        };

        // Parse everything up front; a single bad line or future timestamp
        // discards the file as a whole
        let mut entries: Vec<(f64, i64, u32)> = Vec::new();
        for line in contents.lines() {
            let mut fields = line.split_whitespace();
            let parsed = (|| {
                let heading: f64 = fields.next()?.parse().ok()?;
                let dominant: i64 = fields.next()?.parse().ok()?;
                let count: u32 = fields.next()?.parse().ok()?;
                Some((heading, dominant, count))
            })();
            match parsed {
                Some(entry) if entry.1 <= now => entries.push(entry),
                _ => {
                    warn!(line, "unusable dominant wind checkpoint, ignoring the file");
                    return;
                }
            }
        }

        let mut newest = 0i64;
        for (heading, dominant, count) in entries {
            newest = newest.max(dominant);
            if dominant > 0 && now - dominant <= DOMINANT_DIR_DURATION {
                for slice in &mut self.slices {
                    if slice.contains(heading) {
                        slice.last_dominant = Some(dominant);
                        slice.sample_count = count;
                    }
                }
            }
        }

        // Sample counts are only meaningful if the active window survived
        // the restart
        if now - newest > AGE_SPAN {
            for slice in &mut self.slices {
                slice.sample_count = 0;
            }
        }

        if newest > 0 {
            let mut start = newest;
            while start + AGE_SPAN <= now {
                start += AGE_SPAN;
            }
            self.window_start = Some(start);
            self.window_end = Some(start + AGE_SPAN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn epoch(h: u32, m: u32, s: u32) -> i64 {
        NaiveDate::from_ymd_opt(2023, 6, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
            .and_utc()
            .timestamp()
    }

    fn tracker() -> (tempfile::TempDir, DominantWindTracker) {
        let dir = tempfile::tempdir().unwrap();
        let tracker = DominantWindTracker::open(&dir.path().join("wind.chk"), epoch(11, 0, 0));
        (dir, tracker)
    }

    #[test]
    fn window_closes_and_elects_a_dominant_slice() {
        let (_dir, mut tracker) = tracker();

        // Samples every 30 seconds from 12:00:30 through 12:09:30
        let mut t = epoch(12, 0, 30);
        while t <= epoch(12, 9, 30) {
            tracker.process_sample(t, 20.0, 2.0);
            t += 30;
        }
        assert!(tracker.dominant_directions().is_empty());

        // The sample at 12:10:00 closes the [12:00, 12:10) window
        tracker.process_sample(epoch(12, 10, 0), 40.0, 2.0);
        assert_eq!(tracker.dominant_directions(), vec!["NNE"]);
        assert_eq!(tracker.slices[1].last_dominant, Some(epoch(12, 10, 0)));
        // The stamped time is the window end, strictly after its start
        assert_eq!(tracker.window_start, Some(epoch(12, 10, 0)));
    }

    #[test]
    fn zero_speed_samples_are_ignored() {
        let (_dir, mut tracker) = tracker();
        tracker.process_sample(epoch(12, 0, 0), 20.0, 2.0);
        // A calm sample past the window end must not close the window
        tracker.process_sample(epoch(12, 30, 0), 90.0, 0.0);
        assert_eq!(tracker.window_end, Some(epoch(12, 10, 0)));
        assert_eq!(tracker.slices[1].sample_count, 1);
    }

    #[test]
    fn north_slice_wraps_across_zero() {
        let (_dir, mut tracker) = tracker();
        tracker.process_sample(epoch(12, 0, 0), 351.0, 1.0);
        tracker.process_sample(epoch(12, 0, 30), 5.0, 1.0);
        tracker.process_sample(epoch(12, 0, 45), 0.0, 1.0);
        assert_eq!(tracker.slices[0].sample_count, 3);
        assert_eq!(tracker.slices[15].sample_count, 0);
    }

    #[test]
    fn tie_favors_the_lower_indexed_slice() {
        let (_dir, mut tracker) = tracker();
        // Equal counts in NNE and NE
        tracker.process_sample(epoch(12, 0, 0), 22.0, 1.0);
        tracker.process_sample(epoch(12, 0, 10), 45.0, 1.0);
        tracker.process_sample(epoch(12, 10, 0), 45.0, 1.0);
        assert_eq!(tracker.dominant_directions(), vec!["NNE"]);
    }

    #[test]
    fn dominance_expires_after_an_hour() {
        let (_dir, mut tracker) = tracker();
        tracker.process_sample(epoch(12, 0, 0), 20.0, 2.0);
        tracker.process_sample(epoch(12, 10, 0), 20.0, 2.0);
        assert_eq!(tracker.dominant_directions(), vec!["NNE"]);

        // Keep sampling a different direction; the NNE dominance (stamped
        // 12:20 when its last window closed) ages out an hour later
        let mut t = epoch(13, 0, 0);
        while t <= epoch(13, 50, 0) {
            tracker.process_sample(t, 180.0, 2.0);
            t += 60;
        }
        let directions = tracker.dominant_directions();
        assert!(directions.contains(&"S"));
        assert!(!directions.contains(&"NNE"));
    }

    #[test]
    fn alignment_resets_only_for_gaps_over_an_hour() {
        let (_dir, mut tracker) = tracker();
        tracker.process_sample(epoch(12, 3, 30), 20.0, 2.0);
        assert_eq!(tracker.window_start, Some(epoch(12, 3, 0)));

        // Window ended at 12:13; a gap within the hour keeps the 10-minute
        // grid (start stays a multiple of 10 minutes past 12:03)
        tracker.process_sample(epoch(13, 12, 30), 20.0, 2.0);
        assert_eq!(tracker.window_start, Some(epoch(13, 3, 0)));

        // Strictly more than an hour after the window end re-aligns to the
        // sample's minute
        tracker.process_sample(epoch(14, 13, 30), 20.0, 2.0);
        assert_eq!(tracker.window_start, Some(epoch(14, 13, 0)));
    }

    #[test]
    fn checkpoint_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wind.chk");

        let mut tracker = DominantWindTracker::open(&path, epoch(11, 0, 0));
        tracker.process_sample(epoch(12, 0, 0), 20.0, 2.0);
        tracker.process_sample(epoch(12, 10, 0), 20.0, 2.0);
        assert_eq!(tracker.dominant_directions(), vec!["NNE"]);

        let restored = DominantWindTracker::open(&path, epoch(12, 15, 0));
        assert_eq!(restored.dominant_directions(), vec!["NNE"]);
        assert_eq!(restored.slices[1].last_dominant, Some(epoch(12, 10, 0)));
    }

    #[test]
    fn stale_checkpoint_entries_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wind.chk");

        let mut tracker = DominantWindTracker::open(&path, epoch(11, 0, 0));
        tracker.process_sample(epoch(12, 0, 0), 20.0, 2.0);
        tracker.process_sample(epoch(12, 10, 0), 20.0, 2.0);

        // Restart two hours later: the dominance has aged out
        let restored = DominantWindTracker::open(&path, epoch(14, 15, 0));
        assert!(restored.dominant_directions().is_empty());
    }

    #[test]
    fn corrupt_or_future_checkpoints_are_ignored_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wind.chk");

        fs::write(&path, "0.0 not-a-number 3\n").unwrap();
        let restored = DominantWindTracker::open(&path, epoch(12, 0, 0));
        assert!(restored.dominant_directions().is_empty());
        assert_eq!(restored.window_end, None);

        // A timestamp in the future invalidates the whole file
        let future = epoch(18, 0, 0);
        fs::write(&path, format!(" 22.5 {future}     4\n")).unwrap();
        let restored = DominantWindTracker::open(&path, epoch(12, 0, 0));
        assert!(restored.dominant_directions().is_empty());
    }
}
