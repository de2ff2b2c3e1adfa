//! The console-facing driver thread.
//!
//! Owns the serial port. Alternates between LPS streaming (fanning packets
//! out to the subscribers), servicing queued console commands, and pulling
//! new archive records when the LOOP next-record cursor moves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, error, info, warn};
use vantage_console::packets::{Loop2Packet, LoopPacket};
use vantage_console::{LoopSubscriber, VantageConsole};
use vantage_sync_core::Result;

use crate::alarm::AlarmManager;
use crate::archive::ArchiveManager;
use crate::commands::{console as console_commands, CommandQueue, CommandReceiver};
use crate::current::CurrentWeatherPublisher;
use crate::storm::StormTracker;

/// LOOP/LOOP2 pairs per streaming burst, roughly a minute of packets
const LOOP_PACKET_CYCLES: usize = 12;
/// How often the console clock is re-set, in hours
const TIME_SET_INTERVAL_HOURS: i64 = 24;

/// Subscriber that watches for reasons to leave the LPS loop early:
/// shutdown, queued console commands, or a moved next-record cursor.
struct LoopMonitor {
    shutdown: Arc<AtomicBool>,
    queue: CommandQueue,
    next_record: Option<u16>,
    previous_next_record: Option<u16>,
}

impl LoopMonitor {
    fn new_record_available(&self) -> bool {
        self.previous_next_record.is_some() && self.previous_next_record != self.next_record
    }

    fn mark_synchronized(&mut self) {
        self.previous_next_record = self.next_record;
    }
}

impl LoopSubscriber for LoopMonitor {
    fn process_loop(&mut self, packet: &LoopPacket) -> bool {
        self.next_record = Some(packet.next_record);
        let stop = self.shutdown.load(Ordering::SeqCst)
            || self.queue.has_pending()
            || self.new_record_available();
        debug!(
            next_record = packet.next_record,
            stop, "loop packet processed by driver"
        );
        !stop
    }

    fn process_loop2(&mut self, _packet: &Loop2Packet) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }
}

pub struct Driver {
    console: VantageConsole,
    archive: Arc<ArchiveManager>,
    publisher: CurrentWeatherPublisher,
    alarms: AlarmManager,
    storms: StormTracker,
    commands: CommandReceiver,
    monitor: LoopMonitor,
    console_time_set_at: Option<NaiveDateTime>,
}

impl Driver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        console: VantageConsole,
        archive: Arc<ArchiveManager>,
        publisher: CurrentWeatherPublisher,
        alarms: AlarmManager,
        storms: StormTracker,
        commands: CommandReceiver,
        command_queue: CommandQueue,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            console,
            archive,
            publisher,
            alarms,
            storms,
            commands,
            monitor: LoopMonitor {
                shutdown,
                queue: command_queue,
                next_record: None,
                previous_next_record: None,
            },
            console_time_set_at: None,
        }
    }

    /// Wake the console, learn its type and configuration, and bring the
    /// local archive up to date.
    fn initialize(&mut self) -> Result<()> {
        info!("initializing console driver");
        self.console.wakeup()?;
        self.console.retrieve_station_type()?;

        // The setup bits carry the rain collector size, which must be known
        // before any rain field is decoded
        let setup = self.console.retrieve_setup_bits()?;
        info!(collector = %setup.rain_collector_size, "rain collector configured");

        let period = self.console.retrieve_archive_period()?;
        self.archive.set_archive_period(period.minutes());
        info!(period = period.minutes(), "console archive period");

        match self.console.eeprom_read_block() {
            Ok(eeprom) => self.alarms.load_thresholds(&eeprom),
            Err(e) => warn!(error = %e, "failed to read alarm thresholds from EEPROM"),
        }

        self.archive.synchronize(&mut self.console)?;
        self.monitor.mark_synchronized();
        info!("console driver initialized");
        Ok(())
    }

    /// Main loop; returns when the shutdown flag is raised
    pub fn run(mut self) {
        if let Err(e) = self.initialize() {
            error!(error = %e, "console driver initialization failed");
        }

        while !self.monitor.shutdown.load(Ordering::SeqCst) {
            if let Err(e) = self.console.wakeup() {
                // A console that stays asleep has occasionally been seen to
                // need the port closed and reopened to recover
                warn!(error = %e, "console did not wake, reopening the port");
                if let Err(e) = self.console.reopen() {
                    error!(error = %e, "failed to reopen the console port");
                }
                continue;
            }

            self.maintain_console_time();

            let mut subscribers: [&mut dyn LoopSubscriber; 4] = [
                &mut self.monitor,
                &mut self.publisher,
                &mut self.alarms,
                &mut self.storms,
            ];
            if let Err(e) = self
                .console
                .current_values_loop(LOOP_PACKET_CYCLES, &mut subscribers)
            {
                warn!(error = %e, "current values loop failed");
            }

            self.service_commands();

            if self.monitor.new_record_available() {
                info!(record = ?self.monitor.next_record, "new archive record available");
                match self.archive.synchronize(&mut self.console) {
                    Ok(count) => {
                        self.monitor.mark_synchronized();
                        debug!(count, "archive records synchronized");
                        self.update_link_quality();
                    }
                    Err(e) => warn!(error = %e, "archive synchronization failed"),
                }
            }
        }
        info!("console driver stopped");
    }

    fn service_commands(&mut self) {
        while let Some(command) = self.commands.try_next() {
            info!(command = %command.name, "servicing console command");
            let response =
                console_commands::execute(&mut self.console, &self.archive, &command);
            command.respond(response);
        }
    }

    fn maintain_console_time(&mut self) {
        let now = Local::now().naive_local();
        let due = self
            .console_time_set_at
            .map_or(true, |at| now - at > chrono::Duration::hours(TIME_SET_INTERVAL_HOURS));
        if !due {
            return;
        }
        match self.console.update_console_time(now) {
            Ok(()) => {
                info!(time = %now, "console clock set");
                self.console_time_set_at = Some(now);
            }
            Err(e) => warn!(error = %e, "failed to set the console clock"),
        }
    }

    fn update_link_quality(&mut self) {
        let record = match self.archive.newest_record() {
            Ok(Some(record)) => record,
            _ => return,
        };
        let quality = self
            .console
            .station_reception_percentage(record.wind_sample_count(), 1);
        debug!(?quality, "station link quality");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::command_queue;
    use vantage_console::crc;
    use vantage_console::decode::Decoder;
    use vantage_console::packets::loop_packet::test_support::empty_loop_frame;

    fn loop_with_next_record(next: u16) -> LoopPacket {
        let mut frame = empty_loop_frame();
        frame.truncate(vantage_console::abi::LOOP_PACKET_SIZE - 2);
        vantage_console::codec::write_u16(&mut frame, 5, next);
        crc::append(&mut frame);
        LoopPacket::decode(&frame, &Decoder::new()).unwrap()
    }

    #[test]
    fn monitor_stops_the_loop_when_the_cursor_moves() {
        let (queue, _receiver) = command_queue();
        let mut monitor = LoopMonitor {
            shutdown: Arc::new(AtomicBool::new(false)),
            queue,
            next_record: None,
            previous_next_record: None,
        };

        // First packet establishes the cursor without stopping
        assert!(monitor.process_loop(&loop_with_next_record(130)));
        monitor.mark_synchronized();
        assert!(monitor.process_loop(&loop_with_next_record(130)));
        assert!(!monitor.new_record_available());

        // A moved cursor stops the loop and flags a sync
        assert!(!monitor.process_loop(&loop_with_next_record(131)));
        assert!(monitor.new_record_available());
        monitor.mark_synchronized();
        assert!(!monitor.new_record_available());
    }

    #[test]
    fn monitor_stops_for_pending_commands_and_shutdown() {
        let (queue, receiver) = command_queue();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut monitor = LoopMonitor {
            shutdown: shutdown.clone(),
            queue: queue.clone(),
            next_record: None,
            previous_next_record: None,
        };

        let (response_tx, _response_rx) = std::sync::mpsc::channel();
        queue.send(crate::commands::CommandData {
            name: "backlight".into(),
            arguments: vec![],
            response_tx,
        });
        assert!(!monitor.process_loop(&loop_with_next_record(1)));
        receiver.try_next().unwrap();
        monitor.mark_synchronized();
        assert!(monitor.process_loop(&loop_with_next_record(1)));

        shutdown.store(true, Ordering::SeqCst);
        assert!(!monitor.process_loop(&loop_with_next_record(1)));
    }
}
