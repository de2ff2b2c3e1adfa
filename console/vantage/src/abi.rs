//! Wire constants and command strings of the Vantage serial protocol.

/// Single-byte replies and frame characters
pub mod frame {
    pub const LINE_FEED: u8 = b'\n';
    pub const CARRIAGE_RETURN: u8 = b'\r';
    pub const ACK: u8 = 0x06;
    /// Not an ASCII NACK, but it is what the console uses
    pub const NACK: u8 = 0x21;
    /// Sent by the console when data it received failed its CRC check
    pub const CRC_FAILURE: u8 = 0x18;
    /// Cancels an archive download
    pub const ESCAPE: u8 = 0x1B;

    pub const WAKEUP: &[u8] = b"\n";
    pub const WAKEUP_RESPONSE: &[u8] = b"\n\r";
    pub const COMMAND_TERMINATOR: &[u8] = b"\n";
    pub const OK_RESPONSE: &[u8] = b"\n\rOK\n\r";
    pub const DONE_RESPONSE: &[u8] = b"DONE\n\r";
}

/// Testing commands
pub const TEST: &str = "TEST";
/// Station type query, backward compatible with earlier Davis products
pub const STATION_TYPE: &[u8] = &[b'W', b'R', b'D', 0x12, 0x4D];
pub const RECEIVE_CHECK: &str = "RXCHECK";
pub const RECEIVE_TEST: &str = "RXTEST";
pub const FIRMWARE_DATE: &str = "VER";
pub const FIRMWARE_VERSION: &str = "NVER";
pub const RECEIVER_LIST: &str = "RECEIVERS";

/// Current data commands
pub const LOOP: &str = "LOOP";
pub const LPS: &str = "LPS 3";
pub const HIGH_LOW: &str = "HILOWS";
pub const PUT_YEARLY_RAIN: &str = "PUTRAIN";
pub const PUT_YEARLY_ET: &str = "PUTET";

/// Download commands
pub const DUMP_ARCHIVE: &str = "DMP";
pub const DUMP_AFTER: &str = "DMPAFT";

/// EEPROM commands
pub const DUMP_EEPROM: &str = "GETEE";
pub const WRITE_EEPROM: &str = "EEWR";
pub const READ_EEPROM: &str = "EERD";
pub const WRITE_EEPROM_BINARY: &str = "EEBWR";
pub const READ_EEPROM_BINARY: &str = "EEBRD";

/// Calibration commands
pub const SET_BAROMETRIC_DATA: &str = "BAR=";

/// Clearing commands
pub const CLEAR_ARCHIVE: &str = "CLRLOG";
pub const CLEAR_ALARM_THRESHOLDS: &str = "CLRALM";
pub const CLEAR_TEMP_HUMID_CAL: &str = "CLRCAL";
pub const CLEAR_GRAPH_POINTS: &str = "CLRGRA";
pub const CLEAR_CUMULATIVE_VALUE: &str = "CLRVAR";
pub const CLEAR_HIGH_VALUES: &str = "CLRHIGHS";
pub const CLEAR_LOW_VALUES: &str = "CLRLOWS";
pub const CLEAR_ACTIVE_ALARMS: &str = "CLRBITS";
pub const CLEAR_CURRENT_DATA: &str = "CLRDATA";

/// Configuration commands
pub const SET_BAUD_RATE: &str = "BAUD";
pub const SET_TIME: &str = "SETTIME";
pub const GET_TIME: &str = "GETTIME";
pub const SET_ARCHIVE_PERIOD: &str = "SETPER";
pub const STOP_ARCHIVING: &str = "STOP";
pub const START_ARCHIVING: &str = "START";
pub const REINITIALIZE: &str = "NEWSETUP";
pub const CONTROL_LAMP: &str = "LAMPS";

/// Packet and page geometry
pub const LOOP_PACKET_SIZE: usize = 99;
pub const CRC_BYTES: usize = 2;
pub const ARCHIVE_PAGE_BODY: usize = 265;
pub const ARCHIVE_PAGE_SIZE: usize = ARCHIVE_PAGE_BODY + CRC_BYTES;
pub const RECORDS_PER_ARCHIVE_PAGE: usize = 5;
/// Page count of a full DMP dump per the serial protocol document
pub const NUM_ARCHIVE_PAGES: usize = 512;
pub const HILOW_PACKET_BODY: usize = 436;
pub const HILOW_PACKET_SIZE: usize = HILOW_PACKET_BODY + CRC_BYTES;
pub const EEPROM_DATA_BLOCK_SIZE: usize = 4096;
/// Each EERD response line is "HH<LF><CR>"
pub const EEPROM_READ_LINE_LENGTH: usize = 4;
pub const TIME_RESPONSE_LENGTH: usize = 6;
pub const SET_TIME_LENGTH: usize = 6;
pub const DUMP_AFTER_RESPONSE_LENGTH: usize = 4;

/// EEPROM bytes that must never be written directly
pub const PROTECTED_EEPROM_BYTES: &[u16] = &[
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x2D,
];

/// Whether a write touching `[address, address + count)` hits a protected byte
pub fn is_protected(address: u16, count: u16) -> bool {
    PROTECTED_EEPROM_BYTES
        .iter()
        .any(|&p| p >= address && p < address.saturating_add(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_byte_detection() {
        assert!(is_protected(0x01, 1));
        assert!(is_protected(0x2D, 1));
        assert!(is_protected(0x08, 16));
        assert!(!is_protected(0x0B, 1));
        assert!(!is_protected(0x2E, 8));
    }
}
