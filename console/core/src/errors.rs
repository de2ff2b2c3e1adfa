//! The closed set of errors the driver can surface.

/// Errors that can occur while talking to the console or serving its data
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Byte transport failure (serial device level)
    #[error("transport i/o: {0}")]
    TransportIo(String),

    /// A byte read did not complete within the per-call timeout
    #[error("read timed out")]
    Timeout,

    /// A framed packet did not start with the expected prefix
    #[error("bad packet prefix")]
    FramingBadPrefix,

    /// A framed packet did not end with <LF><CR>
    #[error("bad packet terminator")]
    FramingBadTerminator,

    /// A received buffer failed its CRC check
    #[error("crc check failed")]
    CrcFailure,

    /// The console replied with a NACK, a CRC-failure byte, or garbage
    #[error("unexpected reply byte 0x{0:02x}")]
    UnexpectedReply(u8),

    /// A multi-step exchange was abandoned mid-flight
    #[error("protocol exchange aborted")]
    ProtocolAbort,

    /// A fixed-offset field held a value that cannot be decoded
    #[error("invalid field: {0}")]
    DecodeInvalidField(&'static str),

    /// A command argument failed validation
    #[error("invalid argument: {0}")]
    ArgumentInvalid(String),

    /// Refused write to a protected EEPROM address
    #[error("eeprom address 0x{0:02x} is protected")]
    EepromProtected(u16),

    /// Archive file i/o error
    #[error("archive i/o: {0}")]
    ArchiveIo(#[from] std::io::Error),

    /// An archive record is not newer than its predecessor
    #[error("archive record out of order")]
    ArchiveOutOfOrder,

    /// The connected console type does not support the command
    #[error("command not supported by this console")]
    NotPermitted,

    /// The handler is already processing a conflicting command
    #[error("command handler busy")]
    AlreadyBusy,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
