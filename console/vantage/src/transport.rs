//! Byte transport under the protocol engine.
//!
//! The engine only needs exact reads with a per-call timeout, writes, a way
//! to throw away unread bytes, and a reopen for recovery. The serial device
//! lives behind this trait so the engine can be driven against scripted
//! fakes in tests.

use std::io::{Read, Write};
use std::time::Duration;

use vantage_sync_core::{ProtocolError, Result};

/// Per-read timeout. The console replies well within this on a healthy link.
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

pub trait Connection: Send {
    /// Write the whole buffer
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Fill the whole buffer or fail with `Timeout`
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Discard any unread input
    fn drain(&mut self);

    /// Close and reopen the underlying device
    fn reopen(&mut self) -> Result<()>;

    /// Change the line speed, where the transport supports it
    fn set_baud_rate(&mut self, _baud: u32) -> Result<()> {
        Err(ProtocolError::NotPermitted)
    }
}

/// A `Connection` over a local serial device
pub struct SerialConnection {
    port: Box<dyn serialport::SerialPort>,
    path: String,
    baud: u32,
}

impl SerialConnection {
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| ProtocolError::TransportIo(e.to_string()))?;
        Ok(Self {
            port,
            path: path.to_string(),
            baud,
        })
    }
}

impl Connection for SerialConnection {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)
            .map_err(|e| ProtocolError::TransportIo(e.to_string()))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match Read::read_exact(&mut self.port, buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(ProtocolError::Timeout),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProtocolError::Timeout),
            Err(e) => Err(ProtocolError::TransportIo(e.to_string())),
        }
    }

    fn drain(&mut self) {
        let _ = self.port.clear(serialport::ClearBuffer::Input);
    }

    fn reopen(&mut self) -> Result<()> {
        let reopened = SerialConnection::open(&self.path, self.baud)?;
        self.port = reopened.port;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.port
            .set_baud_rate(baud)
            .map_err(|e| ProtocolError::TransportIo(e.to_string()))?;
        self.baud = baud;
        Ok(())
    }
}

/// Scripted connection for protocol tests: a sequence of expected writes and
/// the bytes the console replies with.
pub mod testing {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Default)]
    pub struct ScriptedConnection {
        exchanges: VecDeque<(Vec<u8>, Vec<u8>)>,
        pending_reads: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl ScriptedConnection {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue an expected write and the console's reply to it
        pub fn expect(mut self, write: impl AsRef<[u8]>, reply: impl AsRef<[u8]>) -> Self {
            self.exchanges
                .push_back((write.as_ref().to_vec(), reply.as_ref().to_vec()));
            self
        }

        pub fn all_exchanges_consumed(&self) -> bool {
            self.exchanges.is_empty()
        }
    }

    impl Connection for ScriptedConnection {
        fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.written.extend_from_slice(data);
            while let Some((expected, _)) = self.exchanges.front() {
                if self.written.len() < expected.len() {
                    break;
                }
                let (expected, reply) = self.exchanges.pop_front().unwrap();
                assert_eq!(
                    self.written[..expected.len()],
                    expected[..],
                    "unexpected bytes written to scripted connection"
                );
                self.written.drain(..expected.len());
                self.pending_reads.extend(reply);
            }
            Ok(())
        }

        fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
            if self.pending_reads.len() < buf.len() {
                return Err(ProtocolError::Timeout);
            }
            for slot in buf.iter_mut() {
                *slot = self.pending_reads.pop_front().unwrap();
            }
            Ok(())
        }

        fn drain(&mut self) {
            self.pending_reads.clear();
        }

        fn reopen(&mut self) -> Result<()> {
            Ok(())
        }

        fn set_baud_rate(&mut self, _baud: u32) -> Result<()> {
            Ok(())
        }
    }
}
