//! # Modem Communication Module
//!
//! Low-level access to AT-command cellular modems attached over USB/UART serial links.
//!
//! ## Layers
//!
//! - [`Transport`] - a bidirectional byte stream to one modem. [`SerialTransport`] is the
//!   real implementation (feature `serial`); [`mock::ScriptedTransport`] answers scripted
//!   commands in memory for tests.
//! - [`CommandSession`] - sends one command, waits a command-specific settle time and
//!   returns whatever accumulated. The AT protocol has no reliable end-of-response marker
//!   across all commands, so timing is the framing mechanism and parsers must treat
//!   partial captures as normal.
//! - [`parser`] - pure response parsers, one per command family.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # #[cfg(feature = "serial")]
//! # {
//! use smsgate::modem::{CommandSession, CommandTiming, SerialTransport};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let timing = CommandTiming::default();
//!     let port = SerialTransport::open("/dev/ttyUSB0", 115200, Duration::from_secs(2), timing.open_settle).await?;
//!     let mut session = CommandSession::new("modem-a", Box::new(port), timing);
//!     let reply = session.send_command("AT+CSQ", session.timing().status).await?;
//!     println!("{}", reply);
//!     Ok(())
//! }
//! # }
//! ```

pub mod error;
pub mod mock;
pub mod parser;
mod session;

pub use error::{ModemError, ModemResult};
pub use session::{CommandSession, CommandTiming};

#[cfg(feature = "serial")]
use log::{debug, info};
#[cfg(feature = "serial")]
use std::io::{Read, Write};
#[cfg(feature = "serial")]
use std::time::Duration;

/// Unsolicited line announcing an incoming call.
pub const ARRIVAL_MARKER: &str = "RING";
/// Unsolicited line announcing that a call ended.
pub const CALL_END_MARKER: &str = "NO CARRIER";

/// A bidirectional byte stream to exactly one modem.
///
/// Implementations must never block longer than their configured read timeout;
/// `read_available` only returns bytes that are already buffered.
pub trait Transport: Send {
    /// Write the whole buffer to the device.
    fn write_all(&mut self, data: &[u8]) -> ModemResult<()>;

    /// Drain every byte currently buffered without waiting for more.
    fn read_available(&mut self) -> ModemResult<Vec<u8>>;

    /// Release the underlying port. Further I/O fails with `NotConnected`.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Serial port transport backed by the `serialport` crate.
#[cfg(feature = "serial")]
pub struct SerialTransport {
    port_name: String,
    port: Option<Box<dyn serialport::SerialPort>>,
}

#[cfg(feature = "serial")]
impl SerialTransport {
    /// Open `port_name` at `baud_rate` (8N1), wait `settle` for the modem to wake and
    /// discard any boot banner left in the input buffer.
    pub async fn open(
        port_name: &str,
        baud_rate: u32,
        read_timeout: Duration,
        settle: Duration,
    ) -> ModemResult<Self> {
        info!("Opening modem on {} at {} baud", port_name, baud_rate);
        let mut builder = serialport::new(port_name, baud_rate).timeout(read_timeout);
        // Some USB serial adapters need explicit settings
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder
            .open()
            .map_err(|e| ModemError::transport(port_name, e))?;
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        tokio::time::sleep(settle).await;

        let mut transport = SerialTransport {
            port_name: port_name.to_string(),
            port: Some(port),
        };
        let purged = transport.read_available()?;
        debug!(
            "Serial port {} initialized, flushed {} stale bytes",
            port_name,
            purged.len()
        );
        Ok(transport)
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[cfg(feature = "serial")]
impl Transport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> ModemResult<()> {
        let port = self.port.as_mut().ok_or(ModemError::NotConnected)?;
        port.write_all(data)
            .and_then(|_| port.flush())
            .map_err(|e| ModemError::transport(&self.port_name, e))
    }

    fn read_available(&mut self) -> ModemResult<Vec<u8>> {
        let port = self.port.as_mut().ok_or(ModemError::NotConnected)?;
        let mut out = Vec::new();
        // Bounded so a chattering device cannot pin the loop
        for _ in 0..64 {
            let waiting = port
                .bytes_to_read()
                .map_err(|e| ModemError::transport(&self.port_name, e))? as usize;
            if waiting == 0 {
                break;
            }
            let mut buf = vec![0u8; waiting];
            match port.read(&mut buf) {
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => break,
                Err(e) => return Err(ModemError::transport(&self.port_name, e)),
            }
        }
        Ok(out)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.port_name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
