use std::time::Duration;

use log::{debug, trace};

use super::{ModemError, ModemResult, Transport, ARRIVAL_MARKER, CALL_END_MARKER};
use crate::logutil::escape_log;

/// Cap on buffered unsolicited text when nobody drains it (status/probe sessions).
const MAX_UNSOLICITED: usize = 4096;

/// Settle durations per command family.
///
/// Listing operations may echo many lines and get the longest window; status queries
/// the shortest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTiming {
    /// `AT`, `AT+CMGF`, `AT+CPMS`, `AT+CSQ`, `AT+CREG?`, `AT+CLCC`
    pub status: Duration,
    /// `AT+CMGL="ALL"`
    pub list: Duration,
    /// `AT+CMGR=<i>`
    pub read: Duration,
    /// `AT+CMGD=<i>,0`
    pub delete: Duration,
    /// `AT+CMGD=0,1`
    pub bulk_delete: Duration,
    /// `AT+CREG=2` / `AT+CREG=0`
    pub registration_toggle: Duration,
    /// Pause between an arrival marker and the `AT+CLCC` query.
    pub call_query_delay: Duration,
    /// Wait after opening a port before the first command.
    pub open_settle: Duration,
}

impl Default for CommandTiming {
    fn default() -> Self {
        Self {
            status: Duration::from_millis(500),
            list: Duration::from_millis(2000),
            read: Duration::from_millis(1000),
            delete: Duration::from_millis(1000),
            bulk_delete: Duration::from_millis(2000),
            registration_toggle: Duration::from_millis(300),
            call_query_delay: Duration::from_millis(200),
            open_settle: Duration::from_millis(500),
        }
    }
}

impl CommandTiming {
    /// Zero settle time everywhere; for in-memory transports that answer synchronously.
    pub fn instant() -> Self {
        Self {
            status: Duration::ZERO,
            list: Duration::ZERO,
            read: Duration::ZERO,
            delete: Duration::ZERO,
            bulk_delete: Duration::ZERO,
            registration_toggle: Duration::ZERO,
            call_query_delay: Duration::ZERO,
            open_settle: Duration::ZERO,
        }
    }
}

/// One command/response conversation with a modem.
///
/// Every exchange drains stale input first, writes `<command>\r\n`, sleeps the settle
/// duration and returns whatever arrived. Stale input is not thrown away: it is kept as
/// unsolicited text for the call monitor, together with any `RING`/`NO CARRIER` lines
/// that show up inside a command response.
pub struct CommandSession {
    device: String,
    transport: Box<dyn Transport>,
    timing: CommandTiming,
    unsolicited: String,
}

impl CommandSession {
    pub fn new(device: &str, transport: Box<dyn Transport>, timing: CommandTiming) -> Self {
        Self {
            device: device.to_string(),
            transport,
            timing,
            unsolicited: String::new(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn timing(&self) -> &CommandTiming {
        &self.timing
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Send `command` and return the text captured after `settle`.
    pub async fn send_command(&mut self, command: &str, settle: Duration) -> ModemResult<String> {
        if !self.transport.is_open() {
            return Err(ModemError::NotConnected);
        }
        let stale = self.transport.read_available()?;
        if !stale.is_empty() {
            let text = String::from_utf8_lossy(&stale);
            trace!("{} stale input before {}: {}", self.device, command, escape_log(&text));
            self.stash(&text);
        }

        self.transport.write_all(format!("{}\r\n", command).as_bytes())?;
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let raw = self.transport.read_available()?;
        let response = String::from_utf8_lossy(&raw).into_owned();
        trace!("{} {} -> {}", self.device, command, escape_log(&response));

        let markers: Vec<&str> = response
            .lines()
            .map(str::trim)
            .filter(|l| *l == ARRIVAL_MARKER || *l == CALL_END_MARKER)
            .collect();
        if !markers.is_empty() {
            debug!(
                "{} unsolicited {:?} inside response to {}",
                self.device, markers, command
            );
            let joined = markers.join("\r\n") + "\r\n";
            self.stash(&joined);
        }
        Ok(response)
    }

    /// Everything received outside of a command exchange since the last call.
    pub fn take_unsolicited(&mut self) -> ModemResult<String> {
        if !self.transport.is_open() {
            return Err(ModemError::NotConnected);
        }
        let fresh = self.transport.read_available()?;
        if !fresh.is_empty() {
            let text = String::from_utf8_lossy(&fresh);
            self.stash(&text);
        }
        Ok(std::mem::take(&mut self.unsolicited))
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    fn stash(&mut self, text: &str) {
        self.unsolicited.push_str(text);
        if self.unsolicited.len() > MAX_UNSOLICITED {
            let mut cut = self.unsolicited.len() - MAX_UNSOLICITED;
            while !self.unsolicited.is_char_boundary(cut) {
                cut += 1;
            }
            self.unsolicited.drain(..cut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::mock::ScriptedTransport;

    fn session() -> (CommandSession, crate::modem::mock::ScriptHandle) {
        let (transport, handle) = ScriptedTransport::modem();
        (
            CommandSession::new("test", Box::new(transport), CommandTiming::instant()),
            handle,
        )
    }

    #[tokio::test]
    async fn command_is_crlf_terminated_and_response_returned() {
        let (mut s, handle) = session();
        let reply = s.send_command("AT+CSQ", Duration::ZERO).await.unwrap();
        assert!(reply.contains("+CSQ: 20,99"));
        assert_eq!(handle.raw_writes(), vec!["AT+CSQ\r\n".to_string()]);
    }

    #[tokio::test]
    async fn stale_bytes_are_kept_as_unsolicited() {
        let (mut s, handle) = session();
        handle.inject("\r\nRING\r\n");
        let reply = s.send_command("AT", Duration::ZERO).await.unwrap();
        assert!(!reply.contains("RING"));
        let unsolicited = s.take_unsolicited().unwrap();
        assert!(unsolicited.contains("RING"));
        assert!(s.take_unsolicited().unwrap().is_empty());
    }

    #[tokio::test]
    async fn markers_inside_responses_are_copied() {
        let (mut s, handle) = session();
        handle.respond_once("AT+CMGL=\"ALL\"", "\r\nRING\r\n\r\nOK\r\n");
        let reply = s.send_command("AT+CMGL=\"ALL\"", Duration::ZERO).await.unwrap();
        assert!(reply.contains("OK"));
        assert_eq!(s.take_unsolicited().unwrap().trim(), "RING");
    }

    #[tokio::test]
    async fn closed_transport_reports_not_connected() {
        let (mut s, _handle) = session();
        s.close();
        let err = s.send_command("AT", Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, ModemError::NotConnected));
    }

    #[tokio::test]
    async fn unsolicited_buffer_is_bounded() {
        let (mut s, handle) = session();
        handle.inject(&"x".repeat(MAX_UNSOLICITED * 2));
        s.send_command("AT", Duration::ZERO).await.unwrap();
        assert_eq!(s.take_unsolicited().unwrap().len(), MAX_UNSOLICITED);
    }
}
