//! Incoming call detection and debounce.
//!
//! Modems repeat the arrival marker every few seconds while a call rings. The monitor
//! reports a caller once, then stays quiet for that number until the call-end marker
//! shows up. A different number while ringing counts as a new call.

use chrono::{DateTime, Local};
use log::{debug, info};

use crate::logutil::escape_log;
use crate::modem::parser::{self, CallRecord};
use crate::modem::{CommandSession, ModemResult, ARRIVAL_MARKER, CALL_END_MARKER};

pub use crate::modem::parser::{CallMode, CallStatus};

/// Caller number reported when the network withholds it.
pub const UNKNOWN_NUMBER: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub id: u32,
    pub number: String,
    pub status: CallStatus,
    pub mode: CallMode,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    RingingNotified {
        number: String,
    },
}

pub struct CallMonitor {
    device: String,
    state: CallState,
}

impl CallMonitor {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            state: CallState::Idle,
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    /// The call ended. Returns true if a ringing call was being tracked.
    pub fn observe_call_end(&mut self) -> bool {
        let was_ringing = matches!(self.state, CallState::RingingNotified { .. });
        self.state = CallState::Idle;
        was_ringing
    }

    /// An incoming call record was seen after an arrival marker.
    pub fn on_incoming(&mut self, record: &CallRecord) -> Option<CallEvent> {
        let number = record
            .number
            .clone()
            .unwrap_or_else(|| UNKNOWN_NUMBER.to_string());
        if let CallState::RingingNotified { number: active } = &self.state {
            if *active == number {
                debug!("{} still ringing from {}", self.device, escape_log(&number));
                return None;
            }
        }
        self.state = CallState::RingingNotified {
            number: number.clone(),
        };
        Some(CallEvent {
            id: record.id,
            number,
            status: record.status,
            mode: record.mode,
            timestamp: Local::now(),
        })
    }

    /// Inspect unsolicited input and query call details when a call is arriving.
    pub async fn check(&mut self, session: &mut CommandSession) -> ModemResult<Option<CallEvent>> {
        let unsolicited = session.take_unsolicited()?;
        if unsolicited.is_empty() {
            return Ok(None);
        }
        if has_marker(&unsolicited, CALL_END_MARKER) && self.observe_call_end() {
            debug!("{} call ended", self.device);
        }
        if !has_marker(&unsolicited, ARRIVAL_MARKER) {
            return Ok(None);
        }

        let delay = session.timing().call_query_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = session
            .send_command("AT+CLCC", session.timing().status)
            .await?;
        let Some(record) = parser::parse_call_list(&reply).into_iter().next() else {
            debug!(
                "{} arrival marker without incoming call: {}",
                self.device,
                escape_log(&reply)
            );
            return Ok(None);
        };
        let event = self.on_incoming(&record);
        if let Some(ev) = &event {
            info!(
                "{} incoming call from {} ({}, {})",
                self.device,
                escape_log(&ev.number),
                ev.status,
                ev.mode
            );
        }
        Ok(event)
    }
}

/// Markers only count as whole lines; message text may contain the same words.
fn has_marker(text: &str, marker: &str) -> bool {
    text.lines().any(|l| l.trim() == marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::mock::{ScriptHandle, ScriptedTransport};
    use crate::modem::parser::CallDirection;
    use crate::modem::CommandTiming;

    fn record(number: Option<&str>) -> CallRecord {
        CallRecord {
            id: 1,
            direction: CallDirection::Incoming,
            status: CallStatus::Incoming,
            mode: CallMode::Voice,
            multiparty: false,
            number: number.map(str::to_string),
            number_type: Some(145),
        }
    }

    fn setup() -> (CallMonitor, CommandSession, ScriptHandle) {
        let (transport, handle) = ScriptedTransport::modem();
        let session = CommandSession::new("dev0", Box::new(transport), CommandTiming::instant());
        (CallMonitor::new("dev0"), session, handle)
    }

    #[test]
    fn same_number_is_reported_once_until_call_ends() {
        let mut monitor = CallMonitor::new("dev0");
        assert!(monitor.on_incoming(&record(Some("+100"))).is_some());
        assert!(monitor.on_incoming(&record(Some("+100"))).is_none());
        assert!(monitor.observe_call_end());
        assert_eq!(monitor.state(), &CallState::Idle);
        assert!(monitor.on_incoming(&record(Some("+100"))).is_some());
    }

    #[test]
    fn different_number_while_ringing_is_a_new_call() {
        let mut monitor = CallMonitor::new("dev0");
        assert!(monitor.on_incoming(&record(Some("+100"))).is_some());
        let second = monitor.on_incoming(&record(Some("+200"))).expect("new call");
        assert_eq!(second.number, "+200");
        assert_eq!(
            monitor.state(),
            &CallState::RingingNotified {
                number: "+200".into()
            }
        );
    }

    #[test]
    fn withheld_number_is_unknown() {
        let mut monitor = CallMonitor::new("dev0");
        let ev = monitor.on_incoming(&record(None)).expect("event");
        assert_eq!(ev.number, UNKNOWN_NUMBER);
        assert!(monitor.on_incoming(&record(None)).is_none());
    }

    #[tokio::test]
    async fn ring_markers_debounce_through_session() {
        let (mut monitor, mut session, h) = setup();
        h.respond(
            "AT+CLCC",
            "\r\n+CLCC: 1,1,4,0,0,\"+61412345678\",145\r\n\r\nOK\r\n",
        );

        h.inject("\r\nRING\r\n");
        let first = monitor.check(&mut session).await.unwrap().expect("event");
        assert_eq!(first.number, "+61412345678");
        assert_eq!(first.status, CallStatus::Incoming);

        h.inject("\r\nRING\r\n");
        assert!(monitor.check(&mut session).await.unwrap().is_none());

        h.inject("\r\nNO CARRIER\r\n");
        assert!(monitor.check(&mut session).await.unwrap().is_none());
        assert_eq!(monitor.state(), &CallState::Idle);

        h.inject("\r\nRING\r\n");
        assert!(monitor.check(&mut session).await.unwrap().is_some());
        assert_eq!(h.count("AT+CLCC"), 3);
    }

    #[tokio::test]
    async fn marker_words_inside_text_do_not_reset_debounce() {
        let (mut monitor, mut session, h) = setup();
        h.respond(
            "AT+CLCC",
            "\r\n+CLCC: 1,1,4,0,0,\"+61412345678\",145\r\n\r\nOK\r\n",
        );

        h.inject("\r\nRING\r\n");
        assert!(monitor.check(&mut session).await.unwrap().is_some());

        h.inject("\r\nsaid NO CARRIER twice\r\nRING\r\n");
        assert!(monitor.check(&mut session).await.unwrap().is_none());
        assert_eq!(
            monitor.state(),
            &CallState::RingingNotified {
                number: "+61412345678".to_string()
            }
        );
        assert!(!has_marker("RINGTONE", ARRIVAL_MARKER));
    }

    #[tokio::test]
    async fn quiet_line_issues_no_commands() {
        let (mut monitor, mut session, h) = setup();
        assert!(monitor.check(&mut session).await.unwrap().is_none());
        assert!(h.commands().is_empty());
    }

    #[tokio::test]
    async fn ring_without_incoming_record_emits_nothing() {
        let (mut monitor, mut session, h) = setup();
        h.respond("AT+CLCC", "\r\n+CLCC: 1,0,2,0,0,\"+999\",145\r\n\r\nOK\r\n");
        h.inject("RING\r\n");
        assert!(monitor.check(&mut session).await.unwrap().is_none());
        assert_eq!(monitor.state(), &CallState::Idle);
    }
}
