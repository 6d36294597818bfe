//! In-memory modem for tests.
//!
//! [`ScriptedTransport`] answers each written command from a script: one-shot replies
//! queued with [`ScriptHandle::respond_once`] win over standing replies set with
//! [`ScriptHandle::respond`]; anything unscripted gets `ERROR`. The [`ScriptHandle`] stays
//! usable after the transport has been moved into a device task.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::{ModemError, ModemResult, Transport};

pub const OK_REPLY: &str = "\r\nOK\r\n";
pub const ERROR_REPLY: &str = "\r\nERROR\r\n";

#[derive(Default)]
struct Script {
    once: HashMap<String, VecDeque<String>>,
    standing: HashMap<String, String>,
    rx: Vec<u8>,
    writes: Vec<String>,
    broken: bool,
    closed: bool,
}

pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

#[derive(Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Empty script: every command answers `ERROR`.
    pub fn new() -> (Self, ScriptHandle) {
        let script = Arc::new(Mutex::new(Script::default()));
        (
            ScriptedTransport {
                script: script.clone(),
            },
            ScriptHandle { script },
        )
    }

    /// A healthy, registered modem with empty message storage.
    pub fn modem() -> (Self, ScriptHandle) {
        let (transport, handle) = Self::new();
        for cmd in ["AT", "AT+CMGF=1", "AT+CREG=2", "AT+CREG=0", "AT+CMGD=0,1"] {
            handle.respond(cmd, OK_REPLY);
        }
        handle.respond("AT+CMGL=\"ALL\"", OK_REPLY);
        handle.respond("AT+CLCC", OK_REPLY);
        handle.respond(
            "AT+CPMS=\"ME\"",
            "\r\n+CPMS: \"ME\",0,50,\"ME\",0,50,\"ME\",0,50\r\n\r\nOK\r\n",
        );
        handle.respond(
            "AT+CPMS=\"SM\"",
            "\r\n+CPMS: \"SM\",0,30,\"SM\",0,30,\"SM\",0,30\r\n\r\nOK\r\n",
        );
        handle.respond("AT+CSQ", "\r\n+CSQ: 20,99\r\n\r\nOK\r\n");
        handle.respond(
            "AT+CREG?",
            "\r\n+CREG: 2,1,\"1A2B\",\"3C4D\",7\r\n\r\nOK\r\n",
        );
        (transport, handle)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("script mutex poisoned")
    }
}

impl Transport for ScriptedTransport {
    fn write_all(&mut self, data: &[u8]) -> ModemResult<()> {
        let mut script = self.lock();
        if script.closed {
            return Err(ModemError::NotConnected);
        }
        if script.broken {
            return Err(ModemError::transport("mock", "device unplugged"));
        }
        let raw = String::from_utf8_lossy(data).into_owned();
        let command = raw.trim_end_matches(['\r', '\n']).to_string();
        script.writes.push(raw);
        let reply = match script.once.get_mut(&command).and_then(|q| q.pop_front()) {
            Some(reply) => reply,
            None => script
                .standing
                .get(&command)
                .cloned()
                .unwrap_or_else(|| ERROR_REPLY.to_string()),
        };
        script.rx.extend_from_slice(reply.as_bytes());
        Ok(())
    }

    fn read_available(&mut self) -> ModemResult<Vec<u8>> {
        let mut script = self.lock();
        if script.closed {
            return Err(ModemError::NotConnected);
        }
        if script.broken {
            return Err(ModemError::transport("mock", "device unplugged"));
        }
        Ok(std::mem::take(&mut script.rx))
    }

    fn close(&mut self) {
        self.lock().closed = true;
    }

    fn is_open(&self) -> bool {
        !self.lock().closed
    }
}

impl ScriptHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("script mutex poisoned")
    }

    /// Standing reply for `command` (without CR/LF).
    pub fn respond(&self, command: &str, reply: &str) {
        self.lock()
            .standing
            .insert(command.to_string(), reply.to_string());
    }

    /// One-shot reply, consumed before any standing reply.
    pub fn respond_once(&self, command: &str, reply: &str) {
        self.lock()
            .once
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    /// Bytes the modem emits on its own (URCs such as `RING`).
    pub fn inject(&self, text: &str) {
        self.lock().rx.extend_from_slice(text.as_bytes());
    }

    /// Make every further read/write fail like an unplugged device.
    pub fn unplug(&self) {
        self.lock().broken = true;
    }

    /// Commands written so far, without line terminators.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .writes
            .iter()
            .map(|w| w.trim_end_matches(['\r', '\n']).to_string())
            .collect()
    }

    /// Raw bytes written so far, one entry per write.
    pub fn raw_writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    pub fn clear_history(&self) {
        self.lock().writes.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// `AT+CMGL="ALL"` reply listing the given indices.
pub fn listing_reply(indices: &[i64]) -> String {
    let mut out = String::from("\r\n");
    for index in indices {
        out.push_str(&format!(
            "+CMGL: {},\"REC UNREAD\",\"+10000000000\",,\"25/10/25,19:33:13+44\"\r\ntruncated\r\n",
            index
        ));
    }
    out.push_str("\r\nOK\r\n");
    out
}

/// `AT+CMGR=<i>` reply for a plain-text message.
pub fn read_reply(sender: &str, timestamp: &str, text: &str) -> String {
    format!(
        "\r\n+CMGR: \"REC UNREAD\",\"{}\",,\"{}\"\r\n{}\r\n\r\nOK\r\n",
        sender, timestamp, text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_replies_take_precedence_then_fall_back() {
        let (mut t, h) = ScriptedTransport::modem();
        h.respond_once("AT", "\r\nBUSY\r\n");
        t.write_all(b"AT\r\n").unwrap();
        assert_eq!(t.read_available().unwrap(), b"\r\nBUSY\r\n");
        t.write_all(b"AT\r\n").unwrap();
        assert_eq!(t.read_available().unwrap(), OK_REPLY.as_bytes());
        t.write_all(b"AT+UNKNOWN\r\n").unwrap();
        assert_eq!(t.read_available().unwrap(), ERROR_REPLY.as_bytes());
        assert_eq!(h.count("AT"), 2);
    }

    #[test]
    fn unplugged_transport_fails_with_transport_error() {
        let (mut t, h) = ScriptedTransport::modem();
        h.unplug();
        assert!(t.write_all(b"AT\r\n").unwrap_err().is_fatal());
    }
}
