//! Per-device status snapshots.
//!
//! Device tasks refresh their own entry; everyone else reads cloned snapshots and never
//! touches a transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::modem::parser::{self, Registration, SignalQuality, StorageCount};
use crate::modem::{CommandSession, ModemResult};
use crate::sms::Bank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankUsage {
    pub bank: Bank,
    pub used: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub name: String,
    pub port: String,
    pub state: DeviceState,
    pub signal: Option<SignalQuality>,
    pub registration: Option<Registration>,
    pub storage: Vec<BankUsage>,
    pub deletion_enabled: bool,
    pub updated_at: Option<DateTime<Local>>,
    pub last_error: Option<String>,
}

impl DeviceStatus {
    pub fn connected(name: &str, port: &str) -> Self {
        Self {
            name: name.to_string(),
            port: port.to_string(),
            state: DeviceState::Connected,
            signal: None,
            registration: None,
            storage: Vec::new(),
            deletion_enabled: true,
            updated_at: None,
            last_error: None,
        }
    }

    pub fn disconnected(name: &str, port: &str, reason: impl Into<String>) -> Self {
        Self {
            state: DeviceState::Disconnected,
            last_error: Some(reason.into()),
            updated_at: Some(Local::now()),
            ..Self::connected(name, port)
        }
    }

    /// One-line summary, e.g. `signal 64%, Registered (home) E-UTRAN (LTE), ME 2/50`.
    pub fn summary(&self) -> String {
        if self.state == DeviceState::Disconnected {
            return format!(
                "disconnected ({})",
                self.last_error.as_deref().unwrap_or("unknown error")
            );
        }
        let mut parts = Vec::new();
        if let Some(signal) = self.signal {
            parts.push(format!("signal {}", signal));
        }
        if let Some(reg) = &self.registration {
            match reg.act_text() {
                Some(act) => parts.push(format!("{} {}", reg.status_text(), act)),
                None => parts.push(reg.status_text()),
            }
        }
        for usage in &self.storage {
            parts.push(format!("{} {}/{}", usage.bank, usage.used, usage.total));
        }
        if !self.deletion_enabled {
            parts.push("deletion disabled".to_string());
        }
        if parts.is_empty() {
            "connected".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Shared map of device name to latest status.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<HashMap<String, DeviceStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DeviceStatus>> {
        self.inner.lock().expect("status board mutex poisoned")
    }

    pub fn update(&self, status: DeviceStatus) {
        self.lock().insert(status.name.clone(), status);
    }

    /// Keep the entry but mark it disconnected with `reason`.
    pub fn mark_disconnected(&self, name: &str, reason: &str) {
        let mut board = self.lock();
        match board.get_mut(name) {
            Some(entry) => {
                entry.state = DeviceState::Disconnected;
                entry.last_error = Some(reason.to_string());
                entry.updated_at = Some(Local::now());
            }
            None => {
                board.insert(
                    name.to_string(),
                    DeviceStatus::disconnected(name, "", reason),
                );
            }
        }
    }

    pub fn set_deletion_enabled(&self, name: &str, enabled: bool) {
        if let Some(entry) = self.lock().get_mut(name) {
            entry.deletion_enabled = enabled;
        }
    }

    pub fn get(&self, name: &str) -> Option<DeviceStatus> {
        self.lock().get(name).cloned()
    }

    /// All entries, sorted by device name.
    pub fn snapshot(&self) -> Vec<DeviceStatus> {
        let mut all: Vec<DeviceStatus> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

/// Query signal, storage usage for `banks` and registration.
///
/// Verbose registration reporting is switched on just for the query so the reply carries
/// LAC/CI/AcT, then switched off again to keep unsolicited `+CREG` lines out of the stream.
pub async fn query_status(
    session: &mut CommandSession,
    port: &str,
    banks: &[Bank],
) -> ModemResult<DeviceStatus> {
    let mut status = DeviceStatus::connected(session.device(), port);
    let settle = session.timing().status;
    let toggle = session.timing().registration_toggle;

    let reply = session.send_command("AT+CSQ", settle).await?;
    status.signal = parser::parse_signal_quality(&reply);

    for bank in banks {
        let reply = session.send_command(&bank.select_command(), settle).await?;
        if let Some(StorageCount { used, total }) =
            parser::parse_storage_count(&reply, bank.code())
        {
            status.storage.push(BankUsage {
                bank: *bank,
                used,
                total,
            });
        }
    }

    session.send_command("AT+CREG=2", toggle).await?;
    let reply = session.send_command("AT+CREG?", settle).await?;
    status.registration = parser::parse_registration(&reply);
    session.send_command("AT+CREG=0", toggle).await?;

    status.updated_at = Some(Local::now());
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::mock::ScriptedTransport;
    use crate::modem::CommandTiming;

    #[tokio::test]
    async fn query_collects_signal_storage_and_registration() {
        let (transport, h) = ScriptedTransport::modem();
        h.respond("AT+CPMS=\"ME\"", "\r\n+CPMS: \"ME\",2,50,\"ME\",2,50\r\n\r\nOK\r\n");
        let mut session = CommandSession::new("dev0", Box::new(transport), CommandTiming::instant());
        let status = query_status(&mut session, "/dev/ttyUSB0", &[Bank::Device, Bank::Sim])
            .await
            .unwrap();

        assert_eq!(status.state, DeviceState::Connected);
        assert_eq!(status.signal, Some(SignalQuality::Percent(64)));
        assert_eq!(status.storage.len(), 2);
        assert_eq!(status.storage[0].used, 2);
        assert_eq!(status.storage[1].total, 30);
        let reg = status.registration.clone().expect("registration");
        assert_eq!(reg.status, 1);
        assert_eq!(
            status.summary(),
            "signal 64%, Registered (home) E-UTRAN (LTE), ME 2/50, SM 0/30"
        );
        assert_eq!(
            h.commands(),
            vec![
                "AT+CSQ",
                "AT+CPMS=\"ME\"",
                "AT+CPMS=\"SM\"",
                "AT+CREG=2",
                "AT+CREG?",
                "AT+CREG=0"
            ]
        );
    }

    #[test]
    fn board_tracks_disconnects() {
        let board = StatusBoard::new();
        board.update(DeviceStatus::connected("b", "/dev/b"));
        board.update(DeviceStatus::connected("a", "/dev/a"));
        board.mark_disconnected("b", "unplugged");
        board.set_deletion_enabled("a", false);

        let snap = board.snapshot();
        assert_eq!(snap[0].name, "a");
        assert!(!snap[0].deletion_enabled);
        assert_eq!(snap[1].state, DeviceState::Disconnected);
        assert_eq!(snap[1].port, "/dev/b");
        assert_eq!(snap[1].summary(), "disconnected (unplugged)");
    }
}
