//! # SMS retrieval, dedup and delete safety
//!
//! [`SmsEngine`] runs the two-step retrieval protocol against one modem: list the
//! indices in a bank, then re-read every index it has not forwarded yet. Listing mode
//! truncates UCS-2 payloads, so the listing is only trusted for indices.
//!
//! Dedup state lives in a [`ProcessedIdSet`]: a key present means "forwarded (or in
//! flight) and the slot not yet deleted". Keys leave the set when the slot is deleted,
//! when delivery failed, or when the modem's indexing stops being trustworthy.
//!
//! Deletion is guarded by a one-way [`DeleteGuard`]. An index outside `0..=max_valid_index`
//! or a run of consecutive delete failures disables deletion for the rest of the run;
//! forwarding carries on regardless.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::logutil::escape_log;
use crate::metrics;
use crate::modem::parser::{self, is_ok};
use crate::modem::{CommandSession, ModemResult};

/// A message storage area on the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bank {
    /// Device-internal memory, `"ME"`.
    #[serde(rename = "ME")]
    Device,
    /// SIM card memory, `"SM"`.
    #[serde(rename = "SM")]
    Sim,
}

impl Bank {
    pub fn code(&self) -> &'static str {
        match self {
            Bank::Device => "ME",
            Bank::Sim => "SM",
        }
    }

    pub fn select_command(&self) -> String {
        format!("AT+CPMS=\"{}\"", self.code())
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Bank {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ME" => Ok(Bank::Device),
            "SM" => Ok(Bank::Sim),
            other => Err(anyhow::anyhow!(
                "unknown storage bank '{}' (expected ME or SM)",
                other
            )),
        }
    }
}

/// Identity of one storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub bank: Bank,
    pub index: u32,
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.bank, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    pub bank: Bank,
    pub index: u32,
    pub sender: String,
    pub text: String,
    /// Storage status reported by the modem, e.g. `REC UNREAD`.
    pub status: String,
    pub received_at: DateTime<Local>,
}

impl SmsMessage {
    pub fn key(&self) -> DedupKey {
        DedupKey {
            bank: self.bank,
            index: self.index,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProcessedIdSet {
    keys: HashSet<DedupKey>,
}

impl ProcessedIdSet {
    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    pub fn insert(&mut self, key: DedupKey) -> bool {
        self.keys.insert(key)
    }

    pub fn remove(&mut self, key: &DedupKey) -> bool {
        self.keys.remove(key)
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Drop every key belonging to `bank`.
    pub fn clear_bank(&mut self, bank: Bank) {
        self.keys.retain(|k| k.bank != bank);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Why deletion was switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableReason {
    InvalidIndex(i64),
    ConsecutiveFailures(u32),
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisableReason::InvalidIndex(i) => {
                write!(f, "invalid message index {} (storage corruption suspected)", i)
            }
            DisableReason::ConsecutiveFailures(n) => {
                write!(f, "{} consecutive delete failures", n)
            }
        }
    }
}

/// Delete-safety state: Enabled until tripped, then Disabled for good.
#[derive(Debug, Clone)]
pub struct DeleteGuard {
    threshold: u32,
    consecutive_failures: u32,
    disabled: Option<DisableReason>,
    invalid_index_seen: bool,
    notice: Option<DisableReason>,
}

impl DeleteGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            disabled: None,
            invalid_index_seen: false,
            notice: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.disabled.is_none()
    }

    pub fn disabled_reason(&self) -> Option<DisableReason> {
        self.disabled
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Note an out-of-range index. Returns true the first time the invalid-index
    /// condition is entered, when the caller must drop all dedup keys.
    pub fn record_invalid_index(&mut self, index: i64) -> bool {
        self.trip(DisableReason::InvalidIndex(index));
        !std::mem::replace(&mut self.invalid_index_seen, true)
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.threshold {
            self.trip(DisableReason::ConsecutiveFailures(self.consecutive_failures));
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// The reason deletion was disabled, yielded once.
    pub fn take_notice(&mut self) -> Option<DisableReason> {
        self.notice.take()
    }

    fn trip(&mut self, reason: DisableReason) {
        if self.disabled.is_none() {
            self.disabled = Some(reason);
            self.notice = Some(reason);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Failed,
    /// Deletion is disabled; the transport was not touched.
    Disabled,
}

/// Tunables for one engine.
#[derive(Debug, Clone)]
pub struct SmsSettings {
    pub banks: Vec<Bank>,
    pub max_valid_index: u32,
    pub delete_failure_threshold: u32,
}

impl Default for SmsSettings {
    fn default() -> Self {
        Self {
            banks: vec![Bank::Device],
            max_valid_index: 1000,
            delete_failure_threshold: 5,
        }
    }
}

/// Per-device retrieval state. Owned by exactly one device task.
pub struct SmsEngine {
    device: String,
    settings: SmsSettings,
    processed: ProcessedIdSet,
    guard: DeleteGuard,
    ready: Vec<SmsMessage>,
}

impl SmsEngine {
    pub fn new(device: &str, settings: SmsSettings) -> Self {
        let guard = DeleteGuard::new(settings.delete_failure_threshold);
        Self {
            device: device.to_string(),
            settings,
            processed: ProcessedIdSet::default(),
            guard,
            ready: Vec::new(),
        }
    }

    pub fn processed(&self) -> &ProcessedIdSet {
        &self.processed
    }

    pub fn guard(&self) -> &DeleteGuard {
        &self.guard
    }

    pub fn deletion_enabled(&self) -> bool {
        self.guard.is_enabled()
    }

    /// One retrieval cycle over every configured bank.
    ///
    /// Returns the messages read for the first time. Protocol mismatches skip the bank or
    /// index and are retried next cycle; transport errors propagate.
    ///
    /// Messages are marked processed as soon as they are read. If the poll future is
    /// dropped half way, the ones already read stay available through [`take_ready`].
    ///
    /// [`take_ready`]: SmsEngine::take_ready
    pub async fn poll(&mut self, session: &mut CommandSession) -> ModemResult<Vec<SmsMessage>> {
        for bank in self.settings.banks.clone() {
            self.poll_bank(session, bank).await?;
        }
        Ok(self.take_ready())
    }

    /// Messages read but not yet handed out.
    pub fn take_ready(&mut self) -> Vec<SmsMessage> {
        std::mem::take(&mut self.ready)
    }

    async fn poll_bank(&mut self, session: &mut CommandSession, bank: Bank) -> ModemResult<()> {
        let status = session.timing().status;
        let reply = session.send_command("AT+CMGF=1", status).await?;
        if !is_ok(&reply) {
            self.protocol_mismatch("AT+CMGF=1", &reply);
            return Ok(());
        }
        let command = bank.select_command();
        let reply = session.send_command(&command, status).await?;
        if !is_ok(&reply) {
            self.protocol_mismatch(&command, &reply);
            return Ok(());
        }

        let list_settle = session.timing().list;
        let listing = session.send_command("AT+CMGL=\"ALL\"", list_settle).await?;
        let indices = parser::parse_message_list(&listing);
        if indices.is_empty() && !is_ok(&listing) {
            self.protocol_mismatch("AT+CMGL=\"ALL\"", &listing);
            return Ok(());
        }
        debug!("{} bank {}: {} listed", self.device, bank, indices.len());

        for raw_index in indices {
            let index = match u32::try_from(raw_index) {
                Ok(i) if i <= self.settings.max_valid_index => i,
                _ => {
                    self.invalid_index(raw_index);
                    continue;
                }
            };
            let key = DedupKey { bank, index };
            if self.processed.contains(&key) {
                continue;
            }
            if let Some(message) = self.read(session, bank, index).await? {
                self.processed.insert(key);
                self.ready.push(message);
            }
        }
        Ok(())
    }

    async fn read(
        &mut self,
        session: &mut CommandSession,
        bank: Bank,
        index: u32,
    ) -> ModemResult<Option<SmsMessage>> {
        let command = format!("AT+CMGR={}", index);
        let settle = session.timing().read;
        let reply = session.send_command(&command, settle).await?;
        match parser::parse_single_message(&reply) {
            Some(read) if !read.text.is_empty() => {
                info!(
                    "{} read {}_{} from {}",
                    self.device,
                    bank,
                    index,
                    escape_log(&read.sender)
                );
                Ok(Some(SmsMessage {
                    bank,
                    index,
                    sender: read.sender,
                    text: read.text,
                    status: read.status,
                    received_at: read.timestamp.unwrap_or_else(Local::now),
                }))
            }
            _ => {
                self.protocol_mismatch(&command, &reply);
                Ok(None)
            }
        }
    }

    /// Delete one slot: select its bank, then `AT+CMGD=<i>,0`.
    pub async fn delete(
        &mut self,
        session: &mut CommandSession,
        key: DedupKey,
    ) -> ModemResult<DeleteOutcome> {
        if !self.guard.is_enabled() {
            debug!("{} delete of {} skipped: deletion disabled", self.device, key);
            return Ok(DeleteOutcome::Disabled);
        }
        if key.index > self.settings.max_valid_index {
            self.invalid_index(i64::from(key.index));
            return Ok(DeleteOutcome::Disabled);
        }

        let command = key.bank.select_command();
        let reply = session.send_command(&command, session.timing().status).await?;
        let deleted = if is_ok(&reply) {
            let command = format!("AT+CMGD={},0", key.index);
            let reply = session.send_command(&command, session.timing().delete).await?;
            is_ok(&reply)
        } else {
            false
        };

        if deleted {
            self.processed.remove(&key);
            self.guard.record_success();
            metrics::inc_delete_ok();
            info!("{} deleted {}", self.device, key);
            return Ok(DeleteOutcome::Deleted);
        }

        self.guard.record_failure();
        metrics::inc_delete_failed();
        warn!(
            "{} failed to delete {} ({} consecutive)",
            self.device,
            key,
            self.guard.consecutive_failures()
        );
        if let Some(reason) = self.guard.disabled_reason() {
            warn!("{} deletion disabled: {}", self.device, reason);
        }
        Ok(DeleteOutcome::Failed)
    }

    /// Forget a key so the slot is read and delivered again next cycle.
    pub fn evict(&mut self, key: DedupKey) -> bool {
        let removed = self.processed.remove(&key);
        if removed {
            debug!("{} evicted {} for redelivery", self.device, key);
        }
        removed
    }

    /// Bulk delete of every read message in `bank` (`AT+CMGD=0,1`).
    pub async fn delete_all_read(
        &mut self,
        session: &mut CommandSession,
        bank: Bank,
    ) -> ModemResult<DeleteOutcome> {
        if !self.guard.is_enabled() {
            return Ok(DeleteOutcome::Disabled);
        }
        let command = bank.select_command();
        let reply = session.send_command(&command, session.timing().status).await?;
        if !is_ok(&reply) {
            self.protocol_mismatch(&command, &reply);
            return Ok(DeleteOutcome::Failed);
        }
        let reply = session
            .send_command("AT+CMGD=0,1", session.timing().bulk_delete)
            .await?;
        if is_ok(&reply) {
            self.processed.clear_bank(bank);
            info!("{} cleared read messages in {}", self.device, bank);
            Ok(DeleteOutcome::Deleted)
        } else {
            warn!(
                "{} bulk delete in {} failed: {}",
                self.device,
                bank,
                escape_log(&reply)
            );
            Ok(DeleteOutcome::Failed)
        }
    }

    /// Yields the disable reason once, right after the guard trips.
    pub fn take_disable_notice(&mut self) -> Option<DisableReason> {
        self.guard.take_notice()
    }

    fn invalid_index(&mut self, index: i64) {
        let first = self.guard.record_invalid_index(index);
        warn!(
            "{} reported invalid message index {}; deletion disabled",
            self.device, index
        );
        if first {
            warn!(
                "{} dropping {} processed keys: storage indices can no longer be trusted",
                self.device,
                self.processed.len()
            );
            self.processed.clear();
        }
    }

    fn protocol_mismatch(&self, command: &str, reply: &str) {
        metrics::inc_protocol_error();
        warn!(
            "{} unexpected response to {}: {}",
            self.device,
            command,
            escape_log(reply)
        );
    }
}
