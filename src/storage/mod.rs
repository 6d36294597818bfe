//! # Event Store - Forwarded Event Log
//!
//! Every notification that reached the sink is recorded once, as one JSON object per line
//! in `<data_dir>/notifications.jsonl`. The log is append-only; appends take an exclusive
//! `fs2` lock so a concurrent `smsgate history` never sees a torn line.
//!
//! ```text
//! data/
//! └── notifications.jsonl   ← {"id":..,"device":..,"kind":"sms",..}
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use smsgate::storage::{EventStore, JsonlEventStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = JsonlEventStore::open("./data").await?;
//!     store.record_sms("modem-a", "+61412345678", "Hello", chrono::Local::now()).await?;
//!     for event in store.recent(10, None).await? {
//!         println!("{} {} {}", event.event_at, event.device, event.number);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Malformed lines are skipped on read.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Local, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::fs;

const EVENT_LOG: &str = "notifications.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Sms,
    Call,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Sms => f.write_str("sms"),
            EventKind::Call => f.write_str("call"),
        }
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sms" => Ok(EventKind::Sms),
            "call" => Ok(EventKind::Call),
            other => Err(anyhow!("unknown event kind '{}' (expected sms or call)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub device: String,
    pub kind: EventKind,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// When the modem received the SMS or the call rang.
    pub event_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub total: usize,
    pub sms: usize,
    pub calls: usize,
    pub last_24h: usize,
}

/// Sink for forwarded events.
#[allow(async_fn_in_trait)]
pub trait EventStore {
    async fn record_sms(
        &self,
        device: &str,
        number: &str,
        text: &str,
        timestamp: DateTime<Local>,
    ) -> Result<()>;

    async fn record_call(&self, device: &str, number: &str, timestamp: DateTime<Local>) -> Result<()>;
}

/// Append-only JSON lines file.
#[derive(Debug, Clone)]
pub struct JsonlEventStore {
    path: PathBuf,
}

impl JsonlEventStore {
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .map_err(|e| anyhow!("Failed to create data directory {}: {}", dir.display(), e))?;
        Ok(Self {
            path: dir.join(EVENT_LOG),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: &EventRecord) -> Result<()> {
        let line = serde_json::to_string(record)? + "\n";
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_file_locked(&path, &line)).await??;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<EventRecord>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).await?;
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }

    /// Newest first, optionally restricted to one kind.
    pub async fn recent(&self, limit: usize, kind: Option<EventKind>) -> Result<Vec<EventRecord>> {
        let mut events = self.load().await?;
        events.reverse();
        Ok(events
            .into_iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .take(limit)
            .collect())
    }

    /// Newest first, for one caller/sender number.
    pub async fn by_number(&self, number: &str, limit: usize) -> Result<Vec<EventRecord>> {
        let mut events = self.load().await?;
        events.reverse();
        Ok(events
            .into_iter()
            .filter(|e| e.number == number)
            .take(limit)
            .collect())
    }

    pub async fn stats(&self) -> Result<EventStats> {
        let events = self.load().await?;
        let cutoff = Utc::now() - Duration::hours(24);
        Ok(EventStats {
            total: events.len(),
            sms: events.iter().filter(|e| e.kind == EventKind::Sms).count(),
            calls: events.iter().filter(|e| e.kind == EventKind::Call).count(),
            last_24h: events.iter().filter(|e| e.recorded_at >= cutoff).count(),
        })
    }

    fn record(device: &str, kind: EventKind, number: &str, text: Option<&str>, at: DateTime<Local>) -> EventRecord {
        EventRecord {
            id: uuid::Uuid::new_v4().to_string(),
            device: device.to_string(),
            kind,
            number: number.to_string(),
            text: text.map(str::to_string),
            event_at: at.with_timezone(&Utc),
            recorded_at: Utc::now(),
        }
    }
}

impl EventStore for JsonlEventStore {
    async fn record_sms(
        &self,
        device: &str,
        number: &str,
        text: &str,
        timestamp: DateTime<Local>,
    ) -> Result<()> {
        self.append(&Self::record(device, EventKind::Sms, number, Some(text), timestamp))
            .await
    }

    async fn record_call(&self, device: &str, number: &str, timestamp: DateTime<Local>) -> Result<()> {
        self.append(&Self::record(device, EventKind::Call, number, None, timestamp))
            .await
    }
}

/// Append `content` to `path` while holding an exclusive lock on it.
fn append_file_locked(path: &Path, content: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;
    let written = file.write_all(content.as_bytes()).and_then(|_| file.flush());
    let _ = file.unlock();
    written?;
    Ok(())
}
