//! # smsgate - SMS and Call Forwarding for AT-Command Modems
//!
//! smsgate keeps a live command/response session with one or more cellular modems over
//! serial ports, picks inbound SMS and incoming voice calls out of the AT-command text
//! protocol and forwards each event exactly once to Telegram.
//!
//! ## Features
//!
//! - **Multi-Device**: One monitor task per modem; a failing modem never stalls the others.
//! - **Exactly-Once Forwarding**: Per-device dedup of storage slots, delete only after a
//!   confirmed delivery, re-delivery on the next poll when the sink fails.
//! - **Delete Safety**: Corrupted storage indices or repeated delete failures switch
//!   deletion off for that modem (one-way) and warn the operator.
//! - **Call Alerts**: `RING` triggers a call-list query; repeated rings of the same call
//!   are reported once.
//! - **Status Snapshots**: Signal quality, network registration and storage usage per modem.
//! - **Event Log**: Every forwarded event is appended to a JSON lines file for `smsgate history`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smsgate::config::Config;
//! use smsgate::forwarder::Forwarder;
//! use smsgate::notify::LogNotifier;
//! use smsgate::storage::JsonlEventStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let store = JsonlEventStore::open(&config.storage.data_dir).await?;
//!
//!     let mut forwarder = Forwarder::new(config, LogNotifier, store);
//!     forwarder.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`modem`] - transports, the timed command session and the response parsers
//! - [`sms`] - SMS polling, dedup and the delete-safety guard
//! - [`call`] - incoming call detection and debouncing
//! - [`monitor`] - the per-device loop
//! - [`forwarder`] - device orchestration and event dispatch
//! - [`notify`] - notification sinks and message formatting
//! - [`storage`] - append-only event log
//! - [`status`] - device status snapshots
//! - [`config`] - configuration management and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Forwarder     │ ← Dispatch, notifier + event store
//! └─────────────────┘
//!     ▲         │ delete / evict
//!     │ events  ▼
//! ┌─────────────────┐
//! │ Device Monitors │ ← One task per modem: SMS engine + call monitor
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Command Session │ ← AT commands over serial
//! └─────────────────┘
//! ```

pub mod call;
pub mod config;
pub mod forwarder;
pub mod logutil;
pub mod metrics;
pub mod modem;
pub mod monitor;
pub mod notify;
pub mod sms;
pub mod status;
pub mod storage;
