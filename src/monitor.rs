//! # Per-device monitor loop
//!
//! A [`DeviceMonitor`] owns everything that belongs to one modem: the command session
//! (and with it the transport), the SMS engine and the call monitor. It runs as its own
//! task. Each tick it:
//!
//! 1. applies control messages queued by the forwarder (delete / evict),
//! 2. checks unsolicited input for calls,
//! 3. every `poll_every` ticks runs one SMS poll under its own timeout,
//! 4. reports a tripped delete guard once,
//! 5. refreshes its status board entry when due.
//!
//! Call checks and SMS polls never overlap; both go through the same session. A fatal
//! transport error marks the device disconnected and ends the task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::call::{CallEvent, CallMonitor};
use crate::metrics;
use crate::modem::{CommandSession, ModemError, ModemResult};
use crate::sms::{Bank, DedupKey, DeleteOutcome, DisableReason, SmsEngine, SmsMessage};
use crate::status::{self, StatusBoard};

/// Emitted by device tasks to the forwarder.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Sms { device: String, message: SmsMessage },
    Call { device: String, call: CallEvent },
    DeletionDisabled { device: String, reason: DisableReason },
    Disconnected { device: String, reason: String },
    Stopped { device: String },
}

impl DeviceEvent {
    pub fn device(&self) -> &str {
        match self {
            DeviceEvent::Sms { device, .. }
            | DeviceEvent::Call { device, .. }
            | DeviceEvent::DeletionDisabled { device, .. }
            | DeviceEvent::Disconnected { device, .. }
            | DeviceEvent::Stopped { device } => device,
        }
    }
}

/// Sent by the forwarder to the task owning the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceControl {
    Delete(DedupKey),
    Evict(DedupKey),
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub tick: Duration,
    /// Run an SMS poll every this many ticks.
    pub poll_every: u64,
    pub poll_timeout: Duration,
    pub status_refresh: Duration,
    pub banks: Vec<Bank>,
}

impl MonitorSettings {
    /// Ticks per poll for a poll interval, at least one.
    pub fn ticks_per_poll(poll_interval: Duration, tick: Duration) -> u64 {
        if tick.is_zero() {
            return 1;
        }
        ((poll_interval.as_millis() / tick.as_millis().max(1)) as u64).max(1)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        let tick = Duration::from_millis(100);
        Self {
            tick,
            poll_every: Self::ticks_per_poll(Duration::from_secs(10), tick),
            poll_timeout: Duration::from_secs(30),
            status_refresh: Duration::from_secs(300),
            banks: vec![Bank::Device],
        }
    }
}

/// Channels and shared state a monitor is wired to.
pub struct MonitorLinks {
    pub events: mpsc::UnboundedSender<DeviceEvent>,
    pub control: mpsc::UnboundedReceiver<DeviceControl>,
    pub running: Arc<AtomicBool>,
    pub board: StatusBoard,
}

pub struct DeviceMonitor {
    name: String,
    session: CommandSession,
    sms: SmsEngine,
    calls: CallMonitor,
    settings: MonitorSettings,
    links: MonitorLinks,
}

impl DeviceMonitor {
    pub fn new(
        session: CommandSession,
        sms: SmsEngine,
        settings: MonitorSettings,
        links: MonitorLinks,
    ) -> Self {
        let name = session.device().to_string();
        Self {
            calls: CallMonitor::new(&name),
            name,
            session,
            sms,
            settings,
            links,
        }
    }

    pub async fn run(mut self) {
        info!(
            "{} monitor started (poll every {} ticks of {:?})",
            self.name, self.settings.poll_every, self.settings.tick
        );
        let mut tick: u64 = 0;
        let mut last_refresh = Instant::now();

        while self.links.running.load(Ordering::SeqCst) {
            if let Err(e) = self.iteration(tick, &mut last_refresh).await {
                if e.is_fatal() {
                    self.flush_ready();
                    self.disconnect(&e);
                    return;
                }
                warn!("{} {}", self.name, e);
            }
            tick = tick.wrapping_add(1);
            tokio::time::sleep(self.settings.tick).await;
        }

        self.session.close();
        info!("{} monitor stopped", self.name);
        self.emit(DeviceEvent::Stopped {
            device: self.name.clone(),
        });
    }

    async fn iteration(&mut self, tick: u64, last_refresh: &mut Instant) -> ModemResult<()> {
        self.apply_controls().await?;

        if let Some(call) = self.calls.check(&mut self.session).await? {
            self.emit(DeviceEvent::Call {
                device: self.name.clone(),
                call,
            });
        }

        if tick % self.settings.poll_every.max(1) == 0 {
            self.poll_sms().await?;
        }

        self.report_disable_notice();

        if last_refresh.elapsed() >= self.settings.status_refresh {
            *last_refresh = Instant::now();
            self.refresh_status().await?;
        }
        Ok(())
    }

    async fn apply_controls(&mut self) -> ModemResult<()> {
        while let Ok(control) = self.links.control.try_recv() {
            match control {
                DeviceControl::Delete(key) => {
                    let outcome = self.sms.delete(&mut self.session, key).await?;
                    if outcome == DeleteOutcome::Disabled {
                        debug!("{} kept {}: deletion disabled", self.name, key);
                    }
                }
                DeviceControl::Evict(key) => {
                    self.sms.evict(key);
                }
            }
        }
        Ok(())
    }

    async fn poll_sms(&mut self) -> ModemResult<()> {
        let limit = self.settings.poll_timeout;
        match tokio::time::timeout(limit, self.sms.poll(&mut self.session)).await {
            Ok(result) => {
                let messages = result?;
                for message in messages {
                    self.emit(DeviceEvent::Sms {
                        device: self.name.clone(),
                        message,
                    });
                }
            }
            Err(_) => {
                let err = ModemError::Timeout {
                    operation: "sms poll",
                    seconds: limit.as_secs(),
                };
                warn!("{} {}", self.name, err);
                self.flush_ready();
            }
        }
        Ok(())
    }

    fn flush_ready(&mut self) {
        for message in self.sms.take_ready() {
            self.emit(DeviceEvent::Sms {
                device: self.name.clone(),
                message,
            });
        }
    }

    fn report_disable_notice(&mut self) {
        if let Some(reason) = self.sms.take_disable_notice() {
            error!("{} message deletion disabled: {}", self.name, reason);
            self.links.board.set_deletion_enabled(&self.name, false);
            self.emit(DeviceEvent::DeletionDisabled {
                device: self.name.clone(),
                reason,
            });
        }
    }

    async fn refresh_status(&mut self) -> ModemResult<()> {
        let port = self
            .links
            .board
            .get(&self.name)
            .map(|s| s.port)
            .unwrap_or_default();
        let mut snapshot =
            status::query_status(&mut self.session, &port, &self.settings.banks).await?;
        snapshot.deletion_enabled = self.sms.deletion_enabled();
        debug!("{} status: {}", self.name, snapshot.summary());
        self.links.board.update(snapshot);
        Ok(())
    }

    fn disconnect(&mut self, err: &ModemError) {
        error!("{} disconnected: {}", self.name, err);
        metrics::inc_device_disconnected();
        self.session.close();
        self.links
            .board
            .mark_disconnected(&self.name, &err.to_string());
        self.emit(DeviceEvent::Disconnected {
            device: self.name.clone(),
            reason: err.to_string(),
        });
    }

    fn emit(&self, event: DeviceEvent) {
        if self.links.events.send(event).is_err() {
            debug!("{} event dropped: forwarder gone", self.name);
        }
    }
}
