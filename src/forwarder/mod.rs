//! # Forwarder - Device Orchestration
//!
//! The [`Forwarder`] owns the configured devices, runs one [`DeviceMonitor`] task per
//! connected modem and is the only place that talks to the notification sink and the
//! event store. Device tasks send [`DeviceEvent`]s over one channel; the dispatch loop
//! handles them in arrival order and sends delete/evict requests back to the task that
//! owns the modem.
//!
//! ```text
//!  device task ─┐                          ┌─> Notifier
//!  device task ─┼─ DeviceEvent ─> dispatch ┤
//!  device task ─┘ <─ DeviceControl ───────┘└─> EventStore
//! ```
//!
//! SMS handling on the dispatch side:
//! - delivered: record it, then ask the device to delete the slot (if configured)
//! - not delivered: ask the device to evict the dedup key so the next poll reads and
//!   delivers it again; the slot is never deleted

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{Config, DeviceConfig};
use crate::logutil::escape_log;
use crate::metrics;
use crate::modem::parser::is_ok;
use crate::modem::{CommandSession, ModemError, ModemResult, Transport};
use crate::monitor::{DeviceControl, DeviceEvent, DeviceMonitor, MonitorLinks};
use crate::notify::{format, Notifier};
use crate::sms::SmsEngine;
use crate::status::{self, DeviceStatus, StatusBoard};
use crate::storage::EventStore;

/// Outcome of connecting the configured devices.
#[derive(Debug, Clone, Default)]
pub struct ConnectionReport {
    pub connected: Vec<DeviceStatus>,
    pub failed: Vec<DeviceStatus>,
}

struct PendingDevice {
    name: String,
    session: CommandSession,
}

struct DeviceHandle {
    control: mpsc::UnboundedSender<DeviceControl>,
    task: JoinHandle<()>,
}

enum Step {
    Event(DeviceEvent),
    Stop,
    Closed,
}

pub struct Forwarder<N: Notifier, S: EventStore> {
    config: Config,
    notifier: N,
    store: S,
    running: Arc<AtomicBool>,
    board: StatusBoard,
    pending: Vec<PendingDevice>,
    devices: HashMap<String, DeviceHandle>,
    live: HashSet<String>,
    events_tx: mpsc::UnboundedSender<DeviceEvent>,
    events_rx: mpsc::UnboundedReceiver<DeviceEvent>,
}

impl<N: Notifier, S: EventStore> Forwarder<N, S> {
    pub fn new(config: Config, notifier: N, store: S) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            notifier,
            store,
            running: Arc::new(AtomicBool::new(false)),
            board: StatusBoard::new(),
            pending: Vec::new(),
            devices: HashMap::new(),
            live: HashSet::new(),
            events_tx,
            events_rx,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn status_board(&self) -> StatusBoard {
        self.board.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open and probe every configured device.
    pub async fn connect_all(&mut self) -> ConnectionReport {
        let mut report = ConnectionReport::default();
        for device in self.config.devices.clone() {
            let opened = open_transport(&device, &self.config).await;
            let result = match opened {
                Ok(transport) => self
                    .attach(&device.name, &device.port, transport)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match result {
                Ok(status) => {
                    info!("✓ {} ({}): {}", device.name, device.port, status.summary());
                    report.connected.push(status);
                }
                Err(reason) => {
                    error!("✗ {} ({}): {}", device.name, device.port, reason);
                    let status = DeviceStatus::disconnected(&device.name, &device.port, reason);
                    self.board.update(status.clone());
                    report.failed.push(status);
                }
            }
        }
        report
    }

    /// Take over an already opened transport: liveness check, status snapshot, then
    /// queue it for [`start`](Self::start).
    pub async fn attach(
        &mut self,
        name: &str,
        port: &str,
        transport: Box<dyn Transport>,
    ) -> ModemResult<DeviceStatus> {
        let mut session = CommandSession::new(name, transport, self.config.timing.command_timing());
        let reply = session.send_command("AT", session.timing().status).await?;
        if !is_ok(&reply) {
            session.close();
            return Err(ModemError::Protocol {
                command: "AT".to_string(),
                response: escape_log(&reply),
            });
        }
        let status = status::query_status(&mut session, port, &self.config.forwarder.banks).await?;
        self.board.update(status.clone());
        self.pending.push(PendingDevice {
            name: name.to_string(),
            session,
        });
        Ok(status)
    }

    /// Spawn a monitor task for every attached device. Returns how many were started.
    pub fn start(&mut self) -> usize {
        self.running.store(true, Ordering::SeqCst);
        let settings = self.config.forwarder.monitor_settings();
        let mut started = 0;
        for pending in self.pending.drain(..) {
            let (control, control_rx) = mpsc::unbounded_channel();
            let links = MonitorLinks {
                events: self.events_tx.clone(),
                control: control_rx,
                running: self.running.clone(),
                board: self.board.clone(),
            };
            let sms = SmsEngine::new(&pending.name, self.config.sms_settings());
            let monitor = DeviceMonitor::new(pending.session, sms, settings.clone(), links);
            let task = tokio::spawn(monitor.run());
            self.live.insert(pending.name.clone());
            self.devices
                .insert(pending.name, DeviceHandle { control, task });
            started += 1;
        }
        info!("Started {} device monitor(s)", started);
        started
    }

    /// Full lifecycle: sink check, connect, announce, monitor until Ctrl-C, shut down.
    pub async fn run(&mut self) -> Result<()> {
        info!("Checking notification sink...");
        self.notifier
            .health_check()
            .await
            .map_err(|e| anyhow!("Notification sink unreachable: {}", e))?;

        let report = self.connect_all().await;
        info!(
            "{} device(s) connected, {} failed",
            report.connected.len(),
            report.failed.len()
        );
        if self.config.forwarder.notify_startup {
            let text = format::startup(
                &report,
                self.config.forwarder.poll_interval_secs,
                self.config.forwarder.delete_after_forward,
            );
            if let Err(e) = self.notifier.deliver(&text).await {
                warn!("Failed to send startup notification: {}", e);
            }
        }
        if report.connected.is_empty() {
            bail!("No devices connected");
        }

        self.start();
        self.dispatch_until(tokio::signal::ctrl_c()).await;
        self.shutdown().await;
        Ok(())
    }

    /// Handle device events until `stop` resolves or no device task is left.
    pub async fn dispatch_until<F: Future>(&mut self, stop: F) {
        tokio::pin!(stop);
        loop {
            if self.live.is_empty() {
                warn!("No device monitors left running");
                break;
            }
            let step = tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::Closed,
                },
                _ = &mut stop => Step::Stop,
            };
            match step {
                Step::Event(event) => self.handle_event(event).await,
                Step::Stop => {
                    info!("Received shutdown signal");
                    break;
                }
                Step::Closed => break,
            }
        }
    }

    pub async fn handle_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Sms { device, message } => {
                let key = message.key();
                let text = format::sms(&device, &message);
                match self.notifier.deliver(&text).await {
                    Ok(()) => {
                        metrics::inc_sms_forwarded(&device);
                        info!(
                            "Forwarded SMS {} from {} via {}",
                            key,
                            escape_log(&message.sender),
                            device
                        );
                        if let Err(e) = self
                            .store
                            .record_sms(&device, &message.sender, &message.text, message.received_at)
                            .await
                        {
                            warn!("Failed to record SMS {} from {}: {}", key, device, e);
                        }
                        if self.config.forwarder.delete_after_forward {
                            self.send_control(&device, DeviceControl::Delete(key));
                        }
                    }
                    Err(e) => {
                        metrics::inc_delivery_failure();
                        warn!(
                            "Failed to forward SMS {} from {}, will retry next poll: {}",
                            key, device, e
                        );
                        self.send_control(&device, DeviceControl::Evict(key));
                    }
                }
            }
            DeviceEvent::Call { device, call } => {
                let text = format::call(&device, &call);
                match self.notifier.deliver(&text).await {
                    Ok(()) => {
                        metrics::inc_call_notified(&device);
                        info!(
                            "Sent call notification for {} from {}",
                            escape_log(&call.number),
                            device
                        );
                        if let Err(e) = self
                            .store
                            .record_call(&device, &call.number, call.timestamp)
                            .await
                        {
                            warn!("Failed to record call from {}: {}", device, e);
                        }
                    }
                    Err(e) => {
                        metrics::inc_delivery_failure();
                        warn!("Failed to send call notification for {}: {}", device, e);
                    }
                }
            }
            DeviceEvent::DeletionDisabled { device, reason } => {
                let text = format::deletion_disabled(&device, &reason);
                if let Err(e) = self.notifier.deliver(&text).await {
                    warn!("Failed to send deletion warning for {}: {}", device, e);
                }
            }
            DeviceEvent::Disconnected { device, reason } => {
                self.live.remove(&device);
                self.board.mark_disconnected(&device, &reason);
                let text = format::disconnected(&device, &reason);
                if let Err(e) = self.notifier.deliver(&text).await {
                    warn!("Failed to send disconnect warning for {}: {}", device, e);
                }
            }
            DeviceEvent::Stopped { device } => {
                debug!("{} monitor reported stop", device);
                self.live.remove(&device);
            }
        }
    }

    fn send_control(&self, device: &str, control: DeviceControl) {
        match self.devices.get(device) {
            Some(handle) if handle.control.send(control).is_ok() => {}
            _ => debug!("{} gone; dropped {:?}", device, control),
        }
    }

    /// Stop every monitor, wait a bounded time for each, then announce the stop.
    pub async fn shutdown(&mut self) {
        info!("Shutting down forwarder...");
        self.running.store(false, Ordering::SeqCst);
        let budget = Duration::from_secs(self.config.forwarder.shutdown_timeout_secs);
        for (name, mut handle) in self.devices.drain() {
            match tokio::time::timeout(budget, &mut handle.task).await {
                Ok(Ok(())) => debug!("{} monitor joined", name),
                Ok(Err(e)) => warn!("{} monitor task failed: {}", name, e),
                Err(_) => {
                    warn!("{} monitor did not stop within {:?}; aborting", name, budget);
                    handle.task.abort();
                }
            }
        }
        self.live.clear();
        for pending in self.pending.iter_mut() {
            pending.session.close();
        }
        self.pending.clear();

        let mut dropped = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if matches!(event, DeviceEvent::Sms { .. }) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            info!("{} SMS left undelivered; they stay on the modem for the next run", dropped);
        }

        if let Err(e) = self.notifier.deliver(&format::shutdown()).await {
            warn!("Failed to send shutdown notification: {}", e);
        }
        info!("Metrics: {}", metrics::snapshot());
        let per_device = metrics::device_summary();
        if !per_device.is_empty() {
            info!("Per device: {}", per_device);
        }
    }
}

/// Open the serial port for `device` with the configured timings.
#[cfg(feature = "serial")]
pub async fn open_transport(device: &DeviceConfig, config: &Config) -> Result<Box<dyn Transport>> {
    let transport = crate::modem::SerialTransport::open(
        &device.port,
        device.baud_rate,
        device.read_timeout(),
        config.timing.command_timing().open_settle,
    )
    .await?;
    Ok(Box::new(transport))
}

#[cfg(not(feature = "serial"))]
pub async fn open_transport(device: &DeviceConfig, _config: &Config) -> Result<Box<dyn Transport>> {
    Err(anyhow!(
        "cannot open {}: built without the 'serial' feature",
        device.port
    ))
}

/// Open a device outside the forwarder (status, probe and clear commands).
pub async fn open_session(device: &DeviceConfig, config: &Config) -> Result<CommandSession> {
    let transport = open_transport(device, config).await?;
    Ok(CommandSession::new(
        &device.name,
        transport,
        config.timing.command_timing(),
    ))
}
