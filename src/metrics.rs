//! Process-wide counters, logged by the forwarder at shutdown together with the
//! per-device breakdown.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

static SMS_FORWARDED: AtomicU64 = AtomicU64::new(0);
static DELIVERY_FAILURES: AtomicU64 = AtomicU64::new(0);
static CALLS_NOTIFIED: AtomicU64 = AtomicU64::new(0);
static DELETES_OK: AtomicU64 = AtomicU64::new(0);
static DELETES_FAILED: AtomicU64 = AtomicU64::new(0);
static PROTOCOL_ERRORS: AtomicU64 = AtomicU64::new(0);
static DEVICES_DISCONNECTED: AtomicU64 = AtomicU64::new(0);

static DEVICE_COUNTERS: OnceLock<Mutex<HashMap<String, DeviceCounter>>> = OnceLock::new();

pub fn inc_sms_forwarded(device: &str) {
    SMS_FORWARDED.fetch_add(1, Ordering::Relaxed);
    with_device(device, |c| c.sms = c.sms.saturating_add(1));
}
pub fn inc_delivery_failure() {
    DELIVERY_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_call_notified(device: &str) {
    CALLS_NOTIFIED.fetch_add(1, Ordering::Relaxed);
    with_device(device, |c| c.calls = c.calls.saturating_add(1));
}
pub fn inc_delete_ok() {
    DELETES_OK.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_delete_failed() {
    DELETES_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_protocol_error() {
    PROTOCOL_ERRORS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_device_disconnected() {
    DEVICES_DISCONNECTED.fetch_add(1, Ordering::Relaxed);
}

/// Events forwarded for one device during this run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCounter {
    pub sms: u64,
    pub calls: u64,
}

fn device_counter_lock() -> &'static Mutex<HashMap<String, DeviceCounter>> {
    DEVICE_COUNTERS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn with_device(device: &str, update: impl FnOnce(&mut DeviceCounter)) {
    let mut guard = device_counter_lock()
        .lock()
        .expect("device counter mutex poisoned");
    update(guard.entry(device.to_string()).or_default());
}

pub fn device_counters_snapshot() -> HashMap<String, DeviceCounter> {
    device_counter_lock()
        .lock()
        .expect("device counter mutex poisoned")
        .clone()
}

/// Per-device counters as one log-friendly line, sorted by device name,
/// e.g. `modem-a: sms=2 calls=1; modem-b: sms=0 calls=3`.
pub fn device_summary() -> String {
    let mut devices: Vec<(String, DeviceCounter)> = device_counters_snapshot().into_iter().collect();
    devices.sort_by(|a, b| a.0.cmp(&b.0));
    devices
        .iter()
        .map(|(name, c)| format!("{}: sms={} calls={}", name, c.sms, c.calls))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub sms_forwarded: u64,
    pub delivery_failures: u64,
    pub calls_notified: u64,
    pub deletes_ok: u64,
    pub deletes_failed: u64,
    pub protocol_errors: u64,
    pub devices_disconnected: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        sms_forwarded: SMS_FORWARDED.load(Ordering::Relaxed),
        delivery_failures: DELIVERY_FAILURES.load(Ordering::Relaxed),
        calls_notified: CALLS_NOTIFIED.load(Ordering::Relaxed),
        deletes_ok: DELETES_OK.load(Ordering::Relaxed),
        deletes_failed: DELETES_FAILED.load(Ordering::Relaxed),
        protocol_errors: PROTOCOL_ERRORS.load(Ordering::Relaxed),
        devices_disconnected: DEVICES_DISCONNECTED.load(Ordering::Relaxed),
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sms_forwarded={} delivery_failures={} calls_notified={} deletes_ok={} deletes_failed={} protocol_errors={} devices_disconnected={}",
            self.sms_forwarded,
            self.delivery_failures,
            self.calls_notified,
            self.deletes_ok,
            self.deletes_failed,
            self.protocol_errors,
            self.devices_disconnected
        )
    }
}
