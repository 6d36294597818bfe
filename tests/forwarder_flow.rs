//! Forwarder scenarios: delivery, sink failure, delete guard, call alert and disconnect,
//! driven through scripted modems attached to a real forwarder.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use smsgate::config::{Config, DeviceConfig, TimingConfig};
use smsgate::forwarder::Forwarder;
use smsgate::modem::mock::{listing_reply, read_reply, ScriptHandle, ScriptedTransport, OK_REPLY};
use smsgate::notify::Notifier;
use smsgate::status::DeviceState;
use smsgate::storage::{EventKind, JsonlEventStore};
use tempfile::TempDir;

const CMGL: &str = "AT+CMGL=\"ALL\"";

/// Collects delivered texts; the first `failures` deliveries fail.
#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    failures: Arc<AtomicUsize>,
}

impl RecordingNotifier {
    fn failing(times: usize) -> Self {
        let notifier = Self::default();
        notifier.failures.store(times, Ordering::SeqCst);
        notifier
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn count_containing(&self, needle: &str) -> usize {
        self.sent().iter().filter(|t| t.contains(needle)).count()
    }
}

impl Notifier for RecordingNotifier {
    async fn deliver(&self, text: &str) -> Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("sink unavailable");
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.forwarder.tick_ms = 10;
    config.forwarder.poll_interval_secs = 1;
    config.forwarder.status_refresh_secs = 3600;
    config.forwarder.shutdown_timeout_secs = 2;
    config.forwarder.notify_startup = false;
    config.timing = TimingConfig {
        status: 0,
        list: 0,
        read: 0,
        delete: 0,
        bulk_delete: 0,
        registration_toggle: 0,
        call_query_delay: 0,
        open_settle: 0,
    };
    config.storage.data_dir = dir.path().to_string_lossy().into_owned();
    config
}

async fn forwarder_with_modem(
    config: Config,
    notifier: RecordingNotifier,
    dir: &TempDir,
) -> (Forwarder<RecordingNotifier, JsonlEventStore>, ScriptHandle) {
    let store = JsonlEventStore::open(dir.path()).await.unwrap();
    let (transport, modem) = ScriptedTransport::modem();
    let mut forwarder = Forwarder::new(config, notifier, store);
    forwarder
        .attach("modem-a", "/dev/mock0", Box::new(transport))
        .await
        .unwrap();
    (forwarder, modem)
}

async fn run_for(forwarder: &mut Forwarder<RecordingNotifier, JsonlEventStore>, ms: u64) {
    assert_eq!(forwarder.start(), 1);
    forwarder
        .dispatch_until(tokio::time::sleep(Duration::from_millis(ms)))
        .await;
    forwarder.shutdown().await;
}

#[tokio::test]
async fn delivered_sms_is_recorded_then_deleted() {
    let dir = TempDir::new().unwrap();
    let notifier = RecordingNotifier::default();
    let (mut forwarder, modem) =
        forwarder_with_modem(test_config(&dir), notifier.clone(), &dir).await;
    modem.respond_once(CMGL, &listing_reply(&[0]));
    modem.respond(
        "AT+CMGR=0",
        &read_reply("+61412345678", "25/10/25,19:33:13+44", "Hello there"),
    );
    modem.respond("AT+CMGD=0,0", OK_REPLY);

    run_for(&mut forwarder, 500).await;

    assert_eq!(notifier.count_containing("Hello there"), 1);
    assert_eq!(modem.count("AT+CMGD=0,0"), 1);
    assert!(modem.is_closed());

    let events = forwarder.store().recent(10, Some(EventKind::Sms)).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].number, "+61412345678");
    assert_eq!(events[0].device, "modem-a");

    let last = notifier.sent().pop().unwrap();
    assert!(last.contains("SMS Forwarder Stopped"));
}

#[tokio::test]
async fn failed_delivery_keeps_message_and_retries_next_poll() {
    let dir = TempDir::new().unwrap();
    let notifier = RecordingNotifier::failing(1);
    let (mut forwarder, modem) =
        forwarder_with_modem(test_config(&dir), notifier.clone(), &dir).await;
    modem.respond_once(CMGL, &listing_reply(&[0]));
    modem.respond_once(CMGL, &listing_reply(&[0]));
    modem.respond(
        "AT+CMGR=0",
        &read_reply("+61412345678", "25/10/25,19:33:13+44", "Retry me"),
    );
    modem.respond("AT+CMGD=0,0", OK_REPLY);

    run_for(&mut forwarder, 2500).await;

    assert_eq!(modem.count("AT+CMGR=0"), 2);
    assert_eq!(notifier.count_containing("Retry me"), 1);
    assert_eq!(modem.count("AT+CMGD=0,0"), 1);
    let events = forwarder.store().recent(10, None).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn corrupted_index_disables_deletion_and_warns_once() {
    let dir = TempDir::new().unwrap();
    let notifier = RecordingNotifier::default();
    let (mut forwarder, modem) =
        forwarder_with_modem(test_config(&dir), notifier.clone(), &dir).await;
    modem.respond_once(CMGL, &listing_reply(&[0, 5000]));
    modem.respond(
        "AT+CMGR=0",
        &read_reply("+61412345678", "25/10/25,19:33:13+44", "Still forwarded"),
    );
    modem.respond("AT+CMGD=0,0", OK_REPLY);
    let board = forwarder.status_board();

    run_for(&mut forwarder, 500).await;

    assert_eq!(notifier.count_containing("Still forwarded"), 1);
    assert_eq!(notifier.count_containing("smsgate clear --device modem-a"), 1);
    assert_eq!(modem.count("AT+CMGD=0,0"), 0);
    assert!(!board.get("modem-a").unwrap().deletion_enabled);
}

#[tokio::test]
async fn incoming_call_is_notified_and_recorded() {
    let dir = TempDir::new().unwrap();
    let notifier = RecordingNotifier::default();
    let (mut forwarder, modem) =
        forwarder_with_modem(test_config(&dir), notifier.clone(), &dir).await;
    modem.respond(
        "AT+CLCC",
        "\r\n+CLCC: 1,1,4,0,0,\"+61455555555\",145\r\n\r\nOK\r\n",
    );
    modem.inject("\r\nRING\r\n");

    run_for(&mut forwarder, 300).await;

    assert_eq!(notifier.count_containing("Incoming Call"), 1);
    let calls = forwarder
        .store()
        .recent(10, Some(EventKind::Call))
        .await
        .unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].number, "+61455555555");
}

#[tokio::test]
async fn unplugged_modem_is_reported_and_dispatch_ends() {
    let dir = TempDir::new().unwrap();
    let notifier = RecordingNotifier::default();
    let (mut forwarder, modem) =
        forwarder_with_modem(test_config(&dir), notifier.clone(), &dir).await;
    let board = forwarder.status_board();
    modem.unplug();

    let started = std::time::Instant::now();
    run_for(&mut forwarder, 10_000).await;

    assert!(started.elapsed() < Duration::from_secs(8));
    assert_eq!(notifier.count_containing("SMS Forwarder Error"), 1);
    assert_eq!(board.get("modem-a").unwrap().state, DeviceState::Disconnected);
}

#[tokio::test]
async fn run_aborts_when_no_device_connects() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.forwarder.notify_startup = true;
    config.devices = vec![DeviceConfig {
        name: "ghost".to_string(),
        port: "/dev/smsgate-missing-port".to_string(),
        baud_rate: 115200,
        read_timeout_ms: 100,
    }];
    let notifier = RecordingNotifier::default();
    let store = JsonlEventStore::open(dir.path()).await.unwrap();
    let mut forwarder = Forwarder::new(config, notifier.clone(), store);

    let err = forwarder.run().await.unwrap_err();
    assert!(err.to_string().contains("No devices connected"));
    assert_eq!(notifier.count_containing("No devices connected"), 1);
    assert_eq!(notifier.count_containing("<b>❌ ghost</b>"), 1);
}
