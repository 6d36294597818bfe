//! Notification texts (Telegram HTML parse mode).
//!
//! Anything that came from a modem or from config is escaped; only the fixed markup
//! written here reaches the sink unescaped.

use crate::call::CallEvent;
use crate::forwarder::ConnectionReport;
use crate::sms::{DisableReason, SmsMessage};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Escape `&`, `<` and `>` for Telegram's HTML mode.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

pub fn sms(device: &str, message: &SmsMessage) -> String {
    format!(
        "📱 <b>New SMS Received</b>\n\n\
         <b>Device:</b> {}\n\
         <b>From:</b> {}\n\
         <b>Date:</b> {}\n\n\
         <b>Message:</b>\n{}",
        escape_html(device),
        escape_html(&message.sender),
        message.received_at.format(TIME_FORMAT),
        escape_html(&message.text)
    )
}

pub fn call(device: &str, call: &CallEvent) -> String {
    format!(
        "📞 <b>Incoming Call</b>\n\n\
         <b>Device:</b> {}\n\
         <b>From:</b> {}\n\
         <b>Status:</b> {}\n\
         <b>Type:</b> {}\n\
         <b>Time:</b> {}",
        escape_html(device),
        escape_html(&call.number),
        call.status,
        call.mode,
        call.timestamp.format(TIME_FORMAT)
    )
}

pub fn startup(report: &ConnectionReport, poll_interval_secs: u64, delete_after_forward: bool) -> String {
    let status = if report.connected.is_empty() {
        "❌ No devices connected".to_string()
    } else if report.failed.is_empty() {
        format!("✅ {} device(s) connected", report.connected.len())
    } else {
        format!(
            "✅ {} device(s) connected\n⚠️ {} device(s) failed",
            report.connected.len(),
            report.failed.len()
        )
    };

    let mut devices = String::new();
    for dev in &report.connected {
        let signal = dev
            .signal
            .map(|s| s.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let storage = if dev.storage.is_empty() {
            "N/A".to_string()
        } else {
            dev.storage
                .iter()
                .map(|u| format!("{} {}/{}", u.bank, u.used, u.total))
                .collect::<Vec<_>>()
                .join(", ")
        };
        devices.push_str(&format!(
            "\n<b>✅ {}</b>\n  • Port: {}\n  • Signal: {}\n  • SMS Storage: {}\n",
            escape_html(&dev.name),
            escape_html(&dev.port),
            signal,
            storage
        ));
    }
    for dev in &report.failed {
        devices.push_str(&format!(
            "\n<b>❌ {}</b>\n  • Port: {}\n  • Status: {}\n",
            escape_html(&dev.name),
            escape_html(&dev.port),
            escape_html(dev.last_error.as_deref().unwrap_or("unknown error"))
        ));
    }

    format!(
        "🚀 <b>SMS Forwarder Started</b>\n\n\
         <b>Configuration:</b>\n\
         \u{20}\u{20}• Poll Interval: {} seconds\n\
         \u{20}\u{20}• Delete After Forward: {}\n\n\
         <b>Status:</b> {}\n{}\n\
         <b>✅ Monitoring for incoming SMS and calls...</b>",
        poll_interval_secs,
        if delete_after_forward { "Yes" } else { "No" },
        status,
        devices
    )
}

pub fn shutdown() -> String {
    "🛑 <b>SMS Forwarder Stopped</b>".to_string()
}

pub fn deletion_disabled(device: &str, reason: &DisableReason) -> String {
    format!(
        "⚠️ <b>Deletion Disabled for {}</b>\n\n\
         Automatic SMS deletion has been disabled: {}. \
         SMS will still be forwarded but not deleted.\n\n\
         To clear read SMS manually:\n\
         <code>smsgate clear --device {}</code>",
        escape_html(device),
        escape_html(&reason.to_string()),
        escape_html(device)
    )
}

pub fn disconnected(device: &str, reason: &str) -> String {
    format!(
        "⚠️ <b>SMS Forwarder Error</b>\n\n\
         <b>Device:</b> {}\n\
         Device disconnected: {}\n\n\
         Restart the forwarder once the modem is back.",
        escape_html(device),
        escape_html(reason)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallMode, CallStatus};
    use crate::sms::Bank;
    use crate::status::{BankUsage, DeviceStatus};
    use chrono::{Local, TimeZone};

    #[test]
    fn sms_text_is_escaped() {
        let msg = SmsMessage {
            bank: Bank::Device,
            index: 0,
            sender: "+61412345678".into(),
            text: "1 < 2 & <b>bold</b>".into(),
            status: "REC UNREAD".into(),
            received_at: Local.with_ymd_and_hms(2025, 10, 25, 19, 33, 13).unwrap(),
        };
        let out = sms("modem-a", &msg);
        assert!(out.starts_with("📱 <b>New SMS Received</b>"));
        assert!(out.contains("<b>From:</b> +61412345678"));
        assert!(out.contains("<b>Date:</b> 2025-10-25 19:33:13"));
        assert!(out.ends_with("1 &lt; 2 &amp; &lt;b&gt;bold&lt;/b&gt;"));
    }

    #[test]
    fn call_text_lists_status_and_mode() {
        let ev = CallEvent {
            id: 1,
            number: "Unknown".into(),
            status: CallStatus::Incoming,
            mode: CallMode::Voice,
            timestamp: Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
        };
        let out = call("modem-a", &ev);
        assert!(out.contains("<b>Status:</b> Incoming"));
        assert!(out.contains("<b>Type:</b> Voice"));
        assert!(out.contains("<b>Time:</b> 2025-01-02 03:04:05"));
    }

    #[test]
    fn startup_summarises_devices() {
        let mut ok = DeviceStatus::connected("a", "/dev/ttyUSB0");
        ok.storage.push(BankUsage {
            bank: Bank::Device,
            used: 2,
            total: 50,
        });
        let report = ConnectionReport {
            connected: vec![ok],
            failed: vec![DeviceStatus::disconnected("b", "/dev/ttyUSB1", "no such file")],
        };
        let out = startup(&report, 10, true);
        assert!(out.contains("✅ 1 device(s) connected\n⚠️ 1 device(s) failed"));
        assert!(out.contains("• SMS Storage: ME 2/50"));
        assert!(out.contains("• Signal: N/A"));
        assert!(out.contains("<b>❌ b</b>"));
        assert!(out.contains("• Status: no such file"));
        assert!(out.contains("Delete After Forward: Yes"));

        let none = startup(&ConnectionReport::default(), 5, false);
        assert!(none.contains("❌ No devices connected"));
    }

    #[test]
    fn deletion_warning_names_remedy() {
        let out = deletion_disabled("modem-a", &DisableReason::ConsecutiveFailures(5));
        assert!(out.contains("Deletion Disabled for modem-a"));
        assert!(out.contains("5 consecutive delete failures"));
        assert!(out.contains("<code>smsgate clear --device modem-a</code>"));
    }
}
