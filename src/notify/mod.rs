//! # Notification sinks
//!
//! The forwarder hands every formatted notification to a [`Notifier`]. Delivery is
//! attempted once; a failure is reported back so the caller can decide what to retry.
//!
//! - [`TelegramNotifier`] posts to the Telegram Bot API (feature `telegram`).
//! - [`LogNotifier`] writes notifications to the log, for dry runs without a bot.

pub mod format;
#[cfg(feature = "telegram")]
mod telegram;

#[cfg(feature = "telegram")]
pub use telegram::TelegramNotifier;

use anyhow::Result;
use log::info;

use crate::logutil::escape_log;

#[allow(async_fn_in_trait)]
pub trait Notifier {
    /// Deliver one notification text.
    async fn deliver(&self, text: &str) -> Result<()>;

    /// Check that the sink is reachable and the credentials work.
    async fn health_check(&self) -> Result<()>;
}

/// Writes notifications to the log at info level.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn deliver(&self, text: &str) -> Result<()> {
        info!("notification: {}", escape_log(text));
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
