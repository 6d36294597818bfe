use thiserror::Error;

/// Errors raised while talking to a modem.
///
/// Only [`ModemError::Transport`] and [`ModemError::NotConnected`] are fatal for a
/// device loop; protocol mismatches are reported so callers can log them, but they
/// always degrade to "no result".
#[derive(Debug, Error)]
pub enum ModemError {
    /// Open, read or write failure on the underlying port.
    #[error("transport error on {port}: {reason}")]
    Transport { port: String, reason: String },

    /// The transport has been closed or was never opened.
    #[error("device not connected")]
    NotConnected,

    /// A response did not match any known shape for the command.
    #[error("unexpected response to {command}: {response}")]
    Protocol { command: String, response: String },

    /// An operation exceeded its own time budget.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },
}

impl ModemError {
    pub fn transport(port: &str, err: impl std::fmt::Display) -> Self {
        ModemError::Transport {
            port: port.to_string(),
            reason: err.to_string(),
        }
    }

    /// True for errors after which the device must be treated as disconnected.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ModemError::Transport { .. } | ModemError::NotConnected)
    }
}

pub type ModemResult<T> = Result<T, ModemError>;
