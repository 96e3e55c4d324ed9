use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// No usable connection and the command was not buffered.
    Disconnected(String),
    /// The per-command retry bound was exhausted.
    Timeout { command: String, attempts: u32 },
    /// The backend rejected or failed the command.
    Command(String),
    /// Establishing or driving a subscription failed.
    Subscription(String),
    /// An internal mutex was poisoned by a panicking thread.
    LockPoisoned(&'static str),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Disconnected(detail) => {
                write!(f, "backend disconnected: {}", detail)
            }
            BackendError::Timeout { command, attempts } => write!(
                f,
                "command {} timed out after {} attempts",
                command, attempts
            ),
            BackendError::Command(detail) => write!(f, "command failed: {}", detail),
            BackendError::Subscription(detail) => {
                write!(f, "subscription failed: {}", detail)
            }
            BackendError::LockPoisoned(what) => {
                write!(f, "backend lock poisoned during {}", what)
            }
        }
    }
}

impl Error for BackendError {}
