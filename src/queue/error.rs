use std::error::Error;
use std::fmt;

use crate::backend::BackendError;
use crate::codec::CodecError;

#[derive(Debug)]
pub enum QueueError {
    /// The backend command underneath failed.
    Backend(BackendError),
    /// A message could not be (de)serialized.
    Codec(CodecError),
    /// `confirm` removed a number of entries other than exactly one.
    ///
    /// Either the same handle was confirmed twice or a second consumer
    /// is draining the processing list.
    ConfirmInconsistency { removed: u64 },
    /// A wait was cancelled through its control flag.
    Cancelled,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Backend(e) => write!(f, "queue backend failure: {}", e),
            QueueError::Codec(e) => write!(f, "queue codec failure: {}", e),
            QueueError::ConfirmInconsistency { removed } => write!(
                f,
                "confirm removed {} entries from the processing list instead of 1",
                removed
            ),
            QueueError::Cancelled => write!(f, "wait for queue signal cancelled"),
        }
    }
}

impl Error for QueueError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            QueueError::Backend(e) => Some(e),
            QueueError::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for QueueError {
    fn from(e: BackendError) -> Self {
        QueueError::Backend(e)
    }
}

impl From<CodecError> for QueueError {
    fn from(e: CodecError) -> Self {
        QueueError::Codec(e)
    }
}
