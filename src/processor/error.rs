use std::error::Error;
use std::fmt;

use crate::backend::BackendError;
use crate::codec::CodecError;
use crate::queue::QueueError;

#[derive(Debug)]
pub enum ProcessorError {
    /// Every lock acquisition attempt found the lock held.
    LockAttemptsExhausted { attempts: u32 },
    /// The post-write verification read returned someone else's id.
    LockLost {
        expected: String,
        actual: Option<String>,
    },
    /// The backend reported no usable connection.
    Disconnected,
    Backend(BackendError),
    Queue(QueueError),
    Codec(CodecError),
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorError::LockAttemptsExhausted { attempts } => write!(
                f,
                "singleton lock still held after {} acquisition attempts",
                attempts
            ),
            ProcessorError::LockLost { expected, actual } => write!(
                f,
                "singleton lock verification failed: expected {}, found {}",
                expected,
                actual.as_deref().unwrap_or("nothing")
            ),
            ProcessorError::Disconnected => write!(f, "backend is disconnected"),
            ProcessorError::Backend(e) => write!(f, "backend failure: {}", e),
            ProcessorError::Queue(e) => write!(f, "queue failure: {}", e),
            ProcessorError::Codec(e) => write!(f, "codec failure: {}", e),
        }
    }
}

impl Error for ProcessorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProcessorError::Backend(e) => Some(e),
            ProcessorError::Queue(e) => Some(e),
            ProcessorError::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for ProcessorError {
    fn from(e: BackendError) -> Self {
        ProcessorError::Backend(e)
    }
}

impl From<QueueError> for ProcessorError {
    fn from(e: QueueError) -> Self {
        ProcessorError::Queue(e)
    }
}

impl From<CodecError> for ProcessorError {
    fn from(e: CodecError) -> Self {
        ProcessorError::Codec(e)
    }
}
