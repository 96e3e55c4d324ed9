use std::error::Error;
use std::fmt;

use crate::backend::BackendError;
use crate::codec::CodecError;

/// Failure of a direct snapshot read.
#[derive(Debug)]
pub enum ReadError {
    Backend(BackendError),
    Codec(CodecError),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Backend(e) => write!(f, "read failed: {}", e),
            ReadError::Codec(e) => write!(f, "read decode failed: {}", e),
        }
    }
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadError::Backend(e) => Some(e),
            ReadError::Codec(e) => Some(e),
        }
    }
}

impl From<BackendError> for ReadError {
    fn from(e: BackendError) -> Self {
        ReadError::Backend(e)
    }
}

impl From<CodecError> for ReadError {
    fn from(e: CodecError) -> Self {
        ReadError::Codec(e)
    }
}

/// Terminal condition delivered to a subscriber's error callback.
///
/// Exactly one of these is delivered per subscription lifetime;
/// transient transport trouble is handled internally by
/// resubscribing.
#[derive(Debug)]
pub enum SubscribeError {
    /// No state object exists under the requested key.
    MissingState { key: String },
    /// The subscription was ended deliberately.
    Unsubscribed,
    /// The persisted state record could not be decoded.
    Codec(CodecError),
}

impl fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeError::MissingState { key } => {
                write!(f, "missing state object for key '{}'", key)
            }
            SubscribeError::Unsubscribed => write!(f, "unsubscribed"),
            SubscribeError::Codec(e) => write!(f, "state record decode failed: {}", e),
        }
    }
}

impl Error for SubscribeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SubscribeError::Codec(e) => Some(e),
            _ => None,
        }
    }
}
