use std::sync::Arc;

use crate::address::CommAddress;
use crate::error::CommError;
use crate::header::CommHeader;

/// Application-visible occurrence delivered through a `DispatchHandler`.
///
/// This mirrors the original `Event` class's kinds: a received message, a
/// terminal error on a request or connection, a peer disconnect, a
/// newly-established outbound connection, and a fired timer.
#[derive(Debug, Clone)]
pub enum CommEvent {
    Message {
        addr: CommAddress,
        header: CommHeader,
        payload: Arc<Vec<u8>>,
    },
    Error {
        addr: CommAddress,
        error: CommErrorCode,
    },
    Disconnect {
        addr: CommAddress,
    },
    ConnectionEstablished {
        addr: CommAddress,
    },
    Timer,
}

/// Copy of the status codes in `CommError` that can ride inside a
/// `CommEvent`, which itself must stay `Clone` for fan-out to multiple
/// waiters (`CommError` wraps `std::io::Error`, which is not `Clone`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommErrorCode {
    BrokenConnection,
    RequestTimeout,
    SendError,
    ReceiveError,
}

impl From<CommErrorCode> for CommError {
    fn from(code: CommErrorCode) -> CommError {
        match code {
            CommErrorCode::BrokenConnection => CommError::BrokenConnection,
            CommErrorCode::RequestTimeout => CommError::RequestTimeout,
            CommErrorCode::SendError => CommError::SendError(String::new()),
            CommErrorCode::ReceiveError => CommError::ReceiveError(String::new()),
        }
    }
}

/// Callback through which `CommEvent`s are delivered to application code.
/// Implementations run on a reactor thread and must not block.
pub trait DispatchHandler: Send + Sync {
    fn handle(&self, event: CommEvent);
}

impl<F: Fn(CommEvent) + Send + Sync> DispatchHandler for F {
    fn handle(&self, event: CommEvent) {
        (self)(event)
    }
}
