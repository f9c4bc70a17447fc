use thiserror::Error;

/// Error taxonomy surfaced by public `commio` operations.
///
/// Transient I/O conditions (`EAGAIN`, `EWOULDBLOCK`, `EINTR`, `EINPROGRESS`)
/// never reach this type: they are retried or absorbed inside the reactor.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("broken connection")]
    BrokenConnection,

    #[error("bind error: {0}")]
    BindError(String),

    #[error("listen error: {0}")]
    ListenError(String),

    #[error("connect error: {0}")]
    ConnectError(String),

    #[error("send error: {0}")]
    SendError(String),

    #[error("receive error: {0}")]
    ReceiveError(String),

    #[error("poll error: {0}")]
    PollError(String),

    #[error("request timeout")]
    RequestTimeout,

    #[error("conflicting address")]
    ConflictingAddress,

    #[error("invalid proxy: {0}")]
    InvalidProxy(String),

    #[error("already exists")]
    AlreadyExists,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CommResult<T> = Result<T, CommError>;
