use std::fmt;

/// Stable classification of runtime failures, shared across every module.
///
/// The discriminants are part of the public contract: embedders may persist
/// or transmit them, so existing values never change meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Not an error. Present so the code space has a well-known zero.
    Ok = 0,
    /// An argument was outside the accepted domain.
    InvalidArgument = 1,
    /// The requested value is not available yet.
    NotReady = 2,
    /// A deadline elapsed before the operation completed.
    Timeout = 3,
    /// The operation observed a cancellation request.
    Canceled = 4,
    /// The target resource is closed.
    Closed = 5,
    /// A counter or buffer exceeded its capacity.
    Overflow = 6,
    /// The component has been stopped.
    Stopped = 7,
    /// A bounded queue is full.
    QueueFull = 8,
    /// The component refused to accept the operation.
    Rejected = 9,
    /// The operation is not available on this platform.
    NotSupported = 10,
}

impl ErrorKind {
    /// The stable wire code for this kind.
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Ok => "ok",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotReady => "not ready",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Closed => "closed",
            ErrorKind::Overflow => "overflow",
            ErrorKind::Stopped => "stopped",
            ErrorKind::QueueFull => "queue full",
            ErrorKind::Rejected => "rejected",
            ErrorKind::NotSupported => "not supported",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A runtime operation failure carrying an [`ErrorKind`].
///
/// Every fallible awaitable in this crate resolves to `Result<_, Error>`;
/// panics inside task bodies travel on a separate channel (see
/// [`JoinError`](crate::task::JoinError)) and are never folded into this
/// type.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        debug_assert!(kind != ErrorKind::Ok, "ErrorKind::Ok is not an error");
        Self { kind }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Shorthand for `self.kind().code()`.
    pub fn code(&self) -> u8 {
        self.kind.code()
    }

    pub fn is_canceled(&self) -> bool {
        self.kind == ErrorKind::Canceled
    }

    pub(crate) fn canceled() -> Self {
        Self::new(ErrorKind::Canceled)
    }

    pub(crate) fn not_ready() -> Self {
        Self::new(ErrorKind::NotReady)
    }

    pub(crate) fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    pub(crate) fn stopped() -> Self {
        Self::new(ErrorKind::Stopped)
    }

    pub(crate) fn rejected() -> Self {
        Self::new(ErrorKind::Rejected)
    }

    pub(crate) fn invalid_argument() -> Self {
        Self::new(ErrorKind::InvalidArgument)
    }

    #[allow(dead_code)]
    pub(crate) fn not_supported() -> Self {
        Self::new(ErrorKind::NotSupported)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}
