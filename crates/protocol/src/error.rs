use std::fmt::{self, Display, Formatter};

/// The kind of error a backend reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The backend could not be reached at all.
    Network,
    /// The backend answered with a non-2xx status.
    Http {
        /// The HTTP status code.
        status: u16,
    },
    /// The backend reported an error explicitly (an `error` event or an
    /// error field in the body).
    Backend,
    /// The response could not be decoded.
    InvalidPayload,
    /// The response channel closed before the exchange was complete.
    Interrupted,
    /// The backend stopped generating on request.
    Aborted,
}

impl ErrorKind {
    /// Returns `true` if resubmitting the same request may succeed.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Interrupted)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "network error"),
            ErrorKind::Http { status } => write!(f, "http status {status}"),
            ErrorKind::Backend => write!(f, "backend error"),
            ErrorKind::InvalidPayload => write!(f, "invalid payload"),
            ErrorKind::Interrupted => write!(f, "stream interrupted"),
            ErrorKind::Aborted => write!(f, "aborted"),
        }
    }
}
