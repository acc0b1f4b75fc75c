//! Errors surfaced to the user of a widget.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use chatflow_embed_protocol::{BackendError, ErrorKind};

/// An error the widget reports, either as the result of an operation or
/// attached to a message that failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WidgetError {
    /// The backend could not be reached.
    Network {
        /// Details from the transport.
        message: String,
    },
    /// The backend answered with a non-2xx status.
    Http {
        /// The HTTP status code.
        status: u16,
        /// The message the backend sent along, if any.
        message: String,
    },
    /// The response stopped before it was complete.
    StreamInterrupted {
        /// Why the stream stopped.
        reason: InterruptReason,
        /// The text delivered before the interruption.
        partial: String,
    },
    /// The input was rejected before any request was issued.
    Validation(ValidationError),
    /// The exchange was cancelled by the user or the host.
    Cancelled,
    /// The backend reported an error explicitly.
    Backend {
        /// The message from the backend.
        message: String,
    },
    /// Another exchange is in flight and the widget rejects concurrent
    /// submissions.
    Busy,
    /// The widget has been destroyed.
    Destroyed,
}

/// Why a stream stopped early.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InterruptReason {
    /// The connection closed before the end of the answer.
    ConnectionClosed,
    /// Nothing arrived within the idle window.
    Timeout,
}

/// Input rejected before reaching the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Neither text nor attachments were given.
    EmptySubmission,
    /// An attachment has no data.
    EmptyAttachment,
    /// An attachment's type is not accepted.
    UnsupportedType {
        /// The rejected content type.
        content_type: String,
    },
    /// An attachment exceeds the size limit.
    TooLarge {
        /// Estimated size in bytes.
        size: usize,
        /// The configured limit in bytes.
        limit: usize,
    },
    /// No message has the given id.
    UnknownMessage,
    /// There is no answered question to ask again.
    NothingToRegenerate,
    /// The message can't be rated, either because it's not a finalized
    /// answer or because the backend didn't identify it.
    NotRateable,
    /// The chatflow does not collect feedback.
    FeedbackDisabled,
    /// The chatflow does not collect contact details.
    LeadsDisabled,
}

impl WidgetError {
    /// Converts a backend error, attaching the text delivered so far.
    pub fn from_backend(err: &dyn BackendError, partial: &str) -> Self {
        match err.kind() {
            ErrorKind::Network => WidgetError::Network {
                message: err.to_string(),
            },
            ErrorKind::Http { status } => WidgetError::Http {
                status,
                message: err.to_string(),
            },
            ErrorKind::Backend | ErrorKind::InvalidPayload => {
                WidgetError::Backend {
                    message: err.to_string(),
                }
            }
            ErrorKind::Interrupted => WidgetError::StreamInterrupted {
                reason: InterruptReason::ConnectionClosed,
                partial: partial.to_owned(),
            },
            ErrorKind::Aborted => WidgetError::Cancelled,
        }
    }

    /// Returns `true` if resubmitting may succeed.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WidgetError::Network { .. } | WidgetError::StreamInterrupted { .. }
        )
    }
}

impl Display for WidgetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WidgetError::Network { .. } => {
                f.write_str("Couldn't reach the server. Please try again.")
            }
            WidgetError::Http { status, message } if message.is_empty() => {
                write!(f, "The server responded with status {status}.")
            }
            WidgetError::Http { status, message } => {
                write!(f, "The server responded with status {status}: {message}")
            }
            WidgetError::StreamInterrupted {
                reason: InterruptReason::ConnectionClosed,
                ..
            } => f.write_str("The response was interrupted."),
            WidgetError::StreamInterrupted {
                reason: InterruptReason::Timeout,
                ..
            } => f.write_str("The server stopped responding."),
            WidgetError::Validation(err) => Display::fmt(err, f),
            WidgetError::Cancelled => f.write_str("Cancelled."),
            WidgetError::Backend { message } => f.write_str(message),
            WidgetError::Busy => {
                f.write_str("Please wait for the current answer to finish.")
            }
            WidgetError::Destroyed => f.write_str("The chat has been closed."),
        }
    }
}

impl Error for WidgetError {}

impl From<ValidationError> for WidgetError {
    #[inline]
    fn from(err: ValidationError) -> Self {
        WidgetError::Validation(err)
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptySubmission => {
                f.write_str("Type a message or attach a file.")
            }
            ValidationError::EmptyAttachment => f.write_str("The file is empty."),
            ValidationError::UnsupportedType { content_type } => {
                write!(f, "Files of type {content_type} are not supported.")
            }
            ValidationError::TooLarge { size, limit } => write!(
                f,
                "The file is too large ({size} bytes, limit is {limit} bytes)."
            ),
            ValidationError::UnknownMessage => {
                f.write_str("The message no longer exists.")
            }
            ValidationError::NothingToRegenerate => {
                f.write_str("There is no answer to regenerate.")
            }
            ValidationError::NotRateable => {
                f.write_str("This message can't be rated.")
            }
            ValidationError::FeedbackDisabled => {
                f.write_str("Feedback is turned off for this chat.")
            }
            ValidationError::LeadsDisabled => {
                f.write_str("This chat doesn't collect contact details.")
            }
        }
    }
}

impl Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeError(ErrorKind);

    impl Display for FakeError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "fake: {}", self.0)
        }
    }

    impl Error for FakeError {}

    impl BackendError for FakeError {
        fn kind(&self) -> ErrorKind {
            self.0
        }
    }

    #[test]
    fn test_from_backend() {
        let err = WidgetError::from_backend(
            &FakeError(ErrorKind::Interrupted),
            "Hel",
        );
        assert_eq!(
            err,
            WidgetError::StreamInterrupted {
                reason: InterruptReason::ConnectionClosed,
                partial: "Hel".to_owned(),
            }
        );
        assert!(err.is_retryable());

        let err = WidgetError::from_backend(
            &FakeError(ErrorKind::Http { status: 404 }),
            "",
        );
        assert!(matches!(err, WidgetError::Http { status: 404, .. }));
        assert!(!err.is_retryable());

        let err = WidgetError::from_backend(&FakeError(ErrorKind::Aborted), "");
        assert_eq!(err, WidgetError::Cancelled);
    }

    #[test]
    fn test_display() {
        let err = WidgetError::Http {
            status: 500,
            message: String::new(),
        };
        assert_eq!(err.to_string(), "The server responded with status 500.");
        let err: WidgetError = ValidationError::EmptySubmission.into();
        assert_eq!(err.to_string(), "Type a message or attach a file.");
        let err: WidgetError = ValidationError::LeadsDisabled.into();
        assert_eq!(
            err.to_string(),
            "This chat doesn't collect contact details."
        );
    }
}
