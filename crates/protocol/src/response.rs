use std::pin::Pin;
use std::task::{self, Poll};

use crate::backend::BackendError;
use crate::{
    Action, AgentReasoning, FileAnnotation, Metadata, Prediction,
    SourceDocument, UsedTool,
};

/// A response from a prediction backend.
pub trait PredictionResponse: Sized + Send + 'static {
    /// The error type that may be returned by the backend.
    type Error: BackendError;

    /// Returns `true` if this response delivers the answer incrementally.
    ///
    /// A non-streaming response yields exactly one
    /// [`PredictionEvent::Full`] event.
    fn is_streaming(&self) -> bool;

    /// Attempts to pull out the next event from the response.
    ///
    /// # Return value
    ///
    /// - `Poll::Pending` means that this response is still waiting for
    ///   the next event. Implementations will ensure that the current
    ///   task will be notified when the next event may be ready.
    /// - `Poll::Ready(Ok(Some(event)))` means the response has an event
    ///   to deliver, and may produce further events on subsequent calls.
    /// - `Poll::Ready(Ok(None))` means the response has completed, which
    ///   only happens after [`PredictionEvent::End`] or
    ///   [`PredictionEvent::Full`] was delivered.
    /// - `Poll::Ready(Err(error))` means the exchange failed. A channel
    ///   that closes before completion is reported as
    ///   [`crate::ErrorKind::Interrupted`].
    ///
    /// Calling this method after completion should always return `None`.
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<PredictionEvent>, Self::Error>>;
}

/// An event from a prediction response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PredictionEvent {
    /// The backend started generating.
    Start,
    /// A fragment of the answer text.
    Token(String),
    /// Retrieved documents.
    SourceDocuments(Vec<SourceDocument>),
    /// Tool invocations.
    UsedTools(Vec<UsedTool>),
    /// Produced files.
    FileAnnotations(Vec<FileAnnotation>),
    /// Multi-agent reasoning steps.
    AgentReasoning(Vec<AgentReasoning>),
    /// An interactive action.
    Action(Action),
    /// Conversation bookkeeping.
    Metadata(Metadata),
    /// The streamed answer is complete.
    End,
    /// The whole answer, delivered at once by a non-streaming response.
    Full(Prediction),
}

impl PredictionEvent {
    /// Returns `true` if no further events follow this one.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PredictionEvent::End | PredictionEvent::Full(_))
    }
}
