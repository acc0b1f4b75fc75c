//! Message-related types.

use std::fmt::{self, Display, Formatter};

use chatflow_embed_protocol::{
    Enrichment, FileUpload, HistoryRole, Rating, StoredMessage,
};
use uuid::Uuid;

use crate::error::WidgetError;

/// A stable identifier of a message in the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Uuid);

impl MessageId {
    /// The id of a message that has not been added to a store yet.
    pub const UNASSIGNED: MessageId = MessageId(Uuid::nil());

    /// Generates a new random id.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns `true` if this id has not been assigned.
    #[inline]
    pub fn is_unassigned(&self) -> bool {
        self.0.is_nil()
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Who produced a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The person chatting.
    User,
    /// The chatflow's answer.
    Assistant,
    /// Text originating from the widget itself, like a welcome message or
    /// an error banner.
    ApiMessage,
}

/// The lifecycle of a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageState {
    /// Waiting for the first piece of the answer.
    Pending,
    /// Receiving the answer.
    Streaming,
    /// Finalized, with whatever the backend attached to the answer.
    Complete(Enrichment),
    /// The exchange failed. The content holds either the partial answer
    /// or a description of the error.
    Errored(WidgetError),
    /// The exchange was cancelled after part of the answer arrived.
    Cancelled,
}

impl MessageState {
    /// Returns `true` if no further updates are expected.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageState::Complete(_)
                | MessageState::Errored(_)
                | MessageState::Cancelled
        )
    }
}

/// A rating the user gave to an answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Feedback {
    /// Thumbs up or down.
    pub rating: Rating,
    /// Free-text comment.
    pub content: Option<String>,
    /// The id the backend stored the rating under, once it has.
    pub id: Option<String>,
}

/// One turn in a conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Assigned when the message is added to a store.
    pub id: MessageId,
    /// Who produced the message.
    pub role: Role,
    /// The text, growing while an answer streams in.
    pub content: String,
    /// Where the message is in its lifecycle.
    pub state: MessageState,
    /// Files sent along with a user message.
    pub file_uploads: Vec<FileUpload>,
    /// The id the backend assigned to an answer. Required for feedback.
    pub server_id: Option<String>,
    /// The rating the user gave, once an answer was rated.
    pub feedback: Option<Feedback>,
}

impl Message {
    #[inline]
    fn with_role(role: Role, content: String, state: MessageState) -> Self {
        Self {
            id: MessageId::UNASSIGNED,
            role,
            content,
            state,
            file_uploads: Vec::new(),
            server_id: None,
            feedback: None,
        }
    }

    /// Creates a user message. User messages are final once created.
    pub fn user<S: Into<String>>(content: S, uploads: Vec<FileUpload>) -> Self {
        let mut message = Self::with_role(
            Role::User,
            content.into(),
            MessageState::Complete(Enrichment::default()),
        );
        message.file_uploads = uploads;
        message
    }

    /// Creates an empty assistant message awaiting the answer.
    #[inline]
    pub fn placeholder() -> Self {
        Self::with_role(Role::Assistant, String::new(), MessageState::Pending)
    }

    /// Creates a message originating from the widget itself.
    #[inline]
    pub fn api_message<S: Into<String>>(content: S) -> Self {
        Self::with_role(
            Role::ApiMessage,
            content.into(),
            MessageState::Complete(Enrichment::default()),
        )
    }

    /// Creates an error banner.
    #[inline]
    pub fn banner(error: WidgetError) -> Self {
        Self::with_role(
            Role::ApiMessage,
            error.to_string(),
            MessageState::Errored(error),
        )
    }

    /// Rebuilds a message of an earlier conversation. Answers keep their
    /// backend id so they can still be rated.
    pub fn restored(stored: StoredMessage) -> Self {
        let StoredMessage {
            id,
            role,
            content,
            enrichment,
            file_uploads,
        } = stored;
        match role {
            HistoryRole::User => Self::user(content, file_uploads),
            HistoryRole::Api => {
                let mut message = Self::with_role(
                    Role::Assistant,
                    content,
                    MessageState::Complete(enrichment),
                );
                message.server_id = Some(id).filter(|id| !id.is_empty());
                message
            }
        }
    }

    /// Returns `true` while waiting for the first piece of the answer.
    #[inline]
    pub fn is_loading(&self) -> bool {
        matches!(self.state, MessageState::Pending)
    }

    /// Returns what the backend attached to a finalized answer.
    #[inline]
    pub fn enrichment(&self) -> Option<&Enrichment> {
        match &self.state {
            MessageState::Complete(enrichment) => Some(enrichment),
            _ => None,
        }
    }
}

/// Fields to change on a message. Unset fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct MessagePatch {
    /// Replaces the content.
    pub content: Option<String>,
    /// Appended to the content, after `content` is applied.
    pub append: Option<String>,
    /// Replaces the state.
    pub state: Option<MessageState>,
    /// Sets the backend id.
    pub server_id: Option<String>,
    /// Sets the feedback.
    pub feedback: Option<Feedback>,
}

impl MessagePatch {
    /// A patch replacing the content.
    #[inline]
    pub fn content<S: Into<String>>(content: S) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A patch appending to the content.
    #[inline]
    pub fn append<S: Into<String>>(delta: S) -> Self {
        Self {
            append: Some(delta.into()),
            ..Default::default()
        }
    }

    /// A patch replacing the state.
    #[inline]
    pub fn state(state: MessageState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    /// Also replaces the state.
    #[inline]
    pub fn with_state(mut self, state: MessageState) -> Self {
        self.state = Some(state);
        self
    }

    /// Also sets the backend id, if one is given.
    #[inline]
    pub fn with_server_id(mut self, server_id: Option<String>) -> Self {
        self.server_id = server_id;
        self
    }

    pub(crate) fn apply(self, message: &mut Message) {
        if let Some(content) = self.content {
            message.content = content;
        }
        if let Some(delta) = self.append {
            message.content.push_str(&delta);
        }
        if let Some(state) = self.state {
            message.state = state;
        }
        if let Some(server_id) = self.server_id {
            message.server_id = Some(server_id);
        }
        if let Some(feedback) = self.feedback {
            message.feedback = Some(feedback);
        }
    }
}
