use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FileUpload;

/// A prediction request for one user turn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredictionRequest {
    /// The user question.
    pub question: String,
    /// The conversation id, if one has been established.
    pub chat_id: Option<String>,
    /// Finalized conversation turns preceding this question.
    pub history: Vec<HistoryEntry>,
    /// Files attached to the question.
    pub uploads: Vec<FileUpload>,
    /// Per-request chatflow configuration overrides.
    pub override_config: Option<Value>,
    /// Email of a captured lead.
    pub lead_email: Option<String>,
    /// Whether incremental delivery is requested.
    pub streaming: bool,
}

/// Who authored a history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryRole {
    /// The user.
    #[serde(rename = "userMessage")]
    User,
    /// The chatflow.
    #[serde(rename = "apiMessage")]
    Api,
}

/// A finalized conversation turn sent as context.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Author of the turn.
    pub role: HistoryRole,
    /// Text of the turn.
    pub content: String,
}

/// A rating the user gives to an assistant answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rating {
    /// Helpful.
    #[serde(rename = "THUMBS_UP")]
    ThumbsUp,
    /// Not helpful.
    #[serde(rename = "THUMBS_DOWN")]
    ThumbsDown,
}

/// Feedback on one stored assistant message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeedbackRequest {
    /// Conversation id.
    pub chat_id: String,
    /// The backend id of the rated message.
    pub message_id: String,
    /// The rating.
    pub rating: Rating,
    /// Optional free-text comment.
    pub content: Option<String>,
}

/// Contact details captured by the widget.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Lead {
    /// Conversation id, if one exists yet.
    pub chat_id: Option<String>,
    /// Name.
    pub name: Option<String>,
    /// Email.
    pub email: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
}

/// What the backend returns after storing feedback.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeedbackReceipt {
    /// Id of the stored feedback, used to attach a comment later.
    pub id: String,
}

/// What the backend returns after storing a lead.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LeadReceipt {
    /// The conversation the lead was attached to.
    pub chat_id: Option<String>,
}
