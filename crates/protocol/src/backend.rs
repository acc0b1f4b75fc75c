use std::error::Error;

use crate::chatflow::{ChatbotConfig, StoredMessage};
use crate::error::ErrorKind;
use crate::request::{
    FeedbackReceipt, FeedbackRequest, Lead, LeadReceipt, PredictionRequest,
};
use crate::response::PredictionResponse;
use crate::upload::{AttachmentFile, FileUpload};

/// The error type for a prediction backend.
pub trait BackendError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A type that serves predictions for one chatflow, plus the auxiliary
/// operations the widget needs around them.
///
/// Once created, a backend should behave like a stateless object. Every
/// returned future must be `'static` so that it can run on its own task
/// after the backend has been dropped.
pub trait PredictionBackend: Send + Sync {
    /// The error type that may be returned by the backend.
    type Error: BackendError;

    /// The response type for this backend.
    type Response: PredictionResponse<Error = Self::Error>;

    /// Sends a prediction request.
    fn predict(
        &self,
        req: &PredictionRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;

    /// Stores a rating for an assistant message.
    fn send_feedback(
        &self,
        feedback: &FeedbackRequest,
    ) -> impl Future<Output = Result<FeedbackReceipt, Self::Error>> + Send + 'static;

    /// Attaches a free-text comment to previously stored feedback.
    fn update_feedback(
        &self,
        feedback_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static;

    /// Uploads files for the given conversation and returns references
    /// to include in the next prediction request.
    fn upload_attachments(
        &self,
        chat_id: &str,
        files: Vec<AttachmentFile>,
    ) -> impl Future<Output = Result<Vec<FileUpload>, Self::Error>> + Send + 'static;

    /// Asks the backend to stop generating for the given conversation.
    fn abort(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static;

    /// Stores contact details.
    fn add_lead(
        &self,
        lead: &Lead,
    ) -> impl Future<Output = Result<LeadReceipt, Self::Error>> + Send + 'static;

    /// Fetches how the chatflow is presented as a chatbot.
    fn chatbot_config(
        &self,
    ) -> impl Future<Output = Result<ChatbotConfig, Self::Error>> + Send + 'static;

    /// Loads the stored messages of a conversation, oldest first.
    fn load_messages(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, Self::Error>> + Send + 'static;
}
