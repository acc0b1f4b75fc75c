use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chatflow_embed_protocol::{
    AttachmentFile, BackendError, ChatbotConfig, FeedbackReceipt,
    FeedbackRequest, FileUpload, Lead, LeadReceipt, PredictionBackend,
    PredictionEvent, PredictionRequest, PredictionResponse, StoredMessage,
};
use tracing::Instrument;

pub type BoxedError = Box<dyn BackendError>;
type BoxedFuture<T> =
    Pin<Box<dyn Future<Output = Result<T, BoxedError>> + Send + 'static>>;

/// A prediction response with its type erased.
pub trait DynResponse: Send {
    fn is_streaming(&self) -> bool;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<PredictionEvent>, BoxedError>>;
}

impl<R: PredictionResponse> DynResponse for R {
    #[inline]
    fn is_streaming(&self) -> bool {
        PredictionResponse::is_streaming(self)
    }

    #[inline]
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<PredictionEvent>, BoxedError>> {
        PredictionResponse::poll_next_event(self, cx)
            .map_err(|err| Box::new(err) as BoxedError)
    }
}

pub type BoxedResponse = Pin<Box<dyn DynResponse>>;

trait DynBackend: Send + Sync {
    fn predict(&self, req: &PredictionRequest) -> BoxedFuture<BoxedResponse>;
    fn send_feedback(
        &self,
        feedback: &FeedbackRequest,
    ) -> BoxedFuture<FeedbackReceipt>;
    fn update_feedback(&self, feedback_id: &str, content: &str)
    -> BoxedFuture<()>;
    fn upload_attachments(
        &self,
        chat_id: &str,
        files: Vec<AttachmentFile>,
    ) -> BoxedFuture<Vec<FileUpload>>;
    fn abort(&self, chat_id: &str) -> BoxedFuture<()>;
    fn add_lead(&self, lead: &Lead) -> BoxedFuture<LeadReceipt>;
    fn chatbot_config(&self) -> BoxedFuture<ChatbotConfig>;
    fn load_messages(&self, chat_id: &str) -> BoxedFuture<Vec<StoredMessage>>;
}

fn erase<T, E, F>(fut: F) -> BoxedFuture<T>
where
    E: BackendError,
    F: Future<Output = Result<T, E>> + Send + 'static,
{
    Box::pin(async move { fut.await.map_err(|err| Box::new(err) as BoxedError) })
}

impl<B: PredictionBackend> DynBackend for B {
    fn predict(&self, req: &PredictionRequest) -> BoxedFuture<BoxedResponse> {
        let fut = PredictionBackend::predict(self, req);
        Box::pin(async move {
            match fut.await {
                Ok(resp) => Ok(Box::pin(resp) as BoxedResponse),
                Err(err) => Err(Box::new(err) as BoxedError),
            }
        })
    }

    fn send_feedback(
        &self,
        feedback: &FeedbackRequest,
    ) -> BoxedFuture<FeedbackReceipt> {
        erase(PredictionBackend::send_feedback(self, feedback))
    }

    fn update_feedback(
        &self,
        feedback_id: &str,
        content: &str,
    ) -> BoxedFuture<()> {
        erase(PredictionBackend::update_feedback(self, feedback_id, content))
    }

    fn upload_attachments(
        &self,
        chat_id: &str,
        files: Vec<AttachmentFile>,
    ) -> BoxedFuture<Vec<FileUpload>> {
        erase(PredictionBackend::upload_attachments(self, chat_id, files))
    }

    fn abort(&self, chat_id: &str) -> BoxedFuture<()> {
        erase(PredictionBackend::abort(self, chat_id))
    }

    fn add_lead(&self, lead: &Lead) -> BoxedFuture<LeadReceipt> {
        erase(PredictionBackend::add_lead(self, lead))
    }

    fn chatbot_config(&self) -> BoxedFuture<ChatbotConfig> {
        erase(PredictionBackend::chatbot_config(self))
    }

    fn load_messages(&self, chat_id: &str) -> BoxedFuture<Vec<StoredMessage>> {
        erase(PredictionBackend::load_messages(self, chat_id))
    }
}

/// A wrapper around a prediction backend that provides a type-erased
/// interface for the other modules.
#[derive(Clone)]
pub struct BackendClient {
    backend: Arc<dyn DynBackend>,
}

impl BackendClient {
    #[inline]
    pub fn new<B: PredictionBackend + 'static>(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Sends a prediction request and returns the response once its
    /// headers arrived.
    pub fn predict(
        &self,
        req: &PredictionRequest,
    ) -> impl Future<Output = Result<BoxedResponse, BoxedError>> + Send + 'static
    {
        trace!("sending a prediction request: {req:?}");
        self.backend.predict(req)
    }

    pub fn send_feedback(
        &self,
        feedback: &FeedbackRequest,
    ) -> impl Future<Output = Result<FeedbackReceipt, BoxedError>> + Send + 'static
    {
        self.backend
            .send_feedback(feedback)
            .instrument(trace_span!("send feedback"))
    }

    pub fn update_feedback(
        &self,
        feedback_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<(), BoxedError>> + Send + 'static {
        self.backend
            .update_feedback(feedback_id, content)
            .instrument(trace_span!("update feedback"))
    }

    pub fn upload_attachments(
        &self,
        chat_id: &str,
        files: Vec<AttachmentFile>,
    ) -> impl Future<Output = Result<Vec<FileUpload>, BoxedError>> + Send + 'static
    {
        self.backend
            .upload_attachments(chat_id, files)
            .instrument(trace_span!("upload attachments"))
    }

    pub fn abort(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<(), BoxedError>> + Send + 'static {
        self.backend.abort(chat_id).instrument(trace_span!("abort"))
    }

    pub fn add_lead(
        &self,
        lead: &Lead,
    ) -> impl Future<Output = Result<LeadReceipt, BoxedError>> + Send + 'static
    {
        self.backend.add_lead(lead).instrument(trace_span!("add lead"))
    }

    pub fn chatbot_config(
        &self,
    ) -> impl Future<Output = Result<ChatbotConfig, BoxedError>> + Send + 'static
    {
        self.backend
            .chatbot_config()
            .instrument(trace_span!("fetch chatbot config"))
    }

    /// Loads the messages stored for a previous conversation.
    pub fn load_messages(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, BoxedError>> + Send + 'static
    {
        self.backend
            .load_messages(chat_id)
            .instrument(trace_span!("load messages", chat_id))
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;

    use chatflow_embed_protocol::ErrorKind;
    use chatflow_embed_test_backend::{PresetFailure, PresetResponse, TestBackend};

    use super::*;

    #[tokio::test]
    async fn test_predict() {
        let mut backend = TestBackend::default();
        backend.add_response(PresetResponse::with_tokens(["How ", "are you?"]));
        let client = BackendClient::new(backend.clone());

        let mut resp = client
            .predict(&PredictionRequest {
                question: "Hi".to_owned(),
                streaming: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(resp.is_streaming());

        let mut text = String::new();
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await.unwrap()
        {
            if let PredictionEvent::Token(token) = event {
                text.push_str(&token);
            }
        }
        assert_eq!(text, "How are you?");
        assert_eq!(backend.calls().predictions.len(), 1);
    }

    #[tokio::test]
    async fn test_error_handling() {
        let mut backend = TestBackend::default();
        backend.add_response(PresetResponse::failing(PresetFailure::Network));
        let client = BackendClient::new(backend);
        let err = client
            .predict(&PredictionRequest::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
