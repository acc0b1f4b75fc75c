//! A local fake backend for testing purpose.

mod preset;

use std::collections::{HashMap, VecDeque};
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use chatflow_embed_protocol::{
    AttachmentFile, BackendError, ChatbotConfig, Enrichment, ErrorKind,
    FeedbackReceipt, FeedbackRequest, FileUpload, Lead, LeadReceipt, Metadata,
    Prediction, PredictionBackend, PredictionEvent, PredictionRequest,
    PredictionResponse, StoredMessage,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new<S: Into<String>>(message: S, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for Error {}

impl BackendError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[derive(Debug)]
pub struct TestResponse {
    events: VecDeque<PredictionEvent>,
    ending: PresetEnding,
    streaming: bool,
    finished: bool,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl PredictionResponse for TestResponse {
    type Error = crate::Error;

    #[inline]
    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<PredictionEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.finished {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            if let Some(event) = this.events.pop_front() {
                return Poll::Ready(Ok(Some(event)));
            }
            let result = match &this.ending {
                PresetEnding::Complete => Ok(None),
                PresetEnding::Interrupted => Err(Error::new(
                    "connection closed before completion",
                    ErrorKind::Interrupted,
                )),
                PresetEnding::Hang => return Poll::Pending,
                PresetEnding::BackendError(message) => {
                    Err(Error::new(message.clone(), ErrorKind::Backend))
                }
            };
            this.finished = true;
            return Poll::Ready(result);
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

/// Every call the widget made to a [`TestBackend`].
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    pub predictions: Vec<PredictionRequest>,
    pub feedback: Vec<FeedbackRequest>,
    pub feedback_updates: Vec<(String, String)>,
    pub uploads: Vec<(String, Vec<AttachmentFile>)>,
    pub aborts: Vec<String>,
    pub leads: Vec<Lead>,
    pub config_fetches: usize,
    /// Conversations whose messages were loaded.
    pub loaded: Vec<String>,
}

#[derive(Default)]
struct Shared {
    script: VecDeque<PresetResponse>,
    log: CallLog,
    feedback_failures: usize,
    chatbot_config: Option<ChatbotConfig>,
    stored: HashMap<String, Vec<StoredMessage>>,
}

/// A local fake backend for testing purpose.
///
/// Before sending requests, you need to queue the preset responses. Each
/// prediction request consumes the next one in order. If the queue is
/// empty, the request fails with a backend error.
///
/// Clones share the same script and call log.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestBackend {
    shared: Arc<Mutex<Shared>>,
    delay: Option<Duration>,
}

impl TestBackend {
    #[inline]
    pub fn add_response(&mut self, preset: PresetResponse) {
        self.lock().script.push_back(preset);
    }

    /// Sets the delay before each event.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Makes the next `count` feedback submissions fail with a network
    /// error.
    #[inline]
    pub fn fail_feedback(&mut self, count: usize) {
        self.lock().feedback_failures = count;
    }

    /// Sets the chatbot settings. Until this is called, fetching them
    /// fails with a 404.
    #[inline]
    pub fn set_chatbot_config(&mut self, config: ChatbotConfig) {
        self.lock().chatbot_config = Some(config);
    }

    /// Stores messages for a conversation, as if it happened before.
    #[inline]
    pub fn add_stored_messages<S: Into<String>>(
        &mut self,
        chat_id: S,
        messages: Vec<StoredMessage>,
    ) {
        self.lock()
            .stored
            .entry(chat_id.into())
            .or_default()
            .extend(messages);
    }

    /// Returns a copy of the calls recorded so far.
    #[inline]
    pub fn calls(&self) -> CallLog {
        self.lock().log.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build_response(
        &self,
        req: &PredictionRequest,
        preset: PresetResponse,
        turn: usize,
    ) -> TestResponse {
        let metadata = Metadata {
            chat_id: preset.chat_id.clone().or_else(|| req.chat_id.clone()),
            chat_message_id: Some(format!("msg:{turn}")),
            question: preset.question.clone(),
            follow_up_prompts: Vec::new(),
        };

        let mut text = String::new();
        let mut enrichment = Enrichment::default();
        let mut events = VecDeque::from([PredictionEvent::Start]);
        for event in preset.events {
            let event = match event {
                PresetEvent::Token(token) => {
                    text.push_str(&token);
                    PredictionEvent::Token(token)
                }
                PresetEvent::SourceDocuments(docs) => {
                    enrichment.source_documents.extend(docs.iter().cloned());
                    PredictionEvent::SourceDocuments(docs)
                }
                PresetEvent::UsedTools(tools) => {
                    enrichment.used_tools.extend(tools.iter().cloned());
                    PredictionEvent::UsedTools(tools)
                }
                PresetEvent::AgentReasoning(steps) => {
                    enrichment.agent_reasoning.extend(steps.iter().cloned());
                    PredictionEvent::AgentReasoning(steps)
                }
                PresetEvent::Action(action) => {
                    enrichment.action = Some(action.clone());
                    PredictionEvent::Action(action)
                }
                PresetEvent::FollowUpPrompts(prompts) => {
                    enrichment.follow_up_prompts.extend(prompts.iter().cloned());
                    PredictionEvent::Metadata(Metadata {
                        follow_up_prompts: prompts,
                        ..Default::default()
                    })
                }
            };
            events.push_back(event);
        }

        if !preset.streaming {
            events = VecDeque::from([PredictionEvent::Full(Prediction {
                text,
                enrichment,
                metadata,
            })]);
        } else if preset.ending == PresetEnding::Complete {
            events.push_back(PredictionEvent::Metadata(metadata));
            events.push_back(PredictionEvent::End);
        }

        TestResponse {
            events,
            ending: if preset.streaming {
                preset.ending
            } else {
                PresetEnding::Complete
            },
            streaming: preset.streaming,
            finished: false,
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            sleep: None,
        }
    }
}

impl PredictionBackend for TestBackend {
    type Error = crate::Error;
    type Response = TestResponse;

    fn predict(
        &self,
        req: &PredictionRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let (preset, turn) = {
            let mut shared = self.lock();
            shared.log.predictions.push(req.clone());
            (shared.script.pop_front(), shared.log.predictions.len())
        };
        let Some(preset) = preset else {
            return ready(Err(Error::new(
                "no more preset responses",
                ErrorKind::Backend,
            )));
        };
        let result = match preset.failure.clone() {
            Some(PresetFailure::Network) => {
                Err(Error::new("connection refused", ErrorKind::Network))
            }
            Some(PresetFailure::Http(status)) => Err(Error::new(
                format!("HTTP status {status}"),
                ErrorKind::Http { status },
            )),
            Some(PresetFailure::Backend(message)) => {
                Err(Error::new(message, ErrorKind::Backend))
            }
            None => Ok(self.build_response(req, preset, turn)),
        };
        ready(result)
    }

    fn send_feedback(
        &self,
        feedback: &FeedbackRequest,
    ) -> impl Future<Output = Result<FeedbackReceipt, Self::Error>> + Send + 'static
    {
        let mut shared = self.lock();
        if shared.feedback_failures > 0 {
            shared.feedback_failures -= 1;
            return ready(Err(Error::new(
                "connection reset",
                ErrorKind::Network,
            )));
        }
        shared.log.feedback.push(feedback.clone());
        let id = format!("feedback:{}", shared.log.feedback.len());
        ready(Ok(FeedbackReceipt { id }))
    }

    fn update_feedback(
        &self,
        feedback_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        self.lock()
            .log
            .feedback_updates
            .push((feedback_id.to_owned(), content.to_owned()));
        ready(Ok(()))
    }

    fn upload_attachments(
        &self,
        chat_id: &str,
        files: Vec<AttachmentFile>,
    ) -> impl Future<Output = Result<Vec<FileUpload>, Self::Error>> + Send + 'static
    {
        let uploads = files
            .iter()
            .map(|file| {
                FileUpload::new(format!("stored:{}", file.name), "file:full")
                    .with_name(file.name.clone())
                    .with_mime(file.mime.clone())
            })
            .collect();
        self.lock().log.uploads.push((chat_id.to_owned(), files));
        ready(Ok(uploads))
    }

    fn abort(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        self.lock().log.aborts.push(chat_id.to_owned());
        ready(Ok(()))
    }

    fn add_lead(
        &self,
        lead: &Lead,
    ) -> impl Future<Output = Result<LeadReceipt, Self::Error>> + Send + 'static
    {
        self.lock().log.leads.push(lead.clone());
        ready(Ok(LeadReceipt {
            chat_id: lead.chat_id.clone(),
        }))
    }

    fn chatbot_config(
        &self,
    ) -> impl Future<Output = Result<ChatbotConfig, Self::Error>> + Send + 'static
    {
        let mut shared = self.lock();
        shared.log.config_fetches += 1;
        let result = match shared.chatbot_config.clone() {
            Some(config) => Ok(config),
            None => Err(Error::new(
                "chatflow not found",
                ErrorKind::Http { status: 404 },
            )),
        };
        ready(result)
    }

    fn load_messages(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, Self::Error>> + Send + 'static
    {
        let mut shared = self.lock();
        shared.log.loaded.push(chat_id.to_owned());
        ready(Ok(shared.stored.get(chat_id).cloned().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use super::*;

    async fn collect_response(
        resp: TestResponse,
    ) -> (Vec<PredictionEvent>, Option<Error>) {
        let mut resp = pin!(resp);
        let mut events = Vec::new();
        loop {
            match poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => return (events, None),
                Err(err) => return (events, Some(err)),
            }
        }
    }

    fn request(question: &str) -> PredictionRequest {
        PredictionRequest {
            question: question.to_owned(),
            chat_id: Some("chat:1".to_owned()),
            streaming: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_streamed_turns() {
        let mut backend = TestBackend::default();
        backend.add_response(PresetResponse::with_tokens(["Hel", "lo"]));
        backend.add_response(
            PresetResponse::with_tokens(["Bye"]).with_chat_id("chat:server"),
        );

        let resp = backend.predict(&request("Hi")).await.unwrap();
        assert!(resp.is_streaming());
        let (events, err) = collect_response(resp).await;
        assert!(err.is_none());
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], PredictionEvent::Start);
        assert_eq!(events[1], PredictionEvent::Token("Hel".to_owned()));
        assert_eq!(events[2], PredictionEvent::Token("lo".to_owned()));
        let PredictionEvent::Metadata(metadata) = &events[3] else {
            panic!("unexpected event: {:?}", events[3]);
        };
        assert_eq!(metadata.chat_id.as_deref(), Some("chat:1"));
        assert_eq!(metadata.chat_message_id.as_deref(), Some("msg:1"));
        assert_eq!(events[4], PredictionEvent::End);

        let resp = backend.predict(&request("Bye")).await.unwrap();
        let (events, _) = collect_response(resp).await;
        let PredictionEvent::Metadata(metadata) = &events[2] else {
            panic!("unexpected event: {:?}", events[2]);
        };
        assert_eq!(metadata.chat_id.as_deref(), Some("chat:server"));

        let calls = backend.calls();
        assert_eq!(calls.predictions.len(), 2);
        assert_eq!(calls.predictions[1].question, "Bye");

        // The script is exhausted.
        let err = backend.predict(&request("Again")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
    }

    #[tokio::test]
    async fn test_interrupted() {
        let mut backend = TestBackend::default();
        backend.add_response(
            PresetResponse::with_tokens(["a", "b"])
                .with_ending(PresetEnding::Interrupted),
        );
        let resp = backend.predict(&request("Hi")).await.unwrap();
        let (events, err) = collect_response(resp).await;
        assert_eq!(events.len(), 3);
        assert_eq!(err.unwrap().kind(), ErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn test_non_streaming() {
        let mut backend = TestBackend::default();
        backend.add_response(
            PresetResponse::with_tokens(["Hello, ", "world"])
                .non_streaming()
                .with_question("Hi?"),
        );
        let resp = backend.predict(&request("Hi")).await.unwrap();
        assert!(!resp.is_streaming());
        let (events, err) = collect_response(resp).await;
        assert!(err.is_none());
        let [PredictionEvent::Full(prediction)] = events.as_slice() else {
            panic!("unexpected events: {events:?}");
        };
        assert_eq!(prediction.text, "Hello, world");
        assert_eq!(prediction.metadata.question.as_deref(), Some("Hi?"));
    }

    #[tokio::test]
    async fn test_chatbot_config_and_stored_messages() {
        let mut backend = TestBackend::default();
        let err = backend.chatbot_config().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Http { status: 404 });

        backend.set_chatbot_config(ChatbotConfig {
            feedback_enabled: true,
            ..Default::default()
        });
        assert!(backend.chatbot_config().await.unwrap().feedback_enabled);

        backend.add_stored_messages(
            "chat:1",
            vec![StoredMessage {
                id: "m1".to_owned(),
                role: chatflow_embed_protocol::HistoryRole::User,
                content: "Hi".to_owned(),
                enrichment: Enrichment::default(),
                file_uploads: Vec::new(),
            }],
        );
        assert_eq!(backend.load_messages("chat:1").await.unwrap().len(), 1);
        assert!(backend.load_messages("chat:2").await.unwrap().is_empty());

        let calls = backend.calls();
        assert_eq!(calls.config_fetches, 2);
        assert_eq!(calls.loaded, ["chat:1", "chat:2"]);
    }

    #[tokio::test]
    async fn test_failures() {
        let mut backend = TestBackend::default();
        backend.add_response(PresetResponse::failing(PresetFailure::Http(503)));
        let err = backend.predict(&request("Hi")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Http { status: 503 });

        backend.fail_feedback(1);
        let feedback = FeedbackRequest {
            chat_id: "chat:1".to_owned(),
            message_id: "msg:1".to_owned(),
            rating: chatflow_embed_protocol::Rating::ThumbsUp,
            content: None,
        };
        let err = backend.send_feedback(&feedback).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        let receipt = backend.send_feedback(&feedback).await.unwrap();
        assert_eq!(receipt.id, "feedback:1");
    }
}
