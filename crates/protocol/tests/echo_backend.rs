use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::task::{self, Poll, ready};
use std::time::Duration;

use chatflow_embed_protocol::{
    AttachmentFile, BackendError, ChatbotConfig, ErrorKind, FeedbackReceipt,
    FeedbackRequest, FileUpload, Lead, LeadReceipt, PredictionBackend,
    PredictionEvent, PredictionRequest, PredictionResponse, StoredMessage,
};
use tokio::time::{Sleep, sleep};

#[derive(Debug)]
struct EchoError(ErrorKind);

impl Display for EchoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for EchoError {}

impl BackendError for EchoError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Echoes the question back word by word, then ends.
#[derive(Debug)]
struct EchoResponse {
    words: VecDeque<String>,
    ended: bool,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl EchoResponse {
    fn new(question: &str) -> Self {
        let words = format!("You asked {question}")
            .split(' ')
            .map(ToString::to_string)
            .collect();
        Self {
            words,
            ended: false,
            sleep: None,
        }
    }
}

impl PredictionResponse for EchoResponse {
    type Error = EchoError;

    fn is_streaming(&self) -> bool {
        true
    }

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<PredictionEvent>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };
        if this.ended {
            return Poll::Ready(Ok(None));
        }
        let sleep = this
            .sleep
            .get_or_insert_with(|| Box::pin(sleep(Duration::from_millis(1))));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        match this.words.pop_front() {
            Some(mut word) => {
                if !this.words.is_empty() {
                    word.push(' ');
                }
                Poll::Ready(Ok(Some(PredictionEvent::Token(word))))
            }
            None => {
                this.ended = true;
                Poll::Ready(Ok(Some(PredictionEvent::End)))
            }
        }
    }
}

struct EchoBackend;

impl PredictionBackend for EchoBackend {
    type Error = EchoError;
    type Response = EchoResponse;

    fn predict(
        &self,
        req: &PredictionRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let result = if req.question.is_empty() {
            Err(EchoError(ErrorKind::Http { status: 400 }))
        } else {
            Ok(EchoResponse::new(&req.question))
        };
        ready(result)
    }

    fn send_feedback(
        &self,
        _feedback: &FeedbackRequest,
    ) -> impl Future<Output = Result<FeedbackReceipt, Self::Error>> + Send + 'static
    {
        ready(Ok(FeedbackReceipt {
            id: "feedback:0".to_owned(),
        }))
    }

    fn update_feedback(
        &self,
        _feedback_id: &str,
        _content: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        ready(Ok(()))
    }

    fn upload_attachments(
        &self,
        _chat_id: &str,
        files: Vec<AttachmentFile>,
    ) -> impl Future<Output = Result<Vec<FileUpload>, Self::Error>> + Send + 'static
    {
        ready(Ok(files
            .into_iter()
            .map(|f| FileUpload::new(f.name, "stored-file").with_mime(f.mime))
            .collect()))
    }

    fn abort(
        &self,
        _chat_id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        ready(Ok(()))
    }

    fn add_lead(
        &self,
        lead: &Lead,
    ) -> impl Future<Output = Result<LeadReceipt, Self::Error>> + Send + 'static
    {
        ready(Ok(LeadReceipt {
            chat_id: lead.chat_id.clone(),
        }))
    }

    fn chatbot_config(
        &self,
    ) -> impl Future<Output = Result<ChatbotConfig, Self::Error>> + Send + 'static
    {
        ready(Ok(ChatbotConfig::default()))
    }

    fn load_messages(
        &self,
        _chat_id: &str,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, Self::Error>> + Send + 'static
    {
        // Nothing is remembered between questions.
        ready(Ok(Vec::new()))
    }
}

mod tests {
    use std::future::poll_fn;

    use super::*;

    #[tokio::test]
    async fn test_streamed_answer() {
        let backend = EchoBackend;
        let req = PredictionRequest {
            question: "about Rust".to_owned(),
            streaming: true,
            ..Default::default()
        };
        let mut resp = backend.predict(&req).await.unwrap();
        assert!(resp.is_streaming());

        let mut answer = String::new();
        let mut saw_end = false;
        loop {
            let event = poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
                .await
                .unwrap();
            match event {
                Some(PredictionEvent::Token(delta)) => answer.push_str(&delta),
                Some(PredictionEvent::End) => saw_end = true,
                Some(event) => unreachable!("unexpected event: {event:?}"),
                None => break,
            }
        }

        assert!(saw_end);
        assert_eq!(answer, "You asked about Rust");
    }

    #[tokio::test]
    async fn test_error() {
        let backend = EchoBackend;
        let req = PredictionRequest::default();
        let err = backend.predict(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Http { status: 400 });
        assert!(!err.kind().is_transient());
    }

    #[tokio::test]
    async fn test_attachment_references() {
        let backend = EchoBackend;
        let uploads = backend
            .upload_attachments(
                "chat:1",
                vec![AttachmentFile {
                    name: "notes.txt".to_owned(),
                    mime: "text/plain".to_owned(),
                    bytes: b"hello".to_vec(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].is_reference());
        assert_eq!(uploads[0].content_type(), "text/plain");
    }
}
