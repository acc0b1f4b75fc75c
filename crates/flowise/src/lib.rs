//! A prediction backend for Flowise chatflows.
//!
//! Besides [`FlowiseBackend`], the crate exposes the HTTP utility it is
//! built on ([`send_request`]), which folds every failure into a
//! [`RequestResult`] instead of returning early.

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod request;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use chatflow_embed_protocol::{
    AttachmentFile, BackendError, ChatbotConfig, ErrorKind, FeedbackReceipt,
    FeedbackRequest, FileUpload, Lead, LeadReceipt, PredictionBackend,
    PredictionRequest, StoredMessage,
};
use reqwest::{Client, Method, Url};
use serde_json::Value;
use tracing::Instrument;

pub use config::{FlowiseConfig, FlowiseConfigBuilder};
use proto::{
    FeedbackCreated, LeadCreated, PredictionResult, StoredAttachment,
    StoredChatMessage,
};
pub use request::{
    RequestBody, RequestParams, RequestResult, ResponseBody, ResponseType,
    StreamBody, send_json_request, send_request,
};
pub use response::FlowiseResponse;

use io::Sse;

/// Error type for [`FlowiseBackend`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl BackendError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Flowise prediction backend.
#[derive(Clone, Debug)]
pub struct FlowiseBackend {
    client: Client,
    config: Arc<FlowiseConfig>,
}

impl FlowiseBackend {
    /// Creates a new `FlowiseBackend` with the given configuration.
    #[inline]
    pub fn new(config: FlowiseConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }

    /// Returns the configuration.
    #[inline]
    pub fn config(&self) -> &FlowiseConfig {
        &self.config
    }

    #[inline]
    fn params(&self, method: Method, path: &str) -> RequestParams {
        RequestParams::new(method, self.config.endpoint(path))
            .with_api_key(self.config.api_key.clone())
    }
}

impl PredictionBackend for FlowiseBackend {
    type Error = Error;
    type Response = FlowiseResponse;

    fn predict(
        &self,
        req: &PredictionRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let body = proto::create_request(req, &self.config);
        let params = self
            .params(
                Method::POST,
                &format!("prediction/{}", self.config.chatflow_id),
            )
            .with_response_type(ResponseType::Stream);
        let client = self.client.clone();

        async move {
            let body = serde_json::to_value(&body).map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::InvalidPayload)
            })?;
            let params = params.with_body(RequestBody::Json(body));
            let ResponseBody::Stream(mut stream) =
                send_request(&client, params).await.into_result()?
            else {
                return Err(Error::new(
                    "unexpected response body",
                    ErrorKind::InvalidPayload,
                ));
            };

            if stream.is_event_stream() {
                debug!("prediction is streamed");
                return Ok(FlowiseResponse::from_sse(Sse::new(stream.chunks)));
            }

            // The chatflow cannot stream, the whole answer is in the body.
            let bytes = stream.chunks.read_to_end().await.map_err(|_| {
                Error::new("connection dropped", ErrorKind::Network)
            })?;
            let result: PredictionResult = serde_json::from_slice(&bytes)
                .map_err(|err| {
                    Error::new(format!("{err}"), ErrorKind::InvalidPayload)
                })?;
            Ok(FlowiseResponse::from_prediction(result.into_prediction()))
        }
        .instrument(trace_span!("flowise predict"))
    }

    fn send_feedback(
        &self,
        feedback: &FeedbackRequest,
    ) -> impl Future<Output = Result<FeedbackReceipt, Self::Error>> + Send + 'static
    {
        let body = proto::create_feedback(feedback, &self.config);
        let params = self
            .params(Method::POST, "feedback")
            .with_timeout(self.config.request_timeout);
        let client = self.client.clone();

        async move {
            let body = serde_json::to_value(&body).map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::InvalidPayload)
            })?;
            let created: FeedbackCreated = send_json_request(
                &client,
                params.with_body(RequestBody::Json(body)),
            )
            .await
            .into_result()?;
            Ok(FeedbackReceipt { id: created.id })
        }
    }

    fn update_feedback(
        &self,
        feedback_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        let params = self
            .params(Method::PUT, &format!("feedback/{feedback_id}"))
            .with_timeout(self.config.request_timeout)
            .with_body(RequestBody::Json(
                serde_json::json!({ "content": content }),
            ));
        let client = self.client.clone();

        async move {
            let _: Value =
                send_json_request(&client, params).await.into_result()?;
            Ok(())
        }
    }

    fn upload_attachments(
        &self,
        chat_id: &str,
        files: Vec<AttachmentFile>,
    ) -> impl Future<Output = Result<Vec<FileUpload>, Self::Error>> + Send + 'static
    {
        let params = self
            .params(
                Method::POST,
                &format!("attachments/{}/{chat_id}", self.config.chatflow_id),
            )
            .with_timeout(self.config.request_timeout)
            .with_body(RequestBody::Multipart(files));
        let client = self.client.clone();

        async move {
            let stored: Vec<StoredAttachment> =
                send_json_request(&client, params).await.into_result()?;
            Ok(stored.into_iter().map(proto::create_upload).collect())
        }
    }

    fn abort(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        let params = self
            .params(
                Method::POST,
                &format!(
                    "chatmessage/abort/{}/{chat_id}",
                    self.config.chatflow_id
                ),
            )
            .with_timeout(self.config.request_timeout)
            .with_response_type(ResponseType::Binary);
        let client = self.client.clone();

        async move {
            send_request(&client, params).await.into_result()?;
            Ok(())
        }
    }

    fn add_lead(
        &self,
        lead: &Lead,
    ) -> impl Future<Output = Result<LeadReceipt, Self::Error>> + Send + 'static
    {
        let body = proto::create_lead(lead, &self.config);
        let params = self
            .params(Method::POST, "leads")
            .with_timeout(self.config.request_timeout);
        let client = self.client.clone();

        async move {
            let body = serde_json::to_value(&body).map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::InvalidPayload)
            })?;
            let created: LeadCreated = send_json_request(
                &client,
                params.with_body(RequestBody::Json(body)),
            )
            .await
            .into_result()?;
            Ok(LeadReceipt {
                chat_id: created.chat_id,
            })
        }
    }

    fn chatbot_config(
        &self,
    ) -> impl Future<Output = Result<ChatbotConfig, Self::Error>> + Send + 'static
    {
        let params = self
            .params(
                Method::GET,
                &format!("public-chatbotConfig/{}", self.config.chatflow_id),
            )
            .with_timeout(self.config.request_timeout);
        let client = self.client.clone();

        async move {
            let value: Value =
                send_json_request(&client, params).await.into_result()?;
            proto::create_chatbot_config(value)
        }
        .instrument(trace_span!("flowise chatbot config"))
    }

    fn load_messages(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, Self::Error>> + Send + 'static
    {
        let url = Url::parse_with_params(
            &self.config.endpoint(&format!(
                "public-chatmessage/{}",
                self.config.chatflow_id
            )),
            &[("chatId", chat_id)],
        );
        let api_key = self.config.api_key.clone();
        let timeout = self.config.request_timeout;
        let client = self.client.clone();

        async move {
            let url = url.map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::InvalidPayload)
            })?;
            let params = RequestParams::get(url.as_str())
                .with_api_key(api_key)
                .with_timeout(timeout);
            let stored: Vec<StoredChatMessage> =
                send_json_request(&client, params).await.into_result()?;
            Ok(stored
                .into_iter()
                .map(StoredChatMessage::into_stored)
                .collect())
        }
        .instrument(trace_span!("flowise load messages"))
    }
}
