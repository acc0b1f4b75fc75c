use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chatflow_embed_protocol::PredictionBackend;
use serde_json::Value;

use super::Widget;
use crate::backend_client::BackendClient;
use crate::observer::Observers;
use crate::validation::AttachmentPolicy;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_LEAD_CONFIRMATION: &str =
    "Thank you for sharing your contact information.";

/// What happens when a message is submitted while an answer is still
/// arriving.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SubmitPolicy {
    /// Cancel the current exchange and start the new one.
    #[default]
    Supersede,
    /// Refuse the submission with [`crate::WidgetError::Busy`].
    Reject,
}

/// Settings of a widget that don't change over its lifetime.
pub(crate) struct WidgetConfig {
    pub submit_policy: SubmitPolicy,
    pub idle_timeout: Duration,
    pub attachment_policy: AttachmentPolicy,
    pub streaming: bool,
    pub override_config: Option<Value>,
    pub feedback_backoff: ExponentialBackoff,
    pub lead_confirmation: String,
}

/// [`Widget`] builder.
pub struct WidgetBuilder {
    pub(crate) client: BackendClient,
    pub(crate) observers: Observers,
    pub(crate) config: WidgetConfig,
    pub(crate) welcome_message: Option<String>,
    pub(crate) chat_id: Option<String>,
}

impl WidgetBuilder {
    /// Creates a new builder with the specified backend.
    #[inline]
    pub fn with_backend<B: PredictionBackend + 'static>(backend: B) -> Self {
        Self {
            client: BackendClient::new(backend),
            observers: Observers::default(),
            config: WidgetConfig {
                submit_policy: SubmitPolicy::default(),
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
                attachment_policy: AttachmentPolicy::default(),
                streaming: true,
                override_config: None,
                feedback_backoff: ExponentialBackoffBuilder::new()
                    .with_max_elapsed_time(Some(Duration::from_secs(30)))
                    .build(),
                lead_confirmation: DEFAULT_LEAD_CONFIRMATION.to_owned(),
            },
            welcome_message: None,
            chat_id: None,
        }
    }

    /// Registers the host's observers.
    #[inline]
    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    /// Sets how submissions during an exchange are handled.
    #[inline]
    pub fn with_submit_policy(mut self, policy: SubmitPolicy) -> Self {
        self.config.submit_policy = policy;
        self
    }

    /// Sets how long to wait for the next event before giving up on an
    /// answer.
    #[inline]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Sets which attachments are accepted.
    #[inline]
    pub fn with_attachment_policy(mut self, policy: AttachmentPolicy) -> Self {
        self.config.attachment_policy = policy;
        self
    }

    /// Asks the backend for streamed answers. Enabled by default.
    #[inline]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.config.streaming = streaming;
        self
    }

    /// Sets the chatflow overrides sent with every prediction.
    #[inline]
    pub fn with_override_config(mut self, override_config: Value) -> Self {
        self.config.override_config = Some(override_config);
        self
    }

    /// Sets the retry schedule for feedback delivery.
    #[inline]
    pub fn with_feedback_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.config.feedback_backoff = backoff;
        self
    }

    /// Sets the text shown after contact details were stored.
    #[inline]
    pub fn with_lead_confirmation<S: Into<String>>(mut self, text: S) -> Self {
        self.config.lead_confirmation = text.into();
        self
    }

    /// Shows a message from the chatflow before the first question.
    #[inline]
    pub fn with_welcome_message<S: Into<String>>(mut self, text: S) -> Self {
        self.welcome_message = Some(text.into());
        self
    }

    /// Continues an existing conversation instead of starting a new one.
    #[inline]
    pub fn with_chat_id<S: Into<String>>(mut self, chat_id: S) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    /// Builds the widget.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[inline]
    pub fn build(self) -> Widget {
        Widget::spawn_from_builder(self)
    }
}
