use std::fmt::{self, Debug};
use std::time::Duration;

use chatflow_embed_core::{Observers, SubmitPolicy};
use serde_json::Value;

/// Everything needed to embed a chatflow.
///
/// Only `chatflowid` is required, the rest falls back to defaults.
pub struct EmbedConfig {
    /// The chatflow to talk to.
    pub chatflowid: String,
    /// The Flowise server. Defaults to `http://localhost:3000`.
    pub api_host: Option<String>,
    /// The chatflow API key, if the chatflow is protected.
    pub api_key: Option<String>,
    /// Overrides applied to the chatflow on every prediction.
    pub chatflow_config: Option<Value>,
    /// Callbacks to follow the conversation.
    pub observers_config: Observers,
    /// Shown before the first question.
    pub welcome_message: Option<String>,
    /// Continues an existing conversation.
    pub chat_id: Option<String>,
    /// Asks for streamed answers. Defaults to `true`.
    pub streaming: bool,
    /// What happens on a submission while an answer is arriving.
    pub submit_policy: SubmitPolicy,
    /// How long to wait for the next piece of an answer.
    pub idle_timeout: Option<Duration>,
}

impl EmbedConfig {
    /// Creates a configuration for the given chatflow.
    pub fn new<S: Into<String>>(chatflowid: S) -> Self {
        Self {
            chatflowid: chatflowid.into(),
            api_host: None,
            api_key: None,
            chatflow_config: None,
            observers_config: Observers::default(),
            welcome_message: None,
            chat_id: None,
            streaming: true,
            submit_policy: SubmitPolicy::default(),
            idle_timeout: None,
        }
    }

    /// Sets the Flowise server.
    #[inline]
    pub fn with_api_host<S: Into<String>>(mut self, api_host: S) -> Self {
        self.api_host = Some(api_host.into());
        self
    }

    /// Sets the chatflow API key.
    #[inline]
    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the chatflow overrides.
    #[inline]
    pub fn with_chatflow_config(mut self, chatflow_config: Value) -> Self {
        self.chatflow_config = Some(chatflow_config);
        self
    }

    /// Sets the observers.
    #[inline]
    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers_config = observers;
        self
    }

    /// Sets the welcome message.
    #[inline]
    pub fn with_welcome_message<S: Into<String>>(mut self, text: S) -> Self {
        self.welcome_message = Some(text.into());
        self
    }

    /// Continues a stored conversation. Its messages are loaded when the
    /// widget starts.
    #[inline]
    pub fn with_chat_id<S: Into<String>>(mut self, chat_id: S) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }
}

impl Debug for EmbedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbedConfig")
            .field("chatflowid", &self.chatflowid)
            .field("api_host", &self.api_host)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("chatflow_config", &self.chatflow_config)
            .field("observers_config", &self.observers_config)
            .field("welcome_message", &self.welcome_message)
            .field("chat_id", &self.chat_id)
            .field("streaming", &self.streaming)
            .field("submit_policy", &self.submit_policy)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}
