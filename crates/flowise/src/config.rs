use std::fmt::Debug;
use std::time::Duration;

use serde_json::Value;

const DEFAULT_API_HOST: &str = "http://localhost:3000";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for [`FlowiseConfig`].
#[derive(Clone, PartialEq)]
pub struct FlowiseConfigBuilder {
    chatflow_id: String,
    api_host: Option<String>,
    api_key: Option<String>,
    override_config: Option<Value>,
    request_timeout: Option<Duration>,
}

impl FlowiseConfigBuilder {
    /// Creates a builder for the given chatflow.
    #[inline]
    pub fn with_chatflow_id<S: Into<String>>(chatflow_id: S) -> Self {
        Self {
            chatflow_id: chatflow_id.into(),
            api_host: None,
            api_key: None,
            override_config: None,
            request_timeout: None,
        }
    }

    /// Sets the server base URL.
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

    /// Sets chatflow overrides sent with every prediction.
    #[inline]
    pub fn with_override_config(mut self, override_config: Value) -> Self {
        self.override_config = Some(override_config);
        self
    }

    /// Sets the timeout of non-streaming calls (feedback, uploads, leads).
    #[inline]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> FlowiseConfig {
        let api_host = self
            .api_host
            .unwrap_or_else(|| DEFAULT_API_HOST.to_owned());
        FlowiseConfig {
            chatflow_id: self.chatflow_id,
            api_host: api_host.trim_end_matches('/').to_owned(),
            api_key: self.api_key,
            override_config: self.override_config,
            request_timeout: self
                .request_timeout
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl Debug for FlowiseConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowiseConfigBuilder")
            .field("chatflow_id", &self.chatflow_id)
            .field("api_host", &self.api_host)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("override_config", &self.override_config)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Configuration for the Flowise backend.
#[derive(Clone, PartialEq)]
pub struct FlowiseConfig {
    pub(crate) chatflow_id: String,
    pub(crate) api_host: String,
    pub(crate) api_key: Option<String>,
    pub(crate) override_config: Option<Value>,
    pub(crate) request_timeout: Duration,
}

impl FlowiseConfig {
    /// Returns the chatflow id.
    #[inline]
    pub fn chatflow_id(&self) -> &str {
        &self.chatflow_id
    }

    /// Returns the server base URL, without a trailing slash.
    #[inline]
    pub fn api_host(&self) -> &str {
        &self.api_host
    }

    #[inline]
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.api_host)
    }
}

impl Debug for FlowiseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowiseConfig")
            .field("chatflow_id", &self.chatflow_id)
            .field("api_host", &self.api_host)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("override_config", &self.override_config)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
