use chatflow_embed_protocol::{Action, AgentReasoning, SourceDocument, UsedTool};
use serde::{Deserialize, Serialize};

/// The events in a preset response, between the implicit `Start` and the
/// closing metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "token")]
    Token(String),
    #[serde(rename = "source_documents")]
    SourceDocuments(Vec<SourceDocument>),
    #[serde(rename = "used_tools")]
    UsedTools(Vec<UsedTool>),
    #[serde(rename = "agent_reasoning")]
    AgentReasoning(Vec<AgentReasoning>),
    #[serde(rename = "action")]
    Action(Action),
    #[serde(rename = "follow_up_prompts")]
    FollowUpPrompts(Vec<String>),
}

/// How a streamed response ends after its preset events.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PresetEnding {
    /// Metadata and `End` are delivered.
    #[default]
    Complete,
    /// The connection drops.
    Interrupted,
    /// No further event ever arrives.
    Hang,
    /// The backend reports an error event.
    BackendError(String),
}

/// A failure returned before any event is delivered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PresetFailure {
    Network,
    Http(u16),
    Backend(String),
}

/// The preset response for one prediction request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    #[serde(default)]
    pub ending: PresetEnding,
    /// If set, the request fails without delivering anything.
    #[serde(default)]
    pub failure: Option<PresetFailure>,
    /// If `false`, the answer is delivered as one `Full` event.
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    /// Conversation id assigned by the backend. Defaults to the one in
    /// the request.
    #[serde(default)]
    pub chat_id: Option<String>,
    /// The question the backend reports back, like the transcription of
    /// an audio upload.
    #[serde(default)]
    pub question: Option<String>,
}

fn default_streaming() -> bool {
    true
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            ending: PresetEnding::Complete,
            failure: None,
            streaming: true,
            chat_id: None,
            question: None,
        }
    }

    /// Creates a `PresetResponse` streaming the given tokens.
    pub fn with_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_events(
            tokens
                .into_iter()
                .map(|token| PresetEvent::Token(token.into()))
                .collect::<Vec<_>>(),
        )
    }

    /// Creates a `PresetResponse` that fails immediately.
    #[inline]
    pub fn failing(failure: PresetFailure) -> Self {
        let mut preset = Self::with_events([]);
        preset.failure = Some(failure);
        preset
    }

    #[inline]
    pub fn with_ending(mut self, ending: PresetEnding) -> Self {
        self.ending = ending;
        self
    }

    #[inline]
    pub fn non_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    #[inline]
    pub fn with_chat_id<S: Into<String>>(mut self, chat_id: S) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    #[inline]
    pub fn with_question<S: Into<String>>(mut self, question: S) -> Self {
        self.question = Some(question.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let response = PresetResponse::with_events([
            PresetEvent::Token("See the attached ".to_owned()),
            PresetEvent::SourceDocuments(vec![SourceDocument {
                page_content: "Opening hours are 9 to 5.".to_owned(),
                metadata: json!({ "source": "faq.md" }),
            }]),
        ])
        .with_ending(PresetEnding::BackendError("quota".to_owned()));

        let serialized = serde_json::to_string(&response).unwrap();
        let deserialized: PresetResponse =
            serde_json::from_str(&serialized).unwrap();

        assert_eq!(response, deserialized);
    }

    #[test]
    fn test_defaults() {
        let response: PresetResponse = serde_json::from_value(json!({
            "events": [{ "type": "token", "data": "Hi" }]
        }))
        .unwrap();
        assert!(response.streaming);
        assert_eq!(response.ending, PresetEnding::Complete);
        assert_eq!(response.failure, None);
    }
}
