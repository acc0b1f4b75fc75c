use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document retrieved by the chatflow to ground its answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    /// Text of the retrieved chunk.
    #[serde(default)]
    pub page_content: String,
    /// Loader metadata, such as `source` or page numbers.
    #[serde(default)]
    pub metadata: Value,
}

/// A tool invocation performed while answering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsedTool {
    /// Tool name.
    pub tool: String,
    /// Input passed to the tool.
    #[serde(default)]
    pub tool_input: Value,
    /// Output returned by the tool, either text or structured data.
    #[serde(default)]
    pub tool_output: Value,
}

/// A file produced by the chatflow that the user may download.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnnotation {
    /// Backend file id.
    #[serde(default)]
    pub file_id: Option<String>,
    /// Display name.
    pub file_name: String,
    /// Backend storage path.
    #[serde(default)]
    pub file_path: Option<String>,
}

/// One step of multi-agent reasoning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReasoning {
    /// Agent that produced this step.
    pub agent_name: String,
    /// Messages emitted by the agent.
    #[serde(default)]
    pub messages: Vec<String>,
    /// Next agent to run, if any.
    #[serde(default)]
    pub next: Option<String>,
    /// Tools the agent used.
    #[serde(default)]
    pub used_tools: Vec<UsedTool>,
    /// Documents the agent retrieved.
    #[serde(default)]
    pub source_documents: Vec<SourceDocument>,
}

/// An interactive action the chatflow asks the user to take, such as
/// approving or rejecting a step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Action id.
    #[serde(default)]
    pub id: Option<String>,
    /// How action elements map to responses.
    #[serde(default)]
    pub mapping: Value,
    /// Elements (buttons and so on) to render.
    #[serde(default)]
    pub elements: Vec<Value>,
}

/// Everything that may be attached to a finished assistant answer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Enrichment {
    /// Retrieved documents.
    pub source_documents: Vec<SourceDocument>,
    /// Tool invocations.
    pub used_tools: Vec<UsedTool>,
    /// Produced files.
    pub file_annotations: Vec<FileAnnotation>,
    /// Multi-agent reasoning steps.
    pub agent_reasoning: Vec<AgentReasoning>,
    /// A pending interactive action.
    pub action: Option<Action>,
    /// Suggested next questions.
    pub follow_up_prompts: Vec<String>,
}

impl Enrichment {
    /// Returns `true` if nothing is attached.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.source_documents.is_empty()
            && self.used_tools.is_empty()
            && self.file_annotations.is_empty()
            && self.agent_reasoning.is_empty()
            && self.action.is_none()
            && self.follow_up_prompts.is_empty()
    }

    /// Merges fields set in `other` into `self`. Fields that `other`
    /// leaves empty are kept.
    pub fn merge(&mut self, other: Enrichment) {
        if !other.source_documents.is_empty() {
            self.source_documents = other.source_documents;
        }
        if !other.used_tools.is_empty() {
            self.used_tools = other.used_tools;
        }
        if !other.file_annotations.is_empty() {
            self.file_annotations = other.file_annotations;
        }
        if !other.agent_reasoning.is_empty() {
            self.agent_reasoning = other.agent_reasoning;
        }
        if other.action.is_some() {
            self.action = other.action;
        }
        if !other.follow_up_prompts.is_empty() {
            self.follow_up_prompts = other.follow_up_prompts;
        }
    }
}

/// Conversation bookkeeping the backend returns with an answer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    /// The conversation id the backend stored the exchange under.
    pub chat_id: Option<String>,
    /// The id of the stored assistant message.
    pub chat_message_id: Option<String>,
    /// The question as the backend understood it (e.g. transcribed audio).
    pub question: Option<String>,
    /// Suggested next questions.
    pub follow_up_prompts: Vec<String>,
}

/// A complete answer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Prediction {
    /// Final answer text.
    pub text: String,
    /// Attached enrichment.
    pub enrichment: Enrichment,
    /// Conversation bookkeeping.
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_deserialize_wire_names() {
        let tool: UsedTool = serde_json::from_value(json!({
            "tool": "calculator",
            "toolInput": { "input": "1+1" },
            "toolOutput": "2"
        }))
        .unwrap();
        assert_eq!(tool.tool, "calculator");
        assert_eq!(tool.tool_output, json!("2"));

        let doc: SourceDocument = serde_json::from_value(json!({
            "pageContent": "Rust is a language.",
            "metadata": { "source": "https://rust-lang.org" }
        }))
        .unwrap();
        assert_eq!(doc.page_content, "Rust is a language.");
    }

    #[test]
    fn test_merge_keeps_existing() {
        let mut enrichment = Enrichment {
            follow_up_prompts: vec!["Why?".to_owned()],
            ..Default::default()
        };
        enrichment.merge(Enrichment {
            used_tools: vec![UsedTool {
                tool: "search".to_owned(),
                tool_input: json!({}),
                tool_output: json!("ok"),
            }],
            ..Default::default()
        });
        assert_eq!(enrichment.follow_up_prompts, vec!["Why?".to_owned()]);
        assert_eq!(enrichment.used_tools.len(), 1);
        assert!(!enrichment.is_empty());
        assert!(Enrichment::default().is_empty());
    }
}
