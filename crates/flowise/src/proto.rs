use chatflow_embed_protocol::{
    Action, AgentReasoning, ChatbotConfig, Enrichment, ErrorKind,
    FeedbackRequest, FileAnnotation, FileUpload, HistoryEntry, HistoryRole,
    Lead, LeadsConfig, Metadata, Prediction, PredictionEvent,
    PredictionRequest, Rating, SourceDocument, StoredMessage, UploadsConfig,
    UsedTool,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, FlowiseConfig};

// ------------------------------
// Types received from the server
// ------------------------------

/// A streamed frame, carried as the data of one server-sent event.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// A non-streaming prediction result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub text: Option<String>,
    pub content: Option<String>,
    pub json: Option<Value>,
    pub source_documents: Option<Vec<SourceDocument>>,
    pub used_tools: Option<Vec<UsedTool>>,
    pub file_annotations: Option<Vec<FileAnnotation>>,
    pub agent_reasoning: Option<Vec<AgentReasoning>>,
    pub action: Option<Action>,
    pub follow_up_prompts: Option<Value>,
    pub chat_id: Option<String>,
    pub chat_message_id: Option<String>,
    pub question: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataFrame {
    chat_id: Option<String>,
    chat_message_id: Option<String>,
    question: Option<String>,
    follow_up_prompts: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FeedbackCreated {
    #[serde(default)]
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadCreated {
    pub chat_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAttachment {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// The chatbot settings of a chatflow. Every field may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatbotConfigResult {
    pub starter_prompts: Option<Value>,
    pub chat_feedback: Option<StatusSetting>,
    pub leads: Option<LeadsSetting>,
    pub uploads: Option<UploadsSetting>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatusSetting {
    pub status: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeadsSetting {
    pub status: bool,
    pub title: Option<String>,
    pub success_message: Option<String>,
    pub name: bool,
    pub email: bool,
    pub phone: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadsSetting {
    pub is_image_upload_allowed: bool,
    #[serde(rename = "isRAGFileUploadAllowed")]
    pub is_rag_file_upload_allowed: bool,
    pub is_speech_to_text_enabled: bool,
    pub img_upload_size_and_types: Vec<SizeAndTypes>,
    pub file_upload_size_and_types: Vec<SizeAndTypes>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SizeAndTypes {
    pub file_types: Vec<String>,
    /// In megabytes.
    pub max_upload_size: Option<u64>,
}

/// A message of a stored conversation. Enrichment columns are stored as
/// JSON text and may arrive either encoded or already parsed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChatMessage {
    pub id: String,
    pub role: HistoryRole,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source_documents: Option<Value>,
    #[serde(default)]
    pub used_tools: Option<Value>,
    #[serde(default)]
    pub file_annotations: Option<Value>,
    #[serde(default)]
    pub agent_reasoning: Option<Value>,
    #[serde(default)]
    pub action: Option<Value>,
    #[serde(default)]
    pub file_uploads: Option<Value>,
    #[serde(default)]
    pub follow_up_prompts: Option<Value>,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionBody {
    question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    uploads: Vec<FileUpload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    override_config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lead_email: Option<String>,
    streaming: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackBody {
    chatflowid: String,
    chat_id: String,
    message_id: String,
    rating: Rating,
    content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FeedbackUpdateBody {
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadBody {
    chatflowid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_request(
    req: &PredictionRequest,
    config: &FlowiseConfig,
) -> PredictionBody {
    PredictionBody {
        question: req.question.clone(),
        chat_id: req.chat_id.clone(),
        history: req.history.clone(),
        uploads: req.uploads.clone(),
        override_config: merge_override_config(
            config.override_config.as_ref(),
            req.override_config.as_ref(),
        ),
        lead_email: req.lead_email.clone(),
        streaming: req.streaming,
    }
}

/// Shallow-merges the per-request overrides over the configured ones.
fn merge_override_config(
    base: Option<&Value>,
    overlay: Option<&Value>,
) -> Option<Value> {
    match (base, overlay) {
        (Some(Value::Object(base)), Some(Value::Object(overlay))) => {
            let mut merged: Map<String, Value> = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Some(Value::Object(merged))
        }
        (_, Some(overlay)) => Some(overlay.clone()),
        (base, None) => base.cloned(),
    }
}

#[inline]
pub fn create_feedback(
    feedback: &FeedbackRequest,
    config: &FlowiseConfig,
) -> FeedbackBody {
    FeedbackBody {
        chatflowid: config.chatflow_id.clone(),
        chat_id: feedback.chat_id.clone(),
        message_id: feedback.message_id.clone(),
        rating: feedback.rating,
        content: feedback.content.clone().unwrap_or_default(),
    }
}

#[inline]
pub fn create_lead(lead: &Lead, config: &FlowiseConfig) -> LeadBody {
    LeadBody {
        chatflowid: config.chatflow_id.clone(),
        chat_id: lead.chat_id.clone(),
        name: lead.name.clone(),
        email: lead.email.clone(),
        phone: lead.phone.clone(),
    }
}

#[inline]
pub fn create_upload(stored: StoredAttachment) -> FileUpload {
    let upload = FileUpload::new(
        stored.content.unwrap_or_else(|| stored.name.clone()),
        "file:full",
    )
    .with_name(stored.name);
    match stored.mime_type {
        Some(mime) => upload.with_mime(mime),
        None => upload,
    }
}

/// The endpoint answers with a bare `"OK"` when nothing is configured.
pub fn create_chatbot_config(value: Value) -> Result<ChatbotConfig, Error> {
    if !value.is_object() {
        return Ok(ChatbotConfig::default());
    }
    let result: ChatbotConfigResult = decode(value)?;
    let uploads = result.uploads.unwrap_or_default();
    let size_and_types = uploads
        .img_upload_size_and_types
        .iter()
        .chain(&uploads.file_upload_size_and_types);
    Ok(ChatbotConfig {
        starter_prompts: starter_prompts(result.starter_prompts),
        feedback_enabled: result.chat_feedback.is_some_and(|f| f.status),
        leads: result.leads.map(|leads| LeadsConfig {
            enabled: leads.status,
            title: leads.title,
            success_message: leads.success_message,
            name: leads.name,
            email: leads.email,
            phone: leads.phone,
        }),
        uploads: UploadsConfig {
            images_allowed: uploads.is_image_upload_allowed,
            files_allowed: uploads.is_rag_file_upload_allowed,
            speech_to_text: uploads.is_speech_to_text_enabled,
            allowed_types: size_and_types
                .clone()
                .flat_map(|s| s.file_types.iter().cloned())
                .collect(),
            max_size: size_and_types
                .filter_map(|s| s.max_upload_size)
                .max()
                .map(|mb| mb as usize * 1024 * 1024),
        },
    })
}

/// Starter prompts are stored as an object keyed by position, with
/// blank entries left in place.
fn starter_prompts(value: Option<Value>) -> Vec<String> {
    let mut entries: Vec<(usize, Value)> = match value {
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(key, value)| (key.parse().unwrap_or(usize::MAX), value))
            .collect(),
        Some(Value::Array(items)) => items.into_iter().enumerate().collect(),
        _ => return vec![],
    };
    entries.sort_by_key(|(idx, _)| *idx);
    entries
        .into_iter()
        .filter_map(|(_, entry)| match entry {
            Value::Object(mut obj) => match obj.remove("prompt") {
                Some(Value::String(prompt)) => Some(prompt),
                _ => None,
            },
            Value::String(prompt) => Some(prompt),
            _ => None,
        })
        .filter(|prompt| !prompt.trim().is_empty())
        .collect()
}

impl StoredChatMessage {
    pub fn into_stored(self) -> StoredMessage {
        let action = embedded::<Option<Action>>(self.action);
        StoredMessage {
            id: self.id,
            role: self.role,
            content: self.content,
            enrichment: Enrichment {
                source_documents: embedded(self.source_documents),
                used_tools: embedded(self.used_tools),
                file_annotations: embedded(self.file_annotations),
                agent_reasoning: embedded(self.agent_reasoning),
                action,
                follow_up_prompts: follow_up_prompts(self.follow_up_prompts),
            },
            file_uploads: embedded(self.file_uploads),
        }
    }
}

/// Decodes a column that holds either JSON text or the parsed value.
/// Anything undecodable is dropped.
fn embedded<T: serde::de::DeserializeOwned + Default>(value: Option<Value>) -> T {
    let result = match value {
        None | Some(Value::Null) => return T::default(),
        Some(Value::String(s)) => serde_json::from_str(&s),
        Some(value) => serde_json::from_value(value),
    };
    result.unwrap_or_else(|err| {
        debug!("skipped a stored column: {err}");
        T::default()
    })
}

/// Converts a streamed frame into an event.
///
/// Returns `Ok(None)` for frames the widget has no use for.
pub fn frame_to_event(frame: Frame) -> Result<Option<PredictionEvent>, Error> {
    let Frame { event, data } = frame;
    let event = match event.as_str() {
        "start" => PredictionEvent::Start,
        "token" => PredictionEvent::Token(value_to_text(data)),
        "sourceDocuments" => PredictionEvent::SourceDocuments(decode(data)?),
        "usedTools" => PredictionEvent::UsedTools(decode(data)?),
        "fileAnnotations" => PredictionEvent::FileAnnotations(decode(data)?),
        "agentReasoning" => PredictionEvent::AgentReasoning(decode(data)?),
        "action" => PredictionEvent::Action(decode(data)?),
        "metadata" => {
            let frame: MetadataFrame = decode(data)?;
            PredictionEvent::Metadata(Metadata {
                chat_id: frame.chat_id,
                chat_message_id: frame.chat_message_id,
                question: frame.question,
                follow_up_prompts: follow_up_prompts(frame.follow_up_prompts),
            })
        }
        "end" => PredictionEvent::End,
        "error" => {
            return Err(Error::new(value_to_text(data), ErrorKind::Backend));
        }
        "abort" => {
            return Err(Error::new("generation aborted", ErrorKind::Aborted));
        }
        other => {
            debug!("skipped unknown frame: {other}");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

impl PredictionResult {
    pub fn into_prediction(self) -> Prediction {
        let text = match (self.text, self.content, self.json) {
            (Some(text), _, _) => text,
            (None, Some(content), _) => content,
            (None, None, Some(json)) => format!(
                "```json\n{}\n```",
                serde_json::to_string_pretty(&json).unwrap_or_default()
            ),
            (None, None, None) => String::new(),
        };
        let follow_up_prompts = follow_up_prompts(self.follow_up_prompts);
        Prediction {
            text,
            enrichment: Enrichment {
                source_documents: self.source_documents.unwrap_or_default(),
                used_tools: self.used_tools.unwrap_or_default(),
                file_annotations: self.file_annotations.unwrap_or_default(),
                agent_reasoning: self.agent_reasoning.unwrap_or_default(),
                action: self.action,
                follow_up_prompts: follow_up_prompts.clone(),
            },
            metadata: Metadata {
                chat_id: self.chat_id,
                chat_message_id: self.chat_message_id,
                question: self.question,
                follow_up_prompts,
            },
        }
    }
}

#[inline]
fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, Error> {
    serde_json::from_value(data)
        .map_err(|err| Error::new(format!("{err}"), ErrorKind::InvalidPayload))
}

#[inline]
fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Follow-up prompts arrive either as an array or as a JSON-encoded
/// array inside a string.
fn follow_up_prompts(value: Option<Value>) -> Vec<String> {
    let value = match value {
        Some(Value::String(s)) => match serde_json::from_str(&s) {
            Ok(value) => value,
            Err(_) => return vec![],
        },
        Some(value) => value,
        None => return vec![],
    };
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s),
                _ => None,
            })
            .collect(),
        _ => vec![],
    }
}
