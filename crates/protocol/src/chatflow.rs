use crate::enrichment::Enrichment;
use crate::request::HistoryRole;
use crate::upload::FileUpload;

/// How the chatflow is presented as a chatbot.
///
/// Missing settings fall back to the defaults, which disable feedback
/// and lead capture.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatbotConfig {
    /// Prompts offered before the first question.
    pub starter_prompts: Vec<String>,
    /// Whether answers can be rated.
    pub feedback_enabled: bool,
    /// Lead capture settings, if configured.
    pub leads: Option<LeadsConfig>,
    /// What can be attached to a question.
    pub uploads: UploadsConfig,
}

impl ChatbotConfig {
    /// Returns `true` if the chatflow asks for contact details.
    #[inline]
    pub fn leads_enabled(&self) -> bool {
        self.leads.as_ref().is_some_and(|leads| leads.enabled)
    }
}

/// Lead capture settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeadsConfig {
    /// Whether lead capture is on.
    pub enabled: bool,
    /// Heading of the lead form.
    pub title: Option<String>,
    /// Shown once the details are stored.
    pub success_message: Option<String>,
    /// Whether the name is asked for.
    pub name: bool,
    /// Whether the email is asked for.
    pub email: bool,
    /// Whether the phone number is asked for.
    pub phone: bool,
}

/// Attachment capabilities of the chatflow.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadsConfig {
    /// Whether images can be attached.
    pub images_allowed: bool,
    /// Whether documents can be attached.
    pub files_allowed: bool,
    /// Whether voice questions are transcribed.
    pub speech_to_text: bool,
    /// MIME types accepted, such as `image/png` or `image/*`.
    pub allowed_types: Vec<String>,
    /// Largest accepted file, in bytes.
    pub max_size: Option<usize>,
}

/// A message of a conversation as the backend stored it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    /// Backend id of the message.
    pub id: String,
    /// Who authored it.
    pub role: HistoryRole,
    /// Its text.
    pub content: String,
    /// Payloads attached to an answer.
    pub enrichment: Enrichment,
    /// Files sent along with a question.
    pub file_uploads: Vec<FileUpload>,
}
