mod builder;
mod state;

use chatflow_embed_protocol::{
    AttachmentFile, ChatbotConfig, FileUpload, Lead, Rating,
};
use chatflow_embed_runtime::{EventLoop, LoopClosedError};

use crate::backend_client::BackendClient;
use crate::error::WidgetError;
use crate::message::{Message, MessageId};
use crate::observer::Observers;
use crate::store::MessageStore;
pub use builder::{SubmitPolicy, WidgetBuilder};
use builder::WidgetConfig;
use state::{ActiveExchange, LoadRemote, RunningTasks};
pub use state::{PipelineStage, Turn};

/// The state of one widget instance. It lives on the widget's event loop
/// and is only touched by handlers running there.
pub(crate) struct WidgetState {
    client: BackendClient,
    config: WidgetConfig,
    observers: Observers,
    store: MessageStore,
    stage: PipelineStage,
    input: String,
    attachments: Vec<FileUpload>,
    chat_id: Option<String>,
    lead_email: Option<String>,
    chatbot_config: Option<ChatbotConfig>,
    active: Option<ActiveExchange>,
    next_generation: u64,
    running_tasks: RunningTasks,
    next_task_id: u64,
}

/// A chat widget instance, which owns a conversation, its messages and
/// the exchange in flight.
///
/// Every operation is applied on the widget's event loop in call order.
/// The handle is cheap to clone. Once [`Widget::destroy`] was called,
/// operations fail with [`WidgetError::Destroyed`].
#[derive(Clone)]
pub struct Widget {
    event_loop: EventLoop<WidgetState>,
}

impl Widget {
    fn spawn_from_builder(builder: WidgetBuilder) -> Self {
        let WidgetBuilder {
            client,
            observers,
            config,
            welcome_message,
            chat_id,
        } = builder;

        let mut store = MessageStore::default();
        if let Some(text) = welcome_message {
            store.append(Message::api_message(text));
        }
        let restore_at = store.len();

        let state = WidgetState {
            client,
            config,
            observers,
            store,
            stage: Default::default(),
            input: Default::default(),
            attachments: Default::default(),
            chat_id,
            lead_email: None,
            chatbot_config: None,
            active: None,
            next_generation: 1,
            running_tasks: Default::default(),
            next_task_id: 1,
        };
        let event_loop = EventLoop::spawn(state, Some("widget"));
        // Handled before any operation of the caller.
        if event_loop.post(LoadRemote { restore_at }).is_err() {
            warn!("widget loop closed right after spawning");
        }
        Self { event_loop }
    }

    async fn query<F, R>(&self, f: F) -> Result<R, WidgetError>
    where
        F: FnOnce(&mut WidgetState, &EventLoop<WidgetState>) -> R
            + Send
            + 'static,
        R: Send + 'static,
    {
        self.event_loop
            .query(f)
            .await
            .map_err(|LoopClosedError| WidgetError::Destroyed)
    }

    /// Replaces the text in the input box.
    pub async fn set_input<S: Into<String>>(
        &self,
        text: S,
    ) -> Result<(), WidgetError> {
        let text = text.into();
        self.query(move |state, _| state.set_input(text)).await
    }

    /// Adds an attachment to the next submission after checking it
    /// against the attachment policy.
    pub async fn attach(&self, upload: FileUpload) -> Result<(), WidgetError> {
        self.query(move |state, _| state.attach(upload)).await?
    }

    /// Uploads files to the backend and attaches the returned references
    /// to the next submission.
    pub async fn upload_files(
        &self,
        files: Vec<AttachmentFile>,
    ) -> Result<Vec<FileUpload>, WidgetError> {
        let (client, chat_id) = self
            .query(|state, _| (state.client.clone(), state.ensure_chat_id()))
            .await?;
        let uploads = client
            .upload_attachments(&chat_id, files)
            .await
            .map_err(|err| WidgetError::from_backend(err.as_ref(), ""))?;
        let attached = uploads.clone();
        self.query(move |state, _| {
            attached
                .into_iter()
                .try_for_each(|upload| state.attach(upload))
        })
        .await??;
        Ok(uploads)
    }

    /// Drops the attachments of the next submission.
    pub async fn clear_attachments(&self) -> Result<(), WidgetError> {
        self.query(|state, _| state.clear_attachments()).await
    }

    /// Submits the input box and the attachments.
    ///
    /// Fails with a validation error, creating no message, if both are
    /// empty. If an answer is still arriving, it is cancelled first or
    /// the submission is refused, depending on the [`SubmitPolicy`].
    pub async fn submit(&self) -> Result<Turn, WidgetError> {
        self.query(|state, handle| state.submit(handle)).await?
    }

    /// Submits the given text, as when a starter or follow-up prompt is
    /// clicked.
    pub async fn send_prompt<S: Into<String>>(
        &self,
        text: S,
    ) -> Result<Turn, WidgetError> {
        let text = text.into();
        self.query(move |state, handle| state.send_prompt(text, handle))
            .await?
    }

    /// Removes the last answer and asks its question again.
    pub async fn regenerate(&self) -> Result<Turn, WidgetError> {
        self.query(|state, handle| state.regenerate(handle)).await?
    }

    /// Deletes a message, cancelling the exchange if it is in flight.
    pub async fn delete_message(&self, id: MessageId) -> Result<(), WidgetError> {
        self.query(move |state, handle| state.delete_message(id, handle))
            .await?
    }

    /// Cancels the exchange in flight. Returns `false` if there was none.
    pub async fn cancel(&self) -> Result<bool, WidgetError> {
        self.query(|state, handle| state.cancel(handle)).await
    }

    /// Rates an answer. The rating is shown immediately and delivered to
    /// the backend in the background.
    pub async fn rate(
        &self,
        id: MessageId,
        rating: Rating,
    ) -> Result<(), WidgetError> {
        self.query(move |state, handle| state.rate(id, rating, handle))
            .await?
    }

    /// Attaches a comment to a rated answer.
    pub async fn comment_feedback<S: Into<String>>(
        &self,
        id: MessageId,
        content: S,
    ) -> Result<(), WidgetError> {
        let content = content.into();
        self.query(move |state, handle| {
            state.comment_feedback(id, content, handle)
        })
        .await?
    }

    /// Stores the user's contact details with the conversation.
    ///
    /// Fails with [`ValidationError::LeadsDisabled`] once the chatbot
    /// settings are known and lead capture is off.
    ///
    /// [`ValidationError::LeadsDisabled`]: crate::ValidationError::LeadsDisabled
    pub async fn submit_lead(&self, mut lead: Lead) -> Result<(), WidgetError> {
        let (client, chat_id) = self
            .query(|state, _| {
                state.check_leads_enabled()?;
                Ok::<_, WidgetError>((
                    state.client.clone(),
                    state.ensure_chat_id(),
                ))
            })
            .await??;
        lead.chat_id = Some(chat_id);
        client
            .add_lead(&lead)
            .await
            .map_err(|err| WidgetError::from_backend(err.as_ref(), ""))?;
        self.query(move |state, _| state.record_lead(lead.email))
            .await?
    }

    /// Returns a copy of all messages in conversation order.
    pub async fn messages(&self) -> Result<Vec<Message>, WidgetError> {
        self.query(|state, _| state.store.snapshot()).await
    }

    /// Returns a copy of the message with the given id.
    pub async fn message(
        &self,
        id: MessageId,
    ) -> Result<Option<Message>, WidgetError> {
        self.query(move |state, _| state.store.get(id).cloned())
            .await
    }

    /// Returns the stage of the send pipeline.
    pub async fn stage(&self) -> Result<PipelineStage, WidgetError> {
        self.query(|state, _| state.stage).await
    }

    /// Returns the chatbot settings of the chatflow, or `None` until
    /// they were fetched.
    pub async fn chatbot_config(
        &self,
    ) -> Result<Option<ChatbotConfig>, WidgetError> {
        self.query(|state, _| state.chatbot_config.clone()).await
    }

    /// Returns the current conversation id, if the conversation started.
    pub async fn chat_id(&self) -> Result<Option<String>, WidgetError> {
        self.query(|state, _| state.chat_id.clone()).await
    }

    /// Cancels the exchange in flight, drops all messages and stops the
    /// event loop. Calling it again does nothing.
    pub async fn destroy(&self) {
        let result = self
            .query(|state, handle| {
                state.destroy(handle);
                handle.stop();
            })
            .await;
        if result.is_err() {
            trace!("widget was already destroyed");
        }
        self.event_loop.closed().await;
    }

    /// Returns `true` once the widget has been destroyed.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.event_loop.is_closed()
    }
}
