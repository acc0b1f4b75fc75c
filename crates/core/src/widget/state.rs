use std::collections::HashMap;
use std::fmt::{self, Debug};

use backoff::backoff::Backoff;
use chatflow_embed_protocol::{
    ChatbotConfig, ErrorKind, FeedbackRequest, FileUpload, HistoryEntry,
    HistoryRole, Prediction, PredictionEvent, PredictionRequest, Rating,
    StoredMessage,
};
use chatflow_embed_runtime::{EventLoop, Handler};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::WidgetState;
use super::builder::SubmitPolicy;
use crate::error::{ValidationError, WidgetError};
use crate::message::{
    Feedback, Message, MessageId, MessagePatch, MessageState, Role,
};
use crate::stream::{SessionCallbacks, SessionHandle, StreamingSession};

/// The stage of the send pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Nothing is in flight and nothing is typed.
    #[default]
    Idle,
    /// Input or attachments are waiting to be submitted.
    Composing,
    /// A question was submitted and the backend has not answered yet.
    Sending,
    /// A streamed answer is arriving.
    Streaming,
    /// Waiting for a non-streamed answer.
    Awaiting,
    /// The answer is being applied.
    Finalizing,
    /// The failure is being applied.
    Errored,
}

/// The messages created by one submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Turn {
    /// The user message.
    pub question: MessageId,
    /// The assistant message the answer is written to.
    pub answer: MessageId,
}

pub(crate) struct ActiveExchange {
    generation: u64,
    question: MessageId,
    placeholder: MessageId,
    session: SessionHandle,
}

type Loop = EventLoop<WidgetState>;

impl WidgetState {
    /// Fetches the chatbot settings and, when continuing a conversation,
    /// its earlier messages. Restored messages go to `restore_at`.
    pub(crate) fn load_remote(&mut self, restore_at: usize, handle: &Loop) {
        let fut = self.client.chatbot_config();
        let handle_clone = handle.clone();
        self.spawn_task(
            |_| async move {
                match fut.await {
                    Ok(config) => {
                        handle_clone.post(ChatbotConfigLoaded(config)).ok();
                    }
                    Err(err) => warn!("failed to fetch chatbot config: {err}"),
                }
            },
            handle,
        );

        let Some(chat_id) = self.chat_id.clone() else {
            return;
        };
        let fut = self.client.load_messages(&chat_id);
        let handle_clone = handle.clone();
        self.spawn_task(
            |_| async move {
                match fut.await {
                    Ok(messages) => {
                        handle_clone
                            .post(MessagesRestored {
                                restore_at,
                                messages,
                            })
                            .ok();
                    }
                    Err(err) => {
                        warn!("failed to restore conversation {chat_id}: {err}")
                    }
                }
            },
            handle,
        );
    }

    pub(crate) fn set_input(&mut self, text: String) {
        self.input = text;
        self.refresh_composing();
    }

    pub(crate) fn attach(&mut self, upload: FileUpload) -> Result<(), WidgetError> {
        self.config.attachment_policy.validate(&upload)?;
        self.attachments.push(upload);
        self.refresh_composing();
        Ok(())
    }

    pub(crate) fn clear_attachments(&mut self) {
        self.attachments.clear();
        self.refresh_composing();
    }

    pub(crate) fn submit(&mut self, handle: &Loop) -> Result<Turn, WidgetError> {
        let question = self.input.trim().to_owned();
        if question.is_empty() && self.attachments.is_empty() {
            return Err(ValidationError::EmptySubmission.into());
        }
        let uploads = self.attachments.clone();
        let turn = self.start_exchange(question, uploads, handle)?;
        self.input.clear();
        self.attachments.clear();
        Ok(turn)
    }

    pub(crate) fn send_prompt(
        &mut self,
        text: String,
        handle: &Loop,
    ) -> Result<Turn, WidgetError> {
        self.set_input(text);
        self.submit(handle)
    }

    pub(crate) fn regenerate(&mut self, handle: &Loop) -> Result<Turn, WidgetError> {
        self.check_busy()?;
        self.cancel_active(handle);

        // The latest question is asked again, whether or not it got an
        // answer. Everything after it goes away with it.
        let question = self
            .store
            .messages()
            .iter()
            .rfind(|m| m.role == Role::User)
            .ok_or(ValidationError::NothingToRegenerate)?;
        let (id, content, uploads) = (
            question.id,
            question.content.clone(),
            question.file_uploads.clone(),
        );

        let removed = self.store.truncate_from(id);
        debug!("regenerating, {} messages removed", removed.len());
        self.start_exchange(content, uploads, handle)
    }

    pub(crate) fn delete_message(
        &mut self,
        id: MessageId,
        handle: &Loop,
    ) -> Result<(), WidgetError> {
        let in_flight = self
            .active
            .as_ref()
            .filter(|a| a.placeholder == id || a.question == id)
            .map(|a| (a.question, a.placeholder));
        if let Some((question, placeholder)) = in_flight {
            self.cancel_active(handle);
            self.finish_exchange();
            // A partial answer has no place without its question.
            if question == id {
                self.store.remove(placeholder);
            }
        }
        match self.store.remove(id) {
            Some(_) => Ok(()),
            // An empty placeholder is removed on cancellation.
            None if in_flight.is_some() => Ok(()),
            None => Err(ValidationError::UnknownMessage.into()),
        }
    }

    pub(crate) fn cancel(&mut self, handle: &Loop) -> bool {
        let cancelled = self.cancel_active(handle);
        if cancelled {
            self.finish_exchange();
        }
        cancelled
    }

    pub(crate) fn rate(
        &mut self,
        id: MessageId,
        rating: Rating,
        handle: &Loop,
    ) -> Result<(), WidgetError> {
        // Until the settings arrive, ratings are accepted.
        if self
            .chatbot_config
            .as_ref()
            .is_some_and(|config| !config.feedback_enabled)
        {
            return Err(ValidationError::FeedbackDisabled.into());
        }
        let message = self
            .store
            .get(id)
            .ok_or(ValidationError::UnknownMessage)?;
        let rateable = message.role == Role::Assistant
            && message.enrichment().is_some()
            && message.feedback.is_none();
        let (Some(server_id), Some(chat_id), true) =
            (message.server_id.clone(), self.chat_id.clone(), rateable)
        else {
            return Err(ValidationError::NotRateable.into());
        };

        self.store.update(
            id,
            MessagePatch {
                feedback: Some(Feedback {
                    rating,
                    content: None,
                    id: None,
                }),
                ..Default::default()
            },
        );

        let request = FeedbackRequest {
            chat_id,
            message_id: server_id,
            rating,
            content: None,
        };
        let client = self.client.clone();
        let mut backoff = self.config.feedback_backoff.clone();
        backoff.reset();
        let handle_clone = handle.clone();
        self.spawn_task(
            |_| async move {
                let result = backoff::future::retry(backoff, || {
                    let fut = client.send_feedback(&request);
                    async move {
                        fut.await.map_err(|err| {
                            if err.kind() == ErrorKind::Network {
                                warn!("failed to send feedback, retrying: {err}");
                                backoff::Error::transient(err)
                            } else {
                                backoff::Error::permanent(err)
                            }
                        })
                    }
                })
                .await;
                match result {
                    Ok(receipt) => {
                        handle_clone
                            .post(FeedbackStored {
                                message_id: id,
                                feedback_id: receipt.id,
                            })
                            .ok();
                    }
                    Err(err) => error!("failed to send feedback: {err}"),
                }
            },
            handle,
        );
        Ok(())
    }

    pub(crate) fn comment_feedback(
        &mut self,
        id: MessageId,
        content: String,
        handle: &Loop,
    ) -> Result<(), WidgetError> {
        let message = self
            .store
            .get(id)
            .ok_or(ValidationError::UnknownMessage)?;
        let Some(mut feedback) = message.feedback.clone() else {
            return Err(ValidationError::NotRateable.into());
        };
        feedback.content = Some(content.clone());
        let feedback_id = feedback.id.clone();
        self.store.update(
            id,
            MessagePatch {
                feedback: Some(feedback),
                ..Default::default()
            },
        );

        // Otherwise the comment is sent once the rating is stored.
        if let Some(feedback_id) = feedback_id {
            self.send_feedback_comment(feedback_id, content, handle);
        }
        Ok(())
    }

    fn send_feedback_comment(
        &mut self,
        feedback_id: String,
        content: String,
        handle: &Loop,
    ) {
        let fut = self.client.update_feedback(&feedback_id, &content);
        self.spawn_task(
            |_| async move {
                if let Err(err) = fut.await {
                    error!("failed to update feedback {feedback_id}: {err}");
                }
            },
            handle,
        );
    }

    /// Returns the conversation id, generating one if the conversation
    /// has not started yet.
    pub(crate) fn ensure_chat_id(&mut self) -> String {
        self.chat_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }

    pub(crate) fn check_leads_enabled(&self) -> Result<(), WidgetError> {
        match &self.chatbot_config {
            Some(config) if !config.leads_enabled() => {
                Err(ValidationError::LeadsDisabled.into())
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn record_lead(
        &mut self,
        email: Option<String>,
    ) -> Result<(), WidgetError> {
        if email.is_some() {
            self.lead_email = email;
        }
        let text = self
            .chatbot_config
            .as_ref()
            .and_then(|config| config.leads.as_ref())
            .and_then(|leads| leads.success_message.clone())
            .unwrap_or_else(|| self.config.lead_confirmation.clone());
        let confirmation = Message::api_message(text);
        self.store
            .append(confirmation)
            .map(|_| ())
            .ok_or(WidgetError::Destroyed)
    }

    pub(crate) fn destroy(&mut self, handle: &Loop) {
        for (_, task) in self.running_tasks.drain() {
            task.abort();
        }
        // The abort request spawned here outlives the loop.
        self.cancel_active(handle);
        self.store.destroy();
        self.input.clear();
        self.attachments.clear();
        self.stage = PipelineStage::Idle;
        debug!("widget destroyed");
    }

    fn check_busy(&self) -> Result<(), WidgetError> {
        if self.store.is_destroyed() {
            return Err(WidgetError::Destroyed);
        }
        if self.active.is_some()
            && self.config.submit_policy == SubmitPolicy::Reject
        {
            return Err(WidgetError::Busy);
        }
        Ok(())
    }

    fn start_exchange(
        &mut self,
        question: String,
        uploads: Vec<FileUpload>,
        handle: &Loop,
    ) -> Result<Turn, WidgetError> {
        self.check_busy()?;
        if self.cancel_active(handle) {
            debug!("superseded the previous exchange");
        }

        self.stage = PipelineStage::Sending;
        let request = PredictionRequest {
            question: question.clone(),
            chat_id: Some(self.ensure_chat_id()),
            history: self.history(),
            uploads: uploads.clone(),
            override_config: self.config.override_config.clone(),
            lead_email: self.lead_email.clone(),
            streaming: self.config.streaming,
        };

        let question_id = self
            .store
            .append(Message::user(question, uploads))
            .ok_or(WidgetError::Destroyed)?;
        if let Some(message) = self.store.get(question_id) {
            self.observers.message_sent(message);
        }
        let placeholder = self
            .store
            .append(Message::placeholder())
            .ok_or(WidgetError::Destroyed)?;

        let generation = self.next_generation;
        self.next_generation += 1;
        let session = StreamingSession::open(
            &self.client,
            &request,
            placeholder,
            self.config.idle_timeout,
            PipelineCallbacks {
                event_loop: handle.clone(),
                generation,
            },
        );
        if !self.config.streaming {
            self.stage = PipelineStage::Awaiting;
        }
        self.active = Some(ActiveExchange {
            generation,
            question: question_id,
            placeholder,
            session,
        });
        Ok(Turn {
            question: question_id,
            answer: placeholder,
        })
    }

    /// Finalized turns to send along with the next question.
    fn history(&self) -> Vec<HistoryEntry> {
        self.store
            .messages()
            .iter()
            .filter_map(|message| {
                let role = match (message.role, &message.state) {
                    (Role::User, _) => HistoryRole::User,
                    (Role::Assistant | Role::ApiMessage, MessageState::Complete(_)) => {
                        HistoryRole::Api
                    }
                    _ => return None,
                };
                Some(HistoryEntry {
                    role,
                    content: message.content.clone(),
                })
            })
            .collect()
    }

    /// Cancels the exchange in flight, if any, and settles its
    /// placeholder. Returns `false` if nothing was in flight.
    fn cancel_active(&mut self, handle: &Loop) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        if active.session.cancel() {
            self.request_abort(handle);
        }
        self.settle_cancelled(&active);
        true
    }

    /// Asks the backend to stop generating. Best effort.
    fn request_abort(&mut self, handle: &Loop) {
        let Some(chat_id) = self.chat_id.clone() else {
            return;
        };
        let fut = self.client.abort(&chat_id);
        self.spawn_task(
            |_| async move {
                if let Err(err) = fut.await {
                    warn!("failed to abort {chat_id}: {err}");
                }
            },
            handle,
        );
    }

    /// An empty placeholder is removed; one with part of the answer keeps
    /// it and is marked cancelled.
    fn settle_cancelled(&mut self, active: &ActiveExchange) {
        let is_empty = self
            .store
            .get(active.placeholder)
            .is_some_and(|m| m.content.is_empty());
        if is_empty {
            self.store.remove(active.placeholder);
        } else {
            self.store.update(
                active.placeholder,
                MessagePatch::state(MessageState::Cancelled),
            );
        }
    }

    fn active_for(&mut self, generation: u64) -> Option<&mut ActiveExchange> {
        let active = self.active.as_mut().filter(|a| a.generation == generation);
        if active.is_none() {
            trace!("drop an event from stale session {generation}");
        }
        active
    }

    fn take_active(&mut self, generation: u64) -> Option<ActiveExchange> {
        self.active_for(generation)?;
        self.active.take()
    }

    fn on_delta(&mut self, generation: u64, delta: String) {
        let Some(active) = self.active_for(generation) else {
            return;
        };
        let placeholder = active.placeholder;
        self.stage = PipelineStage::Streaming;
        self.store.update(
            placeholder,
            MessagePatch::append(delta.as_str()).with_state(MessageState::Streaming),
        );
        self.observers.stream_delta(&delta);
    }

    fn on_event(&mut self, generation: u64) {
        if self.active_for(generation).is_some()
            && self.stage == PipelineStage::Sending
        {
            self.stage = PipelineStage::Streaming;
        }
    }

    fn on_complete(&mut self, generation: u64, prediction: Prediction) {
        let Some(active) = self.take_active(generation) else {
            return;
        };
        self.stage = PipelineStage::Finalizing;

        let Prediction {
            text,
            enrichment,
            metadata,
        } = prediction;
        let mut patch = MessagePatch::state(MessageState::Complete(enrichment))
            .with_server_id(metadata.chat_message_id);
        if !text.is_empty() {
            patch.content = Some(text);
        }
        self.store.update(active.placeholder, patch);

        // Audio-only questions get the transcription back.
        if let Some(question) = metadata.question {
            let is_empty = self
                .store
                .get(active.question)
                .is_some_and(|m| m.content.is_empty());
            if is_empty {
                self.store
                    .update(active.question, MessagePatch::content(question));
            }
        }

        if let Some(chat_id) = metadata.chat_id {
            if self.chat_id.as_ref() != Some(&chat_id) {
                debug!("backend assigned conversation {chat_id}");
                self.chat_id = Some(chat_id);
            }
        }

        if let Some(message) = self.store.get(active.placeholder) {
            self.observers.message_received(message);
        }
        self.finish_exchange();
    }

    fn on_error(&mut self, generation: u64, error: WidgetError) {
        let Some(active) = self.take_active(generation) else {
            return;
        };
        self.stage = PipelineStage::Errored;

        match error {
            WidgetError::Cancelled => self.settle_cancelled(&active),
            WidgetError::StreamInterrupted { ref partial, .. }
                if !partial.is_empty() =>
            {
                self.store.update(
                    active.placeholder,
                    MessagePatch::state(MessageState::Errored(error.clone())),
                );
                self.store.append(Message::banner(error));
            }
            error => {
                self.store.update(
                    active.placeholder,
                    MessagePatch::content(error.to_string())
                        .with_state(MessageState::Errored(error)),
                );
            }
        }
        self.finish_exchange();
    }

    fn finish_exchange(&mut self) {
        self.stage = PipelineStage::Idle;
        self.refresh_composing();
        self.observers.idle();
    }

    fn refresh_composing(&mut self) {
        if !matches!(self.stage, PipelineStage::Idle | PipelineStage::Composing) {
            return;
        }
        self.stage = if self.input.trim().is_empty() && self.attachments.is_empty() {
            PipelineStage::Idle
        } else {
            PipelineStage::Composing
        };
    }

    fn spawn_task<F, Fut>(&mut self, f: F, handle: &Loop)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task_id = self.next_task_id;
        self.next_task_id += 1;

        let handle = handle.clone();
        let fut = f(task_id);
        let task = tokio::spawn(async move {
            fut.await;
            handle.post(TaskEnded(task_id)).ok();
        });
        self.running_tasks.insert(task_id, task);
    }
}

pub(crate) type RunningTasks = HashMap<u64, JoinHandle<()>>;

/// Forwards session deliveries to the event loop.
struct PipelineCallbacks {
    event_loop: Loop,
    generation: u64,
}

impl SessionCallbacks for PipelineCallbacks {
    fn on_delta(&self, delta: &str) {
        self.event_loop
            .post(SessionDelta {
                generation: self.generation,
                delta: delta.to_owned(),
            })
            .ok();
    }

    fn on_event(&self, event: &PredictionEvent) {
        trace!("session {} got {event:?}", self.generation);
        self.event_loop
            .post(SessionProgress {
                generation: self.generation,
            })
            .ok();
    }

    fn on_complete(&self, prediction: Prediction) {
        self.event_loop
            .post(SessionCompleted {
                generation: self.generation,
                prediction,
            })
            .ok();
    }

    fn on_error(&self, error: WidgetError) {
        self.event_loop
            .post(SessionFailed {
                generation: self.generation,
                error,
            })
            .ok();
    }
}

#[derive(Debug)]
struct SessionDelta {
    generation: u64,
    delta: String,
}

impl Handler<WidgetState> for SessionDelta {
    #[inline]
    fn handle(self, state: &mut WidgetState, _handle: &Loop) {
        state.on_delta(self.generation, self.delta);
    }
}

#[derive(Debug)]
struct SessionProgress {
    generation: u64,
}

impl Handler<WidgetState> for SessionProgress {
    #[inline]
    fn handle(self, state: &mut WidgetState, _handle: &Loop) {
        state.on_event(self.generation);
    }
}

#[derive(Debug)]
struct SessionCompleted {
    generation: u64,
    prediction: Prediction,
}

impl Handler<WidgetState> for SessionCompleted {
    #[inline]
    fn handle(self, state: &mut WidgetState, _handle: &Loop) {
        state.on_complete(self.generation, self.prediction);
    }
}

#[derive(Debug)]
struct SessionFailed {
    generation: u64,
    error: WidgetError,
}

impl Handler<WidgetState> for SessionFailed {
    #[inline]
    fn handle(self, state: &mut WidgetState, _handle: &Loop) {
        state.on_error(self.generation, self.error);
    }
}

struct FeedbackStored {
    message_id: MessageId,
    feedback_id: String,
}

impl Debug for FeedbackStored {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackStored")
            .field("message_id", &self.message_id)
            .finish_non_exhaustive()
    }
}

impl Handler<WidgetState> for FeedbackStored {
    fn handle(self, state: &mut WidgetState, handle: &Loop) {
        let Some(mut feedback) = state
            .store
            .get(self.message_id)
            .and_then(|m| m.feedback.clone())
        else {
            return;
        };
        feedback.id = Some(self.feedback_id.clone());
        let pending_comment = feedback.content.clone();
        state.store.update(
            self.message_id,
            MessagePatch {
                feedback: Some(feedback),
                ..Default::default()
            },
        );
        if let Some(content) = pending_comment {
            state.send_feedback_comment(self.feedback_id, content, handle);
        }
    }
}

#[derive(Debug)]
pub(crate) struct LoadRemote {
    pub restore_at: usize,
}

impl Handler<WidgetState> for LoadRemote {
    #[inline]
    fn handle(self, state: &mut WidgetState, handle: &Loop) {
        state.load_remote(self.restore_at, handle);
    }
}

#[derive(Debug)]
struct ChatbotConfigLoaded(ChatbotConfig);

impl Handler<WidgetState> for ChatbotConfigLoaded {
    #[inline]
    fn handle(self, state: &mut WidgetState, _handle: &Loop) {
        state.chatbot_config = Some(self.0);
    }
}

#[derive(Debug)]
struct MessagesRestored {
    restore_at: usize,
    messages: Vec<StoredMessage>,
}

impl Handler<WidgetState> for MessagesRestored {
    fn handle(self, state: &mut WidgetState, _handle: &Loop) {
        let added = state.store.insert_all(
            self.restore_at,
            self.messages.into_iter().map(Message::restored),
        );
        debug!("restored {added} messages");
    }
}

#[derive(Debug)]
struct TaskEnded(u64);

impl Handler<WidgetState> for TaskEnded {
    #[inline]
    fn handle(self, state: &mut WidgetState, _handle: &Loop) {
        state.running_tasks.remove(&self.0);
    }
}
