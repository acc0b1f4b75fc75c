//! One in-flight exchange with the backend.

use std::fmt::{self, Debug};
use std::future::poll_fn;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chatflow_embed_protocol::{
    Enrichment, Metadata, Prediction, PredictionEvent, PredictionRequest,
};
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::Instrument;

use crate::backend_client::{BackendClient, BoxedError, BoxedResponse};
use crate::error::{InterruptReason, WidgetError};
use crate::message::MessageId;

/// Receives what a [`StreamingSession`] delivers.
///
/// Exactly one of `on_complete` and `on_error` is called, and nothing is
/// called after it. Callbacks are invoked while the session is locked,
/// so they must return quickly and must not call back into the session.
pub trait SessionCallbacks: Send + Sync + 'static {
    /// A piece of the answer, in arrival order.
    fn on_delta(&self, delta: &str);

    /// Any event other than a token, for progress reporting.
    fn on_event(&self, event: &PredictionEvent);

    /// The answer is complete.
    fn on_complete(&self, prediction: Prediction);

    /// The exchange failed or was cancelled.
    fn on_error(&self, error: WidgetError);
}

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Waiting for the backend to respond.
    Pending,
    /// Events are arriving.
    Streaming,
    /// The answer was delivered.
    Completed,
    /// The exchange failed.
    Errored,
    /// The exchange was cancelled.
    Cancelled,
}

impl SessionPhase {
    /// Returns `true` once the session has settled.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Completed
                | SessionPhase::Errored
                | SessionPhase::Cancelled
        )
    }
}

struct SessionState {
    phase: SessionPhase,
    partial: String,
    task: Option<AbortHandle>,
}

struct Inner {
    target: MessageId,
    state: Mutex<SessionState>,
    callbacks: Box<dyn SessionCallbacks>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` unless the session has settled. Returns `false` if it
    /// has.
    fn deliver(
        &self,
        f: impl FnOnce(&mut SessionState, &dyn SessionCallbacks),
    ) -> bool {
        let mut state = self.lock();
        if state.phase.is_terminal() {
            return false;
        }
        f(&mut state, self.callbacks.as_ref());
        true
    }

    fn fail_with_backend_error(&self, err: BoxedError) {
        self.deliver(|state, callbacks| {
            let error = WidgetError::from_backend(err.as_ref(), &state.partial);
            state.phase = match error {
                WidgetError::Cancelled => SessionPhase::Cancelled,
                _ => SessionPhase::Errored,
            };
            callbacks.on_error(error);
        });
    }

    fn interrupted(&self, reason: InterruptReason) {
        self.deliver(|state, callbacks| {
            state.phase = SessionPhase::Errored;
            callbacks.on_error(WidgetError::StreamInterrupted {
                reason,
                partial: state.partial.clone(),
            });
        });
    }
}

/// Opens exchanges with the backend.
pub struct StreamingSession;

impl StreamingSession {
    /// Sends `request` and delivers the response to `callbacks` from a
    /// spawned task.
    ///
    /// If nothing arrives for `idle_timeout`, the exchange fails with
    /// [`WidgetError::StreamInterrupted`].
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn open(
        client: &BackendClient,
        request: &PredictionRequest,
        target: MessageId,
        idle_timeout: Duration,
        callbacks: impl SessionCallbacks,
    ) -> SessionHandle {
        let inner = Arc::new(Inner {
            target,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Pending,
                partial: String::new(),
                task: None,
            }),
            callbacks: Box::new(callbacks),
        });

        let resp_fut = client.predict(request);
        let task = tokio::spawn(
            run_session(Arc::clone(&inner), resp_fut, idle_timeout)
                .instrument(trace_span!("streaming session", %target)),
        );

        let mut state = inner.lock();
        if !state.phase.is_terminal() {
            state.task = Some(task.abort_handle());
        }
        drop(state);
        SessionHandle { inner }
    }
}

async fn run_session(
    inner: Arc<Inner>,
    resp_fut: impl Future<Output = Result<BoxedResponse, BoxedError>>,
    idle_timeout: Duration,
) {
    let mut resp = match timeout(idle_timeout, resp_fut).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(err)) => {
            error!("got an error: {err:?}");
            inner.fail_with_backend_error(err);
            return;
        }
        Err(_) => {
            warn!("no response within {idle_timeout:?}");
            inner.interrupted(InterruptReason::Timeout);
            return;
        }
    };

    trace!("start receiving events");
    let mut text = String::new();
    let mut enrichment = Enrichment::default();
    let mut metadata = Metadata::default();

    loop {
        let next = timeout(
            idle_timeout,
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)),
        )
        .await;
        let event = match next {
            Ok(Ok(Some(event))) => event,
            Ok(Ok(None)) => {
                // Responses only end after a terminal event.
                inner.interrupted(InterruptReason::ConnectionClosed);
                return;
            }
            Ok(Err(err)) => {
                error!("got an error: {err:?}");
                inner.fail_with_backend_error(err);
                return;
            }
            Err(_) => {
                warn!("no event within {idle_timeout:?}");
                inner.interrupted(InterruptReason::Timeout);
                return;
            }
        };
        trace!("got an event: {event:?}");

        match event {
            PredictionEvent::Token(token) => {
                text.push_str(&token);
                let delivered = inner.deliver(|state, callbacks| {
                    state.phase = SessionPhase::Streaming;
                    state.partial.push_str(&token);
                    callbacks.on_delta(&token);
                });
                if !delivered {
                    return;
                }
            }
            PredictionEvent::End => {
                inner.deliver(|state, callbacks| {
                    state.phase = SessionPhase::Completed;
                    callbacks.on_complete(Prediction {
                        text,
                        enrichment,
                        metadata,
                    });
                });
                trace!("finished a request");
                return;
            }
            PredictionEvent::Full(prediction) => {
                inner.deliver(|state, callbacks| {
                    state.phase = SessionPhase::Completed;
                    state.partial.clone_from(&prediction.text);
                    callbacks.on_complete(prediction);
                });
                trace!("finished a request");
                return;
            }
            event => {
                let delivered = inner.deliver(|state, callbacks| {
                    state.phase = SessionPhase::Streaming;
                    callbacks.on_event(&event);
                });
                if !delivered {
                    return;
                }
                collect(event, &mut enrichment, &mut metadata);
            }
        }
    }
}

fn collect(
    event: PredictionEvent,
    enrichment: &mut Enrichment,
    metadata: &mut Metadata,
) {
    match event {
        PredictionEvent::SourceDocuments(docs) => {
            enrichment.source_documents = docs;
        }
        PredictionEvent::UsedTools(tools) => enrichment.used_tools = tools,
        PredictionEvent::FileAnnotations(files) => {
            enrichment.file_annotations = files;
        }
        PredictionEvent::AgentReasoning(steps) => {
            enrichment.agent_reasoning = steps;
        }
        PredictionEvent::Action(action) => enrichment.action = Some(action),
        PredictionEvent::Metadata(update) => {
            if !update.follow_up_prompts.is_empty() {
                enrichment.follow_up_prompts = update.follow_up_prompts.clone();
            }
            merge_metadata(metadata, update);
        }
        _ => {}
    }
}

fn merge_metadata(metadata: &mut Metadata, update: Metadata) {
    if update.chat_id.is_some() {
        metadata.chat_id = update.chat_id;
    }
    if update.chat_message_id.is_some() {
        metadata.chat_message_id = update.chat_message_id;
    }
    if update.question.is_some() {
        metadata.question = update.question;
    }
    if !update.follow_up_prompts.is_empty() {
        metadata.follow_up_prompts = update.follow_up_prompts;
    }
}

/// A handle to an open exchange. Cloning the handle is cheap.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

impl SessionHandle {
    /// Cancels the exchange.
    ///
    /// Once this returns, no further callback is invoked, except for the
    /// single `on_error(WidgetError::Cancelled)` issued here. Calling it
    /// again, or after the session has settled, does nothing.
    ///
    /// Returns `true` if this call cancelled the session.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.lock();
        if state.phase.is_terminal() {
            return false;
        }
        state.phase = SessionPhase::Cancelled;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        self.inner.callbacks.on_error(WidgetError::Cancelled);
        debug!("session for {} cancelled", self.inner.target);
        true
    }

    /// Returns where the session is in its lifecycle.
    #[inline]
    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().phase
    }

    /// Returns the text delivered so far.
    #[inline]
    pub fn partial(&self) -> String {
        self.inner.lock().partial.clone()
    }

    /// Returns the message this session updates.
    #[inline]
    pub fn target(&self) -> MessageId {
        self.inner.target
    }
}

impl Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("target", &self.inner.target)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chatflow_embed_test_backend::{
        PresetEnding, PresetEvent, PresetFailure, PresetResponse, TestBackend,
    };
    use chatflow_embed_protocol::SourceDocument;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    #[derive(Debug, PartialEq)]
    enum Delivery {
        Delta(String),
        Event,
        Complete(Prediction),
        Error(WidgetError),
    }

    struct Recorder(mpsc::UnboundedSender<Delivery>);

    impl SessionCallbacks for Recorder {
        fn on_delta(&self, delta: &str) {
            self.0.send(Delivery::Delta(delta.to_owned())).ok();
        }

        fn on_event(&self, _event: &PredictionEvent) {
            self.0.send(Delivery::Event).ok();
        }

        fn on_complete(&self, prediction: Prediction) {
            self.0.send(Delivery::Complete(prediction)).ok();
        }

        fn on_error(&self, error: WidgetError) {
            self.0.send(Delivery::Error(error)).ok();
        }
    }

    fn open(
        backend: &TestBackend,
        idle_timeout: Duration,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = StreamingSession::open(
            &BackendClient::new(backend.clone()),
            &PredictionRequest {
                question: "Hi".to_owned(),
                streaming: true,
                ..Default::default()
            },
            MessageId::new(),
            idle_timeout,
            Recorder(tx),
        );
        (handle, rx)
    }

    async fn next_terminal(
        rx: &mut mpsc::UnboundedReceiver<Delivery>,
        deltas: &mut Vec<String>,
    ) -> Delivery {
        loop {
            match rx.recv().await.unwrap() {
                Delivery::Delta(delta) => deltas.push(delta),
                Delivery::Event => {}
                terminal => return terminal,
            }
        }
    }

    #[tokio::test]
    async fn test_deltas_in_order() {
        let mut backend = TestBackend::default();
        backend.add_response(PresetResponse::with_events([
            PresetEvent::Token("Hel".to_owned()),
            PresetEvent::Token("lo, ".to_owned()),
            PresetEvent::Token("world".to_owned()),
            PresetEvent::SourceDocuments(vec![SourceDocument {
                page_content: "greeting".to_owned(),
                metadata: json!({}),
            }]),
        ]));
        let (handle, mut rx) = open(&backend, Duration::from_secs(5));

        let mut deltas = Vec::new();
        let Delivery::Complete(prediction) =
            next_terminal(&mut rx, &mut deltas).await
        else {
            panic!("session did not complete");
        };
        assert_eq!(deltas, ["Hel", "lo, ", "world"]);
        assert_eq!(prediction.text, "Hello, world");
        assert_eq!(prediction.enrichment.source_documents.len(), 1);
        assert_eq!(prediction.metadata.chat_message_id.as_deref(), Some("msg:1"));
        assert_eq!(handle.phase(), SessionPhase::Completed);
        assert_eq!(handle.partial(), "Hello, world");

        // Cancelling a settled session does nothing.
        assert!(!handle.cancel());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel() {
        let mut backend = TestBackend::default();
        backend.add_response(PresetResponse::with_tokens(["a", "b", "c", "d", "e"]));
        backend.set_delay(Duration::from_millis(20));
        let (handle, mut rx) = open(&backend, Duration::from_secs(5));

        let mut deltas = Vec::new();
        while deltas.len() < 2 {
            if let Delivery::Delta(delta) = rx.recv().await.unwrap() {
                deltas.push(delta);
            }
        }
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert_eq!(handle.phase(), SessionPhase::Cancelled);
        assert_eq!(handle.partial(), "ab");

        // Nothing but the cancellation is delivered, even after the
        // remaining events would have arrived.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(rx.try_recv().ok(), Some(Delivery::Error(WidgetError::Cancelled)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_interrupted_keeps_partial() {
        let mut backend = TestBackend::default();
        backend.add_response(
            PresetResponse::with_tokens(["Hel", "lo"])
                .with_ending(PresetEnding::Interrupted),
        );
        let (handle, mut rx) = open(&backend, Duration::from_secs(5));

        let mut deltas = Vec::new();
        let terminal = next_terminal(&mut rx, &mut deltas).await;
        assert_eq!(
            terminal,
            Delivery::Error(WidgetError::StreamInterrupted {
                reason: InterruptReason::ConnectionClosed,
                partial: "Hello".to_owned(),
            })
        );
        assert_eq!(handle.phase(), SessionPhase::Errored);
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let mut backend = TestBackend::default();
        backend.add_response(
            PresetResponse::with_tokens(["Hel"]).with_ending(PresetEnding::Hang),
        );
        let (_handle, mut rx) = open(&backend, Duration::from_millis(50));

        let mut deltas = Vec::new();
        let terminal = next_terminal(&mut rx, &mut deltas).await;
        assert_eq!(
            terminal,
            Delivery::Error(WidgetError::StreamInterrupted {
                reason: InterruptReason::Timeout,
                partial: "Hel".to_owned(),
            })
        );
    }

    #[tokio::test]
    async fn test_request_failure() {
        let mut backend = TestBackend::default();
        backend.add_response(PresetResponse::failing(PresetFailure::Http(502)));
        let (handle, mut rx) = open(&backend, Duration::from_secs(5));

        let terminal = next_terminal(&mut rx, &mut Vec::new()).await;
        assert!(matches!(
            terminal,
            Delivery::Error(WidgetError::Http { status: 502, .. })
        ));
        assert_eq!(handle.phase(), SessionPhase::Errored);
    }
}
