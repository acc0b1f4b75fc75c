use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatflow_embed_core::message::{MessageState, Role};
use chatflow_embed_core::{
    InterruptReason, Observers, ValidationError, Widget, WidgetBuilder,
    WidgetError,
};
use chatflow_embed_protocol::FileUpload;
use chatflow_embed_test_backend::{PresetEnding, PresetResponse, TestBackend};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

struct Harness {
    widget: Widget,
    idle_rx: watch::Receiver<usize>,
    deltas_rx: watch::Receiver<Vec<String>>,
    sent: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn new(backend: &TestBackend) -> Self {
        let (idle_tx, idle_rx) = watch::channel(0);
        let (deltas_tx, deltas_rx) = watch::channel(Vec::new());
        let sent = Arc::new(Mutex::new(Vec::new()));
        let received = Arc::new(Mutex::new(Vec::new()));
        let observers = Observers::default()
            .on_idle(move || idle_tx.send_modify(|n| *n += 1))
            .on_stream_delta(move |delta| {
                deltas_tx.send_modify(|d| d.push(delta.to_owned()))
            })
            .on_message_sent({
                let sent = Arc::clone(&sent);
                move |message| sent.lock().unwrap().push(message.content.clone())
            })
            .on_message_received({
                let received = Arc::clone(&received);
                move |message| {
                    received.lock().unwrap().push(message.content.clone())
                }
            });
        let widget = WidgetBuilder::with_backend(backend.clone())
            .with_observers(observers)
            .build();
        Self {
            widget,
            idle_rx,
            deltas_rx,
            sent,
            received,
        }
    }

    async fn wait_idle(&mut self, count: usize) {
        timeout(Duration::from_secs(2), self.idle_rx.wait_for(|n| *n >= count))
            .await
            .unwrap()
            .unwrap();
    }

    async fn wait_deltas(&mut self, count: usize) {
        timeout(
            Duration::from_secs(2),
            self.deltas_rx.wait_for(|d| d.len() >= count),
        )
        .await
        .unwrap()
        .unwrap();
    }

    async fn loading_count(&self) -> usize {
        self.widget
            .messages()
            .await
            .unwrap()
            .iter()
            .filter(|m| m.is_loading())
            .count()
    }
}

#[tokio::test]
async fn test_deltas_accumulate() {
    let mut backend = TestBackend::default();
    backend.add_response(PresetResponse::with_tokens(["Hel", "lo, ", "world"]));
    let mut harness = Harness::new(&backend);

    let turn = harness.widget.send_prompt("Greet me").await.unwrap();
    assert_eq!(harness.loading_count().await, 1);
    harness.wait_idle(1).await;

    let answer = harness.widget.message(turn.answer).await.unwrap().unwrap();
    assert_eq!(answer.content, "Hello, world");
    assert!(!answer.is_loading());
    assert!(matches!(answer.state, MessageState::Complete(_)));
    assert_eq!(*harness.deltas_rx.borrow(), ["Hel", "lo, ", "world"]);
    assert_eq!(*harness.sent.lock().unwrap(), ["Greet me"]);
    assert_eq!(*harness.received.lock().unwrap(), ["Hello, world"]);
    assert_eq!(harness.loading_count().await, 0);
}

#[tokio::test]
async fn test_empty_submission() {
    let backend = TestBackend::default();
    let harness = Harness::new(&backend);

    harness.widget.set_input("   ").await.unwrap();
    assert_eq!(
        harness.widget.submit().await,
        Err(WidgetError::Validation(ValidationError::EmptySubmission))
    );
    assert!(harness.widget.messages().await.unwrap().is_empty());
    assert!(backend.calls().predictions.is_empty());
}

#[tokio::test]
async fn test_cancel_midway() {
    let mut backend = TestBackend::default();
    backend.add_response(PresetResponse::with_tokens(["a", "b", "c", "d", "e"]));
    backend.set_delay(Duration::from_millis(30));
    let mut harness = Harness::new(&backend);

    let turn = harness.widget.send_prompt("Spell it").await.unwrap();
    harness.wait_deltas(2).await;
    assert!(harness.widget.cancel().await.unwrap());
    assert!(!harness.widget.cancel().await.unwrap());

    let applied = harness.deltas_rx.borrow().concat();
    let answer = harness.widget.message(turn.answer).await.unwrap().unwrap();
    assert_eq!(answer.content, applied);
    assert_eq!(answer.state, MessageState::Cancelled);
    assert!(!answer.is_loading());

    // Nothing else arrives after cancellation.
    sleep(Duration::from_millis(200)).await;
    let answer = harness.widget.message(turn.answer).await.unwrap().unwrap();
    assert_eq!(answer.content, applied);
    assert_eq!(harness.deltas_rx.borrow().concat(), applied);
    assert_eq!(backend.calls().aborts.len(), 1);
}

#[tokio::test]
async fn test_new_send_supersedes() {
    let mut backend = TestBackend::default();
    backend.add_response(PresetResponse::with_tokens(["one", "two", "three"]));
    backend.add_response(PresetResponse::with_tokens(["fresh"]));
    backend.set_delay(Duration::from_millis(30));
    let mut harness = Harness::new(&backend);

    let first = harness.widget.send_prompt("First").await.unwrap();
    harness.wait_deltas(1).await;
    let second = harness.widget.send_prompt("Second").await.unwrap();

    let messages = harness.widget.messages().await.unwrap();
    let first_idx = messages.iter().position(|m| m.id == first.answer).unwrap();
    let second_idx = messages.iter().position(|m| m.id == second.question).unwrap();
    assert!(first_idx < second_idx);
    assert!(messages[first_idx].state.is_terminal());
    assert_eq!(harness.loading_count().await, 1);

    harness.wait_idle(1).await;
    let first_answer = harness.widget.message(first.answer).await.unwrap().unwrap();
    assert_eq!(first_answer.state, MessageState::Cancelled);
    let second_answer =
        harness.widget.message(second.answer).await.unwrap().unwrap();
    assert_eq!(second_answer.content, "fresh");
}

#[tokio::test]
async fn test_interrupted_stream() {
    let mut backend = TestBackend::default();
    backend.add_response(
        PresetResponse::with_tokens(["Partial ", "answer"])
            .with_ending(PresetEnding::Interrupted),
    );
    let mut harness = Harness::new(&backend);

    let turn = harness.widget.send_prompt("Go").await.unwrap();
    harness.wait_idle(1).await;

    let messages = harness.widget.messages().await.unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].id, turn.answer);
    assert_eq!(messages[1].content, "Partial answer");
    let expected = WidgetError::StreamInterrupted {
        reason: InterruptReason::ConnectionClosed,
        partial: "Partial answer".to_owned(),
    };
    assert_eq!(messages[1].state, MessageState::Errored(expected.clone()));
    assert_eq!(messages[2].role, Role::ApiMessage);
    assert_eq!(messages[2].content, expected.to_string());
    assert!(harness.received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_uploads_sent_unchanged() {
    let mut backend = TestBackend::default();
    backend.add_response(PresetResponse::with_tokens(["Nice picture"]));
    let mut harness = Harness::new(&backend);

    let upload = FileUpload::new("iVBORw0KGgoAAAANSUhEUg==", "image/png");
    harness.widget.attach(upload.clone()).await.unwrap();
    let turn = harness.widget.submit().await.unwrap();
    harness.wait_idle(1).await;

    let question = harness.widget.message(turn.question).await.unwrap().unwrap();
    assert_eq!(question.file_uploads, [upload.clone()]);
    assert_eq!(backend.calls().predictions[0].uploads, [upload]);
}
