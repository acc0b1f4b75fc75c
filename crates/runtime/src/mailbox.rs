use std::fmt::{self, Debug};

use tokio::sync::{mpsc, oneshot, watch};

use crate::{EventLoop, LoopClosedError};

/// Helper trait for handling boxed events.
pub trait BoxHandler<S>: Send + Debug + 'static {
    fn handle_box(self: Box<Self>, state: &mut S, handle: &EventLoop<S>);
}

/// An event the loop can handle.
pub trait Handler<S>: BoxHandler<S> {
    /// Handles the event with exclusive access to the loop's state.
    fn handle(self, state: &mut S, handle: &EventLoop<S>);
}

impl<S, H: Handler<S>> BoxHandler<S> for H {
    #[inline]
    fn handle_box(self: Box<Self>, state: &mut S, handle: &EventLoop<S>) {
        (*self).handle(state, handle)
    }
}

impl<S, H: Handler<S> + ?Sized> Handler<S> for Box<H> {
    #[inline]
    fn handle(self, state: &mut S, handle: &EventLoop<S>) {
        self.handle_box(state, handle)
    }
}

/// Runs a closure on the loop and sends its result back.
pub struct Query<F, R> {
    pub f: F,
    pub reply_tx: oneshot::Sender<R>,
}

impl<F, R> Debug for Query<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").finish_non_exhaustive()
    }
}

impl<S, F, R> Handler<S> for Query<F, R>
where
    F: FnOnce(&mut S, &EventLoop<S>) -> R + Send + 'static,
    R: Send + 'static,
{
    #[inline]
    fn handle(self, state: &mut S, handle: &EventLoop<S>) {
        let result = (self.f)(state, handle);
        // The caller may have stopped waiting.
        self.reply_tx.send(result).ok();
    }
}

pub struct MailboxParts<S> {
    pub mailbox: Mailbox<S>,
    pub event_rx: mpsc::UnboundedReceiver<Box<dyn Handler<S>>>,
    pub stop_rx: watch::Receiver<bool>,
    pub closed_tx: watch::Sender<bool>,
}

pub struct Mailbox<S> {
    event_tx: mpsc::UnboundedSender<Box<dyn Handler<S>>>,
    stop_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl<S: Send + 'static> Mailbox<S> {
    #[inline]
    pub fn new() -> MailboxParts<S> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (closed_tx, closed_rx) = watch::channel(false);
        MailboxParts {
            mailbox: Mailbox {
                event_tx,
                stop_tx,
                closed_rx,
            },
            event_rx,
            stop_rx,
            closed_tx,
        }
    }

    #[inline]
    pub fn post(&self, event: Box<dyn Handler<S>>) -> Result<(), LoopClosedError> {
        self.event_tx.send(event).map_err(|_| LoopClosedError)
    }

    #[inline]
    pub fn stop(&self) {
        self.stop_tx.send(true).ok();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    #[inline]
    pub fn closed_rx(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }
}
