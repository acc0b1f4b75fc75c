use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::Instrument;

use crate::mailbox::{Mailbox, MailboxParts, Query};
use crate::scheduler::run_loop;
use crate::{Handler, LoopClosedError};

/// Handle to an event loop. Cloning the handle is cheap; the loop stops
/// when it is asked to, or when the last handle is dropped.
pub struct EventLoop<S> {
    mailbox: Arc<Mailbox<S>>,
}

impl<S: Send + 'static> EventLoop<S> {
    /// Spawns a loop owning `state` on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn spawn(state: S, label: Option<&str>) -> Self {
        let MailboxParts {
            mailbox,
            event_rx,
            stop_rx,
            closed_tx,
        } = Mailbox::new();
        let mailbox = Arc::new(mailbox);
        tokio::spawn(
            run_loop(
                Arc::downgrade(&mailbox),
                state,
                event_rx,
                stop_rx,
                closed_tx,
            )
            .instrument(trace_span!("event loop", label = label)),
        );
        Self { mailbox }
    }

    #[inline]
    pub(crate) fn from_mailbox(mailbox: Arc<Mailbox<S>>) -> Self {
        Self { mailbox }
    }

    /// Posts an event to the loop. Events are handled in posting order.
    #[inline]
    pub fn post<H: Handler<S> + 'static>(
        &self,
        event: H,
    ) -> Result<(), LoopClosedError> {
        self.mailbox.post(Box::new(event))
    }

    /// Runs `f` on the loop with exclusive access to the state and
    /// returns its result.
    ///
    /// Fails if the loop stops before `f` gets to run.
    pub fn query<F, R>(
        &self,
        f: F,
    ) -> impl Future<Output = Result<R, LoopClosedError>> + Send + 'static
    where
        F: FnOnce(&mut S, &EventLoop<S>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let posted = self.post(Query { f, reply_tx });
        async move {
            posted?;
            reply_rx.await.map_err(|_| LoopClosedError)
        }
    }

    /// Asks the loop to stop.
    ///
    /// The loop finishes the event it is handling, drops its state and
    /// discards the events still queued.
    #[inline]
    pub fn stop(&self) {
        self.mailbox.stop();
    }

    /// Returns `true` once the loop has terminated.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Waits until the loop has terminated.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut closed_rx = self.mailbox.closed_rx();
        async move {
            // An error means the loop task is gone as well.
            closed_rx.wait_for(|closed| *closed).await.ok();
        }
    }
}

impl<S> Clone for EventLoop<S> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}
