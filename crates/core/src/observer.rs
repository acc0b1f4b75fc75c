use std::fmt::{self, Debug};

use crate::message::Message;

type MessageObserver = Box<dyn Fn(&Message) + Send + Sync>;

/// Callbacks the host registers to follow what happens in a widget.
///
/// All callbacks run on the widget's event loop and must not block.
#[derive(Default)]
pub struct Observers {
    pub(crate) on_message_sent: Option<MessageObserver>,
    pub(crate) on_message_received: Option<MessageObserver>,
    pub(crate) on_stream_delta: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub(crate) on_idle: Option<Box<dyn Fn() + Send + Sync>>,
}

impl Observers {
    /// Called with the user message once it is submitted.
    #[inline]
    pub fn on_message_sent(
        mut self,
        f: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Self {
        self.on_message_sent = Some(Box::new(f));
        self
    }

    /// Called with the answer once it is finalized.
    #[inline]
    pub fn on_message_received(
        mut self,
        f: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Self {
        self.on_message_received = Some(Box::new(f));
        self
    }

    /// Called with each piece of a streamed answer, in arrival order.
    #[inline]
    pub fn on_stream_delta(
        mut self,
        f: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.on_stream_delta = Some(Box::new(f));
        self
    }

    /// Called whenever an exchange settles and the widget is ready for
    /// the next submission.
    #[inline]
    pub fn on_idle(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_idle = Some(Box::new(f));
        self
    }

    pub(crate) fn message_sent(&self, message: &Message) {
        if let Some(f) = &self.on_message_sent {
            f(message);
        }
    }

    pub(crate) fn message_received(&self, message: &Message) {
        if let Some(f) = &self.on_message_received {
            f(message);
        }
    }

    pub(crate) fn stream_delta(&self, delta: &str) {
        if let Some(f) = &self.on_stream_delta {
            f(delta);
        }
    }

    pub(crate) fn idle(&self) {
        if let Some(f) = &self.on_idle {
            f();
        }
    }
}

impl Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("on_message_sent", &self.on_message_sent.is_some())
            .field("on_message_received", &self.on_message_received.is_some())
            .field("on_stream_delta", &self.on_stream_delta.is_some())
            .field("on_idle", &self.on_idle.is_some())
            .finish()
    }
}
