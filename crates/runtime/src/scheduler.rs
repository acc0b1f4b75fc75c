use std::sync::Weak;

use tokio::select;
use tokio::sync::{mpsc, watch};

use crate::mailbox::Mailbox;
use crate::{EventLoop, Handler};

pub async fn run_loop<S: Send + 'static>(
    mailbox: Weak<Mailbox<S>>,
    mut state: S,
    mut event_rx: mpsc::UnboundedReceiver<Box<dyn Handler<S>>>,
    mut stop_rx: watch::Receiver<bool>,
    closed_tx: watch::Sender<bool>,
) {
    debug!("started");
    loop {
        let event = select! {
            biased;

            _ = stop_rx.changed() => {
                break;
            }
            event = event_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                event
            }
        };
        trace!("received event: {event:?}");

        let Some(mailbox) = mailbox.upgrade() else {
            warn!("last handle has been dropped, discard the event");
            break;
        };
        let proc_span = trace_span!("handle event");
        proc_span.in_scope(|| {
            event.handle(&mut state, &EventLoop::from_mailbox(mailbox));
        });

        // A handler may have asked the loop to stop.
        if *stop_rx.borrow() {
            break;
        }
    }

    // Pending events are dropped together with the receiver, and any
    // query waiting on them observes a closed loop.
    event_rx.close();
    drop(state);
    closed_tx.send(true).ok();
    debug!("terminated");
}
