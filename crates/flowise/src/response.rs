use std::pin::Pin;
use std::task::{Context, Poll, ready};

use chatflow_embed_protocol::{
    ErrorKind, Prediction, PredictionEvent, PredictionResponse,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::{Sse, SseError};
use crate::proto::{self, Frame};

struct StreamState {
    sse: Sse,
    ended: bool,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<PredictionEvent>, StreamState), Error>;

pin_project! {
    pub struct FlowiseResponse {
        streaming: bool,
        next_event_fut: Option<PinnedFuture<NextEvent>>,
        full: Option<Prediction>,
    }
}

impl FlowiseResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let state = StreamState { sse, ended: false };
        Self {
            streaming: true,
            next_event_fut: Some(Box::pin(next_event(state))),
            full: None,
        }
    }

    #[inline]
    pub fn from_prediction(prediction: Prediction) -> Self {
        Self {
            streaming: false,
            next_event_fut: None,
            full: Some(prediction),
        }
    }
}

impl PredictionResponse for FlowiseResponse {
    type Error = crate::Error;

    #[inline]
    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<PredictionEvent>, Self::Error>> {
        let this = self.project();
        if let Some(prediction) = this.full.take() {
            return Poll::Ready(Ok(Some(PredictionEvent::Full(prediction))));
        }
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, state) = match ready!(next_event_fut.as_mut().poll(cx)) {
            Ok((Some(event), state)) => (event, state),
            Ok((None, _)) => {
                *this.next_event_fut = None;
                return Poll::Ready(Ok(None));
            }
            Err(err) => {
                *this.next_event_fut = None;
                return Poll::Ready(Err(err));
            }
        };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        *this.next_event_fut = Some(Box::pin(next_event(state)));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut state: StreamState) -> NextEvent {
    if state.ended {
        return Ok((None, state));
    }
    loop {
        let sse_event = match state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                return Err(Error::new(
                    "stream closed before the end event",
                    ErrorKind::Interrupted,
                ));
            }
            Err(SseError::ChunksError(_)) => {
                return Err(Error::new(
                    "connection dropped mid-stream",
                    ErrorKind::Interrupted,
                ));
            }
            Err(SseError::InvalidPayload) => {
                return Err(Error::new(
                    "malformed event stream",
                    ErrorKind::InvalidPayload,
                ));
            }
        };
        trace!("got sse event: {sse_event:?}");
        if sse_event.data == "[DONE]" {
            state.ended = true;
            return Ok((Some(PredictionEvent::End), state));
        }

        let frame = serde_json::from_str::<Frame>(&sse_event.data)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::InvalidPayload))?;
        let Some(event) = proto::frame_to_event(frame)? else {
            continue;
        };
        if event.is_terminal() {
            state.ended = true;
        }
        return Ok((Some(event), state));
    }
}
