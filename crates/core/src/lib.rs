//! Core logic of the chat widget including the message store, the send
//! pipeline, streaming sessions and observers.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod backend_client;
mod error;
pub mod message;
mod observer;
pub mod store;
pub mod stream;
mod validation;
mod widget;

pub use error::{InterruptReason, ValidationError, WidgetError};
pub use observer::Observers;
pub use validation::AttachmentPolicy;
pub use widget::{PipelineStage, SubmitPolicy, Turn, Widget, WidgetBuilder};
