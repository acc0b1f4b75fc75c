//! Backend-agnostic types shared by the chat widget runtime.
//!
//! This crate fixes the contract between the widget and whatever serves
//! predictions for a chatflow: the shape of a prediction request, the
//! events a response may yield, the enrichment payloads attached to a
//! finished answer, and the auxiliary operations (feedback, attachments,
//! abort, leads, chatbot settings, stored conversations) a backend must
//! offer.
//!
//! Types in this crate don't define any behavior. The HTTP implementation
//! lives in its own crate, and tests use an in-process scripted backend.

#![deny(missing_docs)]

mod backend;
mod chatflow;
mod enrichment;
mod error;
mod request;
mod response;
mod upload;

pub use backend::*;
pub use chatflow::*;
pub use enrichment::*;
pub use error::*;
pub use request::*;
pub use response::*;
pub use upload::*;
