//! A single-threaded event loop owned by one widget instance.
//!
//! All state of a widget lives inside its loop and is only touched by
//! handlers running on that loop, one at a time. Network tasks never
//! mutate the state directly; they post events back to the loop. This
//! gives the same serialization a browser event loop gives, without
//! locks.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod error;
mod handle;
mod mailbox;
mod scheduler;

pub use error::LoopClosedError;
pub use handle::EventLoop;
pub use mailbox::Handler;
