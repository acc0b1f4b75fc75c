//! An embeddable chat widget for Flowise chatflows.
//!
//! Call [`init`] to create a widget bound to a chatflow and
//! [`Widget::destroy`] when it's no longer needed. The crate also ships a
//! terminal chat shell, and C bindings to embed the widget into native
//! host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod config;
#[cfg(feature = "ffi")]
pub mod ffi;

use chatflow_embed_flowise::{FlowiseBackend, FlowiseConfigBuilder};
pub use chatflow_embed_core::{Observers, SubmitPolicy, Turn, Widget};
pub use config::EmbedConfig;

/// Re-exports of [`chatflow_embed_core`] crate.
pub mod core {
    pub use chatflow_embed_core::*;
}

/// Re-exports of [`chatflow_embed_protocol`] crate.
pub mod protocol {
    pub use chatflow_embed_protocol::*;
}

/// Creates a widget talking to the configured Flowise chatflow.
///
/// # Panics
///
/// Panics if called outside of a tokio runtime.
pub fn init(config: EmbedConfig) -> Widget {
    debug!("initializing widget: {config:?}");
    let EmbedConfig {
        chatflowid,
        api_host,
        api_key,
        chatflow_config,
        observers_config,
        welcome_message,
        chat_id,
        streaming,
        submit_policy,
        idle_timeout,
    } = config;

    let mut flowise_config = FlowiseConfigBuilder::with_chatflow_id(chatflowid);
    if let Some(api_host) = api_host {
        flowise_config = flowise_config.with_api_host(api_host);
    }
    if let Some(api_key) = api_key {
        flowise_config = flowise_config.with_api_key(api_key);
    }
    if let Some(chatflow_config) = chatflow_config {
        flowise_config = flowise_config.with_override_config(chatflow_config);
    }
    let backend = FlowiseBackend::new(flowise_config.build());

    let mut builder = chatflow_embed_core::WidgetBuilder::with_backend(backend)
        .with_observers(observers_config)
        .with_streaming(streaming)
        .with_submit_policy(submit_policy);
    if let Some(text) = welcome_message {
        builder = builder.with_welcome_message(text);
    }
    if let Some(chat_id) = chat_id {
        builder = builder.with_chat_id(chat_id);
    }
    if let Some(idle_timeout) = idle_timeout {
        builder = builder.with_idle_timeout(idle_timeout);
    }
    builder.build()
}
