//! C bindings for embedding the widget into native hosts.
//!
//! A host creates a config with `cfe_config_new`, adjusts it, turns it into
//! a widget with `cfe_init` and finally releases the widget with
//! `cfe_widget_free`. Widgets run on a runtime owned by the library.

use std::ffi::{CStr, c_char, c_void};
use std::ops::Deref;
use std::sync::{Arc, LazyLock};

use chatflow_embed_core::{Observers, Widget};
use tokio::runtime::{Builder as RuntimeBuilder, Runtime};

use crate::EmbedConfig;

static TOKIO_RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
    RuntimeBuilder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .build()
        .inspect_err(|err| error!("failed to start the runtime: {err}"))
        .ok()
});

/// Error codes returned by the C APIs.
#[repr(u32)]
#[derive(Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// No error occurred.
    Ok = 0,
    /// Invalid parameters or strings.
    Invalid = 1,
    /// The library runtime could not be started.
    Runtime = 2,
}

/// Most methods of `EmbedConfig` consume `self`, which is not possible
/// through a pointer. The wrapper lets us move the config out, change it
/// and put it back.
struct ConfigWrapper {
    config: Option<EmbedConfig>,
}

impl ConfigWrapper {
    fn update(&mut self, f: impl FnOnce(EmbedConfig) -> EmbedConfig) -> ErrorCode {
        let Some(config) = self.config.take() else {
            return ErrorCode::Invalid;
        };
        self.config = Some(f(config));
        ErrorCode::Ok
    }
}

/// Callbacks for various events from the widget.
///
/// Note that callback functions and `user_info` are assumed to be thread-safe
/// and able to send across the thread boundaries. Strings passed to the
/// callbacks are UTF-8, not nul-terminated, and only valid during the call.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct WidgetCallbacks {
    /// User-defined data to be passed to the callbacks.
    pub user_info: *mut c_void,
    /// Called with the text of each submitted question.
    pub on_message_sent:
        Option<unsafe extern "C" fn(*mut c_void, *const c_char, usize)>,
    /// Called with the text of each completed answer.
    pub on_message_received:
        Option<unsafe extern "C" fn(*mut c_void, *const c_char, usize)>,
    /// Called with each piece of a streamed answer.
    pub on_stream_delta:
        Option<unsafe extern "C" fn(*mut c_void, *const c_char, usize)>,
    /// Called when the widget is ready for the next question.
    pub on_idle: Option<unsafe extern "C" fn(*mut c_void)>,
    /// Callback to free the user-defined data.
    pub free: Option<unsafe extern "C" fn(*mut c_void)>,
}

// SAFETY: `WidgetCallbacks` is guaranteed to be thread-safe by users.
unsafe impl Send for WidgetCallbacks {}
unsafe impl Sync for WidgetCallbacks {}

/// Frees the user info once the last observer holding it is dropped.
struct CallbacksGuard {
    callbacks: WidgetCallbacks,
}

impl Deref for CallbacksGuard {
    type Target = WidgetCallbacks;

    fn deref(&self) -> &Self::Target {
        &self.callbacks
    }
}

impl Drop for CallbacksGuard {
    fn drop(&mut self) {
        if let Some(free) = self.callbacks.free {
            // SAFETY: Assume the callback is valid.
            unsafe { free(self.callbacks.user_info) };
        }
    }
}

fn text_observer(
    guard: &Arc<CallbacksGuard>,
    f: unsafe extern "C" fn(*mut c_void, *const c_char, usize),
) -> impl Fn(&str) + Send + Sync + 'static {
    let guard = Arc::clone(guard);
    move |text: &str| {
        // SAFETY: Assume the callback is valid.
        unsafe { f(guard.user_info, text.as_ptr() as *const _, text.len()) };
    }
}

fn observers_from_callbacks(callbacks: WidgetCallbacks) -> Observers {
    let guard = Arc::new(CallbacksGuard { callbacks });
    let mut observers = Observers::default();
    if let Some(f) = callbacks.on_message_sent {
        let observer = text_observer(&guard, f);
        observers = observers
            .on_message_sent(move |message| observer(&message.content));
    }
    if let Some(f) = callbacks.on_message_received {
        let observer = text_observer(&guard, f);
        observers = observers
            .on_message_received(move |message| observer(&message.content));
    }
    if let Some(f) = callbacks.on_stream_delta {
        observers = observers.on_stream_delta(text_observer(&guard, f));
    }
    if let Some(f) = callbacks.on_idle {
        let guard = Arc::clone(&guard);
        observers = observers.on_idle(move || {
            // SAFETY: Assume the callback is valid.
            unsafe { f(guard.user_info) };
        });
    }
    observers
}

/// # Safety
///
/// `ptr` must be null or point to a nul-terminated string that outlives
/// `'a`.
unsafe fn str_from_ptr<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: Checked for null above, the rest is up to the caller.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Creates a widget config for the given chatflow.
///
/// `out` will be set to a pointer to the config if the call succeeds.
///
/// The caller must either free the config or use it to create a widget, or
/// the resources will be leaked.
///
/// # Safety
///
/// `chatflowid` must contain a valid nul terminator at the end of the
/// string. `out` must be a valid pointer that points to a pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cfe_config_new(
    out: *mut *mut c_void,
    chatflowid: *const c_char,
) -> ErrorCode {
    // SAFETY: Assume the caller has provided the valid pointer.
    let Some(chatflowid) = (unsafe { str_from_ptr(chatflowid) }) else {
        return ErrorCode::Invalid;
    };
    let wrapper_ptr = Box::into_raw(Box::new(ConfigWrapper {
        config: Some(EmbedConfig::new(chatflowid)),
    }));
    // SAFETY: Assume `out` is valid and properly aligned.
    unsafe {
        (out as *mut *mut ConfigWrapper).write(wrapper_ptr);
    }
    ErrorCode::Ok
}

/// Sets the Flowise server, `http://localhost:3000` by default.
///
/// # Safety
///
/// `config` must be a valid pointer returned from `cfe_config_new`.
/// `api_host` must contain a valid nul terminator at the end of the string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cfe_config_set_api_host(
    config: *mut c_void,
    api_host: *const c_char,
) -> ErrorCode {
    // SAFETY: Assume the caller has provided the valid pointers.
    let (wrapper, api_host) = unsafe {
        (&mut *(config as *mut ConfigWrapper), str_from_ptr(api_host))
    };
    let Some(api_host) = api_host else {
        return ErrorCode::Invalid;
    };
    wrapper.update(|config| config.with_api_host(api_host))
}

/// Sets the chatflow API key.
///
/// # Safety
///
/// `config` must be a valid pointer returned from `cfe_config_new`.
/// `api_key` must contain a valid nul terminator at the end of the string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cfe_config_set_api_key(
    config: *mut c_void,
    api_key: *const c_char,
) -> ErrorCode {
    // SAFETY: Assume the caller has provided the valid pointers.
    let (wrapper, api_key) = unsafe {
        (&mut *(config as *mut ConfigWrapper), str_from_ptr(api_key))
    };
    let Some(api_key) = api_key else {
        return ErrorCode::Invalid;
    };
    wrapper.update(|config| config.with_api_key(api_key))
}

/// Sets the chatflow overrides from a JSON object string.
///
/// Returns `Invalid` if the string is not a JSON object.
///
/// # Safety
///
/// `config` must be a valid pointer returned from `cfe_config_new`.
/// `json` must contain a valid nul terminator at the end of the string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cfe_config_set_chatflow_config(
    config: *mut c_void,
    json: *const c_char,
) -> ErrorCode {
    // SAFETY: Assume the caller has provided the valid pointers.
    let (wrapper, json) =
        unsafe { (&mut *(config as *mut ConfigWrapper), str_from_ptr(json)) };
    let Some(value) = json
        .and_then(|json| serde_json::from_str::<serde_json::Value>(json).ok())
        .filter(|value| value.is_object())
    else {
        return ErrorCode::Invalid;
    };
    wrapper.update(|config| config.with_chatflow_config(value))
}

/// Sets the message shown before the first question.
///
/// # Safety
///
/// `config` must be a valid pointer returned from `cfe_config_new`.
/// `text` must contain a valid nul terminator at the end of the string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cfe_config_set_welcome_message(
    config: *mut c_void,
    text: *const c_char,
) -> ErrorCode {
    // SAFETY: Assume the caller has provided the valid pointers.
    let (wrapper, text) =
        unsafe { (&mut *(config as *mut ConfigWrapper), str_from_ptr(text)) };
    let Some(text) = text else {
        return ErrorCode::Invalid;
    };
    wrapper.update(|config| config.with_welcome_message(text))
}

/// Sets the callbacks of the widget.
///
/// # Safety
///
/// `config` must be a valid pointer returned from `cfe_config_new`.
/// `callbacks` must be a valid pointer to `WidgetCallbacks` value, and all
/// fields must be either valid pointers or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cfe_config_set_callbacks(
    config: *mut c_void,
    callbacks: *const WidgetCallbacks,
) -> ErrorCode {
    // SAFETY: Assume the caller has provided the valid pointers.
    let (wrapper, callbacks) =
        unsafe { (&mut *(config as *mut ConfigWrapper), *callbacks) };
    let observers = observers_from_callbacks(callbacks);
    wrapper.update(|config| config.with_observers(observers))
}

/// Frees a config that was not used to create a widget.
///
/// # Safety
///
/// `config` must be a valid pointer returned from `cfe_config_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cfe_config_free(config: *mut c_void) {
    // SAFETY: Assume the caller has provided the valid pointer.
    unsafe {
        drop(Box::from_raw(config as *mut ConfigWrapper));
    }
}

/// Creates a widget from a config, consuming the config.
///
/// `out` will be set to a pointer to the widget if the call succeeds. The
/// config is consumed either way.
///
/// # Safety
///
/// `config` must be a valid pointer returned from `cfe_config_new`. `out`
/// must be a valid pointer that points to a pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cfe_init(
    out: *mut *mut c_void,
    config: *mut c_void,
) -> ErrorCode {
    // SAFETY: Assume the caller has provided the valid pointer.
    let mut wrapper = unsafe { Box::from_raw(config as *mut ConfigWrapper) };
    let Some(config) = wrapper.config.take() else {
        return ErrorCode::Invalid;
    };
    let Some(runtime) = &*TOKIO_RUNTIME else {
        return ErrorCode::Runtime;
    };

    // The widget spawns its event loop, which requires a runtime.
    let _enter = runtime.enter();
    let widget_ptr = Box::into_raw(Box::new(crate::init(config)));
    // SAFETY: Assume `out` is valid and properly aligned.
    unsafe {
        (out as *mut *mut Widget).write(widget_ptr);
    }
    ErrorCode::Ok
}

/// Sends a question to the widget.
///
/// The call returns immediately, the answer arrives through the callbacks.
///
/// # Safety
///
/// `widget` must be a valid pointer returned from `cfe_init`. `text` must
/// contain a valid nul terminator at the end of the string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cfe_widget_send_message(
    widget: *mut c_void,
    text: *const c_char,
) -> ErrorCode {
    // SAFETY: Assume the caller has provided the valid pointers.
    let (widget, text) =
        unsafe { (&*(widget as *mut Widget), str_from_ptr(text)) };
    let Some(text) = text else {
        return ErrorCode::Invalid;
    };
    let Some(runtime) = &*TOKIO_RUNTIME else {
        return ErrorCode::Runtime;
    };

    let widget = widget.clone();
    let text = text.to_owned();
    runtime.spawn(async move {
        if let Err(err) = widget.send_prompt(text).await {
            warn!("message was not sent: {err}");
        }
    });
    ErrorCode::Ok
}

/// Cancels the answer in flight, if any.
///
/// # Safety
///
/// `widget` must be a valid pointer returned from `cfe_init`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cfe_widget_cancel(widget: *mut c_void) -> ErrorCode {
    // SAFETY: Assume the caller has provided the valid pointer.
    let widget = unsafe { &*(widget as *mut Widget) }.clone();
    let Some(runtime) = &*TOKIO_RUNTIME else {
        return ErrorCode::Runtime;
    };
    runtime.spawn(async move {
        if let Err(err) = widget.cancel().await {
            debug!("nothing to cancel: {err}");
        }
    });
    ErrorCode::Ok
}

/// Destroys the widget and frees it.
///
/// Blocks until the widget has stopped. No callback is invoked after this
/// call returns.
///
/// # Safety
///
/// `widget` must be a valid pointer returned from `cfe_init`. This function
/// must not be called from inside a callback.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cfe_widget_free(widget: *mut c_void) {
    // SAFETY: Assume the caller has provided the valid pointer.
    let widget = unsafe { Box::from_raw(widget as *mut Widget) };
    if let Some(runtime) = &*TOKIO_RUNTIME {
        runtime.block_on(widget.destroy());
    }
}

#[cfg(test)]
mod tests {
    use std::ptr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    unsafe extern "C" fn count_free(user_info: *mut c_void) {
        // SAFETY: The tests pass a pointer to a static counter.
        let counter = unsafe { &*(user_info as *const AtomicUsize) };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn ignore_text(_: *mut c_void, _: *const c_char, _: usize) {}

    #[test]
    fn test_config_lifecycle() {
        let mut config = ptr::null_mut();
        unsafe {
            assert_eq!(
                cfe_config_new(&mut config, c"flow-1".as_ptr()),
                ErrorCode::Ok
            );
            assert_eq!(
                cfe_config_set_api_host(config, c"http://127.0.0.1:9".as_ptr()),
                ErrorCode::Ok
            );
            assert_eq!(
                cfe_config_set_chatflow_config(config, c"[1, 2]".as_ptr()),
                ErrorCode::Invalid
            );
            assert_eq!(
                cfe_config_set_chatflow_config(
                    config,
                    c"{\"temperature\": 0.2}".as_ptr()
                ),
                ErrorCode::Ok
            );
            assert_eq!(
                cfe_config_set_api_key(config, ptr::null()),
                ErrorCode::Invalid
            );

            let wrapper = &*(config as *mut ConfigWrapper);
            let embed = wrapper.config.as_ref().unwrap();
            assert_eq!(embed.api_host.as_deref(), Some("http://127.0.0.1:9"));
            assert!(embed.chatflow_config.is_some());

            cfe_config_free(config);
        }
    }

    #[test]
    fn test_user_info_freed_once() {
        static FREED: AtomicUsize = AtomicUsize::new(0);

        let callbacks = WidgetCallbacks {
            user_info: &FREED as *const AtomicUsize as *mut c_void,
            on_message_sent: Some(ignore_text),
            on_message_received: None,
            on_stream_delta: Some(ignore_text),
            on_idle: None,
            free: Some(count_free),
        };
        let observers = observers_from_callbacks(callbacks);
        assert_eq!(FREED.load(Ordering::SeqCst), 0);
        drop(observers);
        assert_eq!(FREED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_widget_lifecycle() {
        let mut config = ptr::null_mut();
        let mut widget = ptr::null_mut();
        unsafe {
            assert_eq!(
                cfe_config_new(&mut config, c"flow-1".as_ptr()),
                ErrorCode::Ok
            );
            assert_eq!(cfe_init(&mut widget, config), ErrorCode::Ok);
            assert!(!widget.is_null());
            assert_eq!(cfe_widget_cancel(widget), ErrorCode::Ok);
            cfe_widget_free(widget);
        }
    }
}
