//! Render instrumentation.
//!
//! When `template_debug` is on, every render dispatches [`TEMPLATE_RENDERED`]
//! so test clients and debugging panels can observe which template rendered
//! and with which context.
//!
//! ```
//! use std::sync::Arc;
//! use jingo_template::signals::{Signal, TemplateRendered};
//!
//! let signal: Signal<TemplateRendered> = Signal::new();
//! signal.connect("printer", Arc::new(|event: &TemplateRendered| {
//!     println!("rendered {}", event.name);
//! }));
//! assert_eq!(signal.receiver_count(), 1);
//! ```

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

/// A receiver callback. Receivers must be `Send + Sync` so renders on any
/// thread can dispatch.
pub type SignalReceiver<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A signal carrying payloads of type `T` to connected receivers.
///
/// Receivers are called in connection order.
pub struct Signal<T: 'static> {
    receivers: RwLock<Vec<(String, SignalReceiver<T>)>>,
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Signal<T> {
    /// Creates a signal with no receivers.
    pub const fn new() -> Self {
        Self {
            receivers: RwLock::new(Vec::new()),
        }
    }

    /// Connects a receiver. A receiver with the same id is replaced.
    pub fn connect(&self, receiver_id: impl Into<String>, callback: SignalReceiver<T>) {
        let id = receiver_id.into();
        let mut receivers = self.receivers.write().expect("signal lock poisoned");

        if let Some(entry) = receivers.iter_mut().find(|(rid, _)| *rid == id) {
            entry.1 = callback;
        } else {
            receivers.push((id, callback));
        }
    }

    /// Disconnects the receiver with the given id. Returns `true` if one was removed.
    pub fn disconnect(&self, receiver_id: &str) -> bool {
        let mut receivers = self.receivers.write().expect("signal lock poisoned");
        let len_before = receivers.len();
        receivers.retain(|(id, _)| id != receiver_id);
        receivers.len() < len_before
    }

    /// Sends `payload` to every receiver and returns how many were called.
    pub fn send(&self, payload: &T) -> usize {
        // Snapshot so a receiver may connect or disconnect without deadlocking.
        let receivers: Vec<SignalReceiver<T>> = self
            .receivers
            .read()
            .expect("signal lock poisoned")
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in &receivers {
            callback(payload);
        }
        receivers.len()
    }

    /// Returns the number of connected receivers.
    pub fn receiver_count(&self) -> usize {
        self.receivers.read().expect("signal lock poisoned").len()
    }
}

/// Payload of [`TEMPLATE_RENDERED`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRendered {
    /// The template name (`<string>` for inline templates).
    pub name: String,
    /// Where the source came from, if it was loaded.
    pub origin: Option<String>,
    /// The keys of the flattened render context, sorted.
    pub context_keys: Vec<String>,
}

/// Dispatched after each render when `template_debug` is enabled.
pub static TEMPLATE_RENDERED: Lazy<Signal<TemplateRendered>> = Lazy::new(Signal::new);
