//! Application callbacks.
//!
//! A session reports everything through one [`Handler`]. Callbacks run on
//! the task that observed the event: `on_ready` on the caller of `connect`,
//! the rest on the session's receive task (or the caller of `close`). They
//! should not block.

use std::fmt;

use bytes::Bytes;

use crate::{ConnectionState, Message, WebSocketError, close::CloseCode};

/// Receiver of session events. Every method defaults to a no-op.
pub trait Handler: Send + Sync + 'static {
    /// Called once per connect attempt with the resulting state: `Connected`
    /// after a successful handshake, `Closed` after a failed one.
    fn on_ready(&self, _state: ConnectionState) {}

    /// A complete text or binary message arrived.
    fn on_message(&self, _message: Message) {}

    /// A protocol, I/O or close-write error occurred.
    fn on_error(&self, _error: &WebSocketError) {}

    /// The connection closed, locally or by the server. Called at most once
    /// per connection.
    fn on_close(&self, _code: CloseCode) {}

    /// A pong arrived, solicited or not.
    fn on_pong(&self, _payload: Bytes) {}
}

/// Handler that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl Handler for NoopHandler {}

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// [`Handler`] assembled from closures.
///
/// ```rust
/// use wsclient::{Callbacks, Message};
///
/// let handler = Callbacks::new()
///     .on_message(|msg: Message| println!("{:?}", msg.as_text()))
///     .on_error(|err| eprintln!("websocket error: {err}"));
/// # let _ = handler;
/// ```
#[derive(Default)]
pub struct Callbacks {
    ready: Option<Callback<ConnectionState>>,
    message: Option<Callback<Message>>,
    error: Option<Box<dyn Fn(&WebSocketError) + Send + Sync>>,
    close: Option<Callback<CloseCode>>,
    pong: Option<Callback<Bytes>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_ready(mut self, f: impl Fn(ConnectionState) + Send + Sync + 'static) -> Self {
        self.ready = Some(Box::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(Message) + Send + Sync + 'static) -> Self {
        self.message = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&WebSocketError) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(CloseCode) + Send + Sync + 'static) -> Self {
        self.close = Some(Box::new(f));
        self
    }

    pub fn on_pong(mut self, f: impl Fn(Bytes) + Send + Sync + 'static) -> Self {
        self.pong = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_ready", &self.ready.is_some())
            .field("on_message", &self.message.is_some())
            .field("on_error", &self.error.is_some())
            .field("on_close", &self.close.is_some())
            .field("on_pong", &self.pong.is_some())
            .finish()
    }
}

impl Handler for Callbacks {
    fn on_ready(&self, state: ConnectionState) {
        if let Some(f) = &self.ready {
            f(state);
        }
    }

    fn on_message(&self, message: Message) {
        if let Some(f) = &self.message {
            f(message);
        }
    }

    fn on_error(&self, error: &WebSocketError) {
        if let Some(f) = &self.error {
            f(error);
        }
    }

    fn on_close(&self, code: CloseCode) {
        if let Some(f) = &self.close {
            f(code);
        }
    }

    fn on_pong(&self, payload: Bytes) {
        if let Some(f) = &self.pong {
            f(payload);
        }
    }
}
