//! # wsclient
//!
//! Client-side WebSocket (RFC 6455) protocol engine for tokio.
//!
//! The crate upgrades a TCP or TLS stream to a WebSocket connection, encodes
//! outgoing messages into masked frames, reassembles incoming frames into
//! messages and drives the connection lifecycle: handshake, keepalive
//! replies, orderly close and error close.
//!
//! # Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ ClientSession                                │
//! │ • callbacks (on_ready/on_message/...)        │
//! │ • receive loop, ping replies, close          │
//! └───────┬──────────────────────────┬───────────┘
//!         │                          │
//! ┌───────▼──────────┐   ┌───────────▼──────────┐
//! │ Reassembler      │   │ Handshake            │
//! │ • fragment runs  │   │ • upgrade request    │
//! │ • UTF-8 checks   │   │ • accept-key check   │
//! └───────┬──────────┘   └──────────────────────┘
//!         │
//! ┌───────▼──────────────────────────────────────┐
//! │ Codec                                        │
//! │ • header / length variants                   │
//! │ • masking, NeedMoreData                      │
//! └───────┬──────────────────────────────────────┘
//!         │
//!   Network (TCP/TLS)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use wsclient::{Callbacks, ClientSession, Message};
//!
//! async fn run() -> wsclient::Result<()> {
//!     let handler = Callbacks::new()
//!         .on_message(|msg: Message| println!("received {} bytes", msg.len()))
//!         .on_close(|code| println!("closed with {code}"));
//!
//!     let session = ClientSession::builder("wss://echo.websocket.org")
//!         .with_handler(handler)
//!         .build()?;
//!
//!     session.connect().await?;
//!     session.send_text("hello").await?;
//!     session.close(wsclient::close::CloseCode::Normal).await;
//!     Ok(())
//! }
//! ```

mod client;
pub mod close;
pub mod codec;
pub mod fragment;
pub mod frame;
pub mod handler;
pub mod handshake;
#[doc(hidden)]
pub mod mask;
mod message;
mod options;
pub mod state;
mod stream;

pub use client::{ClientSession, ClientSessionBuilder};
pub use frame::{Frame, OpCode};
pub use handler::{Callbacks, Handler};
pub use handshake::Negotiated;
pub use message::{Message, MessageKind};
pub use options::{MAX_PAYLOAD_READ, MAX_READ_BUFFER, Options};
pub use state::ConnectionState;
pub use stream::{MaybeTlsStream, Transport};
use thiserror::Error;

use crate::close::CloseCode;

/// Result type for WebSocket operations.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// URL scheme is not ws:// or wss://.
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// URL has no host to connect to.
    #[error("URL has no host")]
    MissingHost,

    /// URL parsing error.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// HTTP status code not valid for WebSocket upgrade.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Missing or invalid "Upgrade: websocket" header.
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// Missing or invalid "Connection: upgrade" header.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// Sec-WebSocket-Accept is missing or does not match the request key.
    #[error("Invalid Sec-WebSocket-Accept (expected={expected}, actual={actual:?})")]
    InvalidAcceptKey {
        expected: String,
        actual: Option<String>,
    },

    /// Handshake response is not a well-formed HTTP/1.1 header block.
    #[error("Malformed handshake response: {0}")]
    MalformedResponse(&'static str),

    /// Handshake response header block exceeds the read limit.
    #[error("Handshake response too large")]
    ResponseTooLarge,

    /// Server sent a masked frame.
    #[error("Server frames must not be masked")]
    MaskedFrame,

    /// Invalid frame opcode.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Reserved bits in frame header are not zero.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// Control frame is fragmented.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// Control frame payload exceeds 125 bytes.
    #[error("Control frame too large")]
    ControlFrameTooLarge,

    /// Frame or assembled message exceeds the configured maximum.
    #[error("Frame too large")]
    FrameTooLarge,

    /// Data frame started while a fragmented message was pending.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// Continuation frame without initial frame.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// Payload contains invalid UTF-8.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// Connection has been closed.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Operation not allowed in the current connection state.
    #[error("Not allowed while {0}")]
    InvalidState(ConnectionState),

    /// Connect, TLS setup and handshake did not finish in time.
    #[error("Connect timed out")]
    ConnectTimeout,

    /// Host name is not a valid TLS server name.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(String),

    /// TLS configuration error.
    #[error(transparent)]
    Tls(#[from] rustls::Error),

    /// I/O error.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl WebSocketError {
    /// Returns `true` if this is a protocol-level error (RFC 6455 violation).
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::MaskedFrame
                | Self::InvalidOpCode(_)
                | Self::ReservedBitsNotZero
                | Self::ControlFrameFragmented
                | Self::ControlFrameTooLarge
                | Self::InvalidFragment
                | Self::InvalidContinuationFrame
        )
    }

    /// Returns `true` if this is a handshake error.
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidStatusCode(_)
                | Self::InvalidUpgradeHeader
                | Self::InvalidConnectionHeader
                | Self::InvalidAcceptKey { .. }
                | Self::MalformedResponse(_)
                | Self::ResponseTooLarge
        )
    }

    /// Returns `true` if the connection is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }

    /// Returns `true` if this wraps an I/O error.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::IoError(_))
    }

    /// Returns the underlying I/O error, if any.
    pub fn as_io_error(&self) -> Option<&std::io::Error> {
        match self {
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }

    /// Close code sent to the server when this error ends a connection.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::InvalidOpCode(_) => CloseCode::Unsupported,
            Self::InvalidUTF8 => CloseCode::Invalid,
            Self::FrameTooLarge => CloseCode::Size,
            err if err.is_protocol_error() => CloseCode::Protocol,
            _ => CloseCode::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_code_follows_error_class() {
        assert_eq!(
            WebSocketError::InvalidOpCode(0x3).close_code(),
            CloseCode::Unsupported
        );
        assert_eq!(WebSocketError::MaskedFrame.close_code(), CloseCode::Protocol);
        assert_eq!(
            WebSocketError::InvalidContinuationFrame.close_code(),
            CloseCode::Protocol
        );
        assert_eq!(WebSocketError::InvalidUTF8.close_code(), CloseCode::Invalid);
        assert_eq!(WebSocketError::FrameTooLarge.close_code(), CloseCode::Size);
        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert_eq!(WebSocketError::from(eof).close_code(), CloseCode::Error);
    }

    #[test]
    fn classification() {
        assert!(WebSocketError::MaskedFrame.is_protocol_error());
        assert!(!WebSocketError::MaskedFrame.is_handshake_error());
        assert!(WebSocketError::InvalidStatusCode(400).is_handshake_error());
        assert!(WebSocketError::ConnectionClosed.is_closed());
        let err = WebSocketError::from(std::io::Error::other("boom"));
        assert!(err.is_io_error());
        assert!(err.as_io_error().is_some());
    }
}
