//! Connection configuration.

use std::time::Duration;

/// Default maximum payload of a single incoming frame: 1 MiB.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// Default maximum size of a reassembled fragmented message: 2 MiB.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// Initial capacity of the receive buffer.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Configuration for a client connection.
///
/// ```rust
/// use std::time::Duration;
/// use wsclient::Options;
///
/// let options = Options::default()
///     .with_max_payload_read(64 * 1024)
///     .with_connect_timeout(Duration::from_secs(5))
///     .with_no_delay();
/// assert_eq!(options.max_read_buffer(), 128 * 1024);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Maximum payload accepted in one frame. Default [`MAX_PAYLOAD_READ`].
    pub max_payload_read: Option<usize>,

    /// Maximum total size of a fragmented message. Defaults to twice
    /// `max_payload_read` when that is set, otherwise [`MAX_READ_BUFFER`].
    pub max_read_buffer: Option<usize>,

    /// `Origin` header override.
    pub origin: Option<String>,

    /// `User-Agent` header override.
    pub user_agent: Option<String>,

    /// Disables Nagle's algorithm on the TCP socket.
    ///
    /// Default: `false`
    pub no_delay: bool,

    /// Upper bound on TCP connect, TLS setup and the upgrade handshake
    /// combined. No limit when unset.
    pub connect_timeout: Option<Duration>,

    /// Initial receive buffer capacity. Default 8 KiB.
    pub read_chunk_size: Option<usize>,
}

impl Options {
    /// Sets both the frame and message limits.
    pub fn with_limits(self, max_payload: usize, max_buffer: usize) -> Self {
        Self {
            max_payload_read: Some(max_payload),
            max_read_buffer: Some(max_buffer),
            ..self
        }
    }

    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }

    pub fn with_origin(self, origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            ..self
        }
    }

    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: Some(user_agent.into()),
            ..self
        }
    }

    /// Enables TCP_NODELAY on the socket.
    pub fn with_no_delay(self) -> Self {
        Self {
            no_delay: true,
            ..self
        }
    }

    pub fn with_connect_timeout(self, timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
            ..self
        }
    }

    pub fn with_read_chunk_size(self, size: usize) -> Self {
        Self {
            read_chunk_size: Some(size),
            ..self
        }
    }

    pub fn max_payload_read(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }

    pub fn max_read_buffer(&self) -> usize {
        self.max_read_buffer.unwrap_or(
            self.max_payload_read
                .map(|payload_read| payload_read.saturating_mul(2))
                .unwrap_or(MAX_READ_BUFFER),
        )
    }

    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk_size.unwrap_or(READ_CHUNK_SIZE)
    }
}
