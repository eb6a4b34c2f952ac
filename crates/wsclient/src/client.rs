//! Client session: connect, send, receive loop and close.

use std::{
    net::SocketAddr,
    ops::ControlFlow,
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use http::{HeaderMap, HeaderName, HeaderValue};
use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    sync::Mutex,
};
use tokio_util::{
    codec::{Decoder as _, FramedRead, FramedWrite},
    sync::CancellationToken,
};
use url::Url;

use crate::{
    ConnectionState, Message, Options, Result, Transport, WebSocketError,
    close::CloseCode,
    codec::{Decoder, Encoder},
    fragment::Reassembler,
    frame::{Frame, MAX_CONTROL_PAYLOAD, OpCode},
    handler::{Handler, NoopHandler},
    handshake::{self, HandshakeRequest, Negotiated},
    state::AtomicState,
    stream,
};

/// Upper bound on writing the close frame and shutting the transport down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type BoxedIo = Box<dyn Transport>;
type Writer = FramedWrite<WriteHalf<BoxedIo>, Encoder>;

/// Builder for [`ClientSession`].
pub struct ClientSessionBuilder {
    url: String,
    tcp_address: Option<SocketAddr>,
    options: Options,
    protocols: Vec<String>,
    extensions: Vec<String>,
    headers: HeaderMap,
    handler: Option<Arc<dyn Handler>>,
}

impl ClientSessionBuilder {
    fn new(url: String) -> Self {
        Self {
            url,
            tcp_address: None,
            options: Options::default(),
            protocols: Vec::new(),
            extensions: Vec::new(),
            headers: HeaderMap::new(),
            handler: None,
        }
    }

    /// Adds a sub-protocol to offer in `Sec-WebSocket-Protocol`.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols.extend(protocols.into_iter().map(Into::into));
        self
    }

    /// Adds an extension offer to `Sec-WebSocket-Extensions`. Offers are sent
    /// verbatim and nothing is negotiated.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extensions.push(extension.into());
        self
    }

    /// Adds a header to the upgrade request.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Connects to `address` instead of resolving the URL host.
    pub fn with_tcp_address(mut self, address: SocketAddr) -> Self {
        self.tcp_address = Some(address);
        self
    }

    pub fn with_handler(mut self, handler: impl Handler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Validates the URL and creates the session. No I/O happens here.
    ///
    /// Fails with [`WebSocketError::InvalidHttpScheme`] unless the scheme is
    /// `ws` or `wss`.
    pub fn build(self) -> Result<ClientSession> {
        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(WebSocketError::InvalidHttpScheme);
        }
        if url.host_str().is_none() {
            return Err(WebSocketError::MissingHost);
        }

        Ok(ClientSession {
            inner: Arc::new(Inner {
                url,
                tcp_address: self.tcp_address,
                options: self.options,
                protocols: self.protocols,
                extensions: self.extensions,
                headers: self.headers,
                handler: self.handler.unwrap_or_else(|| Arc::new(NoopHandler)),
                state: AtomicState::new(ConnectionState::Connecting),
                connecting: AtomicBool::new(false),
                writer: Mutex::new(None),
                shutdown: StdMutex::new(CancellationToken::new()),
                negotiated: StdMutex::new(None),
            }),
        })
    }
}

/// A client WebSocket connection.
///
/// Cloning yields another handle to the same connection. Events are
/// delivered through the [`Handler`] given to the builder.
///
/// ```no_run
/// use wsclient::{ClientSession, close::CloseCode};
///
/// # async fn run() -> wsclient::Result<()> {
/// let session = ClientSession::builder("ws://localhost:9001/chat")
///     .with_protocol("chat")
///     .build()?;
/// session.connect().await?;
/// session.send_binary(vec![1, 2, 3]).await?;
/// session.close(CloseCode::Normal).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<Inner>,
}

struct Inner {
    url: Url,
    tcp_address: Option<SocketAddr>,
    options: Options,
    protocols: Vec<String>,
    extensions: Vec<String>,
    headers: HeaderMap,
    handler: Arc<dyn Handler>,
    state: AtomicState,
    /// Set while a connect attempt runs.
    connecting: AtomicBool,
    /// Serializes every write. `None` when no connection is up.
    writer: Mutex<Option<Writer>>,
    /// Cancelled when the current connection shuts down. Stops its receive
    /// task and aborts writes waiting on the lock or the transport.
    shutdown: StdMutex<CancellationToken>,
    negotiated: StdMutex<Option<Negotiated>>,
}

/// An in-progress connect. Dropping it before [`complete`](Self::complete)
/// ends the attempt in `Closed`, including when the caller drops the
/// `connect` future.
struct ConnectAttempt<'a> {
    inner: &'a Inner,
    completed: bool,
}

impl ConnectAttempt<'_> {
    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        let inner = self.inner;
        if !self.completed {
            let _ = inner
                .state
                .transition_from(ConnectionState::Connecting, ConnectionState::Closed);
        }
        inner.connecting.store(false, Ordering::Release);

        if !self.completed {
            tracing::debug!(url = %inner.url, "connect attempt ended without a connection");
            inner.handler.on_ready(inner.state.load());
        }
    }
}

impl ClientSession {
    pub fn builder(url: impl Into<String>) -> ClientSessionBuilder {
        ClientSessionBuilder::new(url.into())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.load()
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Sub-protocol and extensions echoed by the server on the last
    /// successful handshake.
    pub fn negotiated(&self) -> Option<Negotiated> {
        self.inner
            .negotiated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Opens a TCP (or TLS for `wss`) connection and performs the upgrade.
    ///
    /// `on_ready` fires once with the resulting state. On failure the state
    /// is `Closed` and the transport is dropped. A closed session may connect
    /// again. Dropping the returned future abandons the attempt the same
    /// way, so it may be wrapped in an external timeout.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let attempt = inner.begin_connect()?;

        let connecting = async {
            let io = stream::connect_transport(&inner.url, inner.tcp_address, &inner.options).await?;
            inner.handshake(Box::new(io)).await
        };
        let result = match inner.options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .unwrap_or_else(|_| Err(WebSocketError::ConnectTimeout)),
            None => connecting.await,
        };

        inner.finish_connect(attempt, result).await
    }

    /// Performs the upgrade over an already open transport.
    pub async fn connect_with<S: Transport>(&self, io: S) -> Result<()> {
        let inner = &self.inner;
        let attempt = inner.begin_connect()?;

        let result = inner.handshake(Box::new(io)).await;
        inner.finish_connect(attempt, result).await
    }

    /// Sends a data message as a single masked frame.
    ///
    /// Ignored unless the connection is up, and ignored for an empty payload.
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        let message = message.into();
        if message.is_empty() {
            tracing::debug!("ignoring empty message");
            return Ok(());
        }
        self.inner.send_frame(message.into_frame()).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into())).await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(Message::Binary(data.into())).await
    }

    /// Sends a ping. The matching pong is reported through `on_pong`.
    pub async fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ControlFrameTooLarge);
        }
        self.inner.send_frame(Frame::ping(payload)).await
    }

    /// Closes the connection with `code`.
    ///
    /// Does nothing unless the connection is up. A write in flight is
    /// aborted and fails with [`WebSocketError::ConnectionClosed`]. The close
    /// frame is sent best effort within a bounded time: the transport is
    /// released, the state reaches `Closed` and `on_close` fires exactly once
    /// whether or not the write succeeds. A write failure is reported through
    /// `on_error`.
    pub async fn close(&self, code: CloseCode) {
        self.inner.close(code).await;
    }
}

impl Inner {
    fn begin_connect(&self) -> Result<ConnectAttempt<'_>> {
        if self.connecting.swap(true, Ordering::AcqRel) {
            return Err(WebSocketError::InvalidState(ConnectionState::Connecting));
        }

        let result = match self.state.load() {
            ConnectionState::Connecting => Ok(()),
            ConnectionState::Closed => self
                .state
                .transition_from(ConnectionState::Closed, ConnectionState::Connecting)
                .map_err(WebSocketError::InvalidState),
            other => Err(WebSocketError::InvalidState(other)),
        };

        match result {
            Ok(()) => Ok(ConnectAttempt {
                inner: self,
                completed: false,
            }),
            Err(err) => {
                self.connecting.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    fn request(&self) -> Result<HandshakeRequest> {
        let mut request = HandshakeRequest::new(&self.url)?
            .with_protocols(self.protocols.clone())
            .with_extensions(self.extensions.clone())
            .with_headers(self.headers.clone());
        if let Some(origin) = &self.options.origin {
            request = request.with_origin(origin.clone());
        }
        if let Some(user_agent) = &self.options.user_agent {
            request = request.with_user_agent(user_agent.clone());
        }
        Ok(request)
    }

    async fn handshake(&self, mut io: BoxedIo) -> Result<(Negotiated, BytesMut, BoxedIo)> {
        let request = self.request()?;
        let (negotiated, leftover) = handshake::perform(&mut io, &request).await?;
        Ok((negotiated, leftover, io))
    }

    /// Installs the connection on success. On failure, dropping `attempt`
    /// moves the session to `Closed` and reports it through `on_ready`.
    async fn finish_connect(
        self: &Arc<Self>,
        attempt: ConnectAttempt<'_>,
        result: Result<(Negotiated, BytesMut, BoxedIo)>,
    ) -> Result<()> {
        let (negotiated, leftover, io) = match result {
            Ok(parts) => parts,
            Err(err) => {
                tracing::warn!(url = %self.url, error = %err, "websocket connect failed");
                return Err(err);
            }
        };

        let (read, write) = tokio::io::split(io);
        let shutdown = CancellationToken::new();

        let mut slot = self.writer.lock().await;
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = shutdown.clone();
        self.state
            .transition_from(ConnectionState::Connecting, ConnectionState::Connected)
            .map_err(WebSocketError::InvalidState)?;
        *slot = Some(FramedWrite::new(write, Encoder));
        drop(slot);
        attempt.complete();

        tracing::debug!(
            url = %self.url,
            protocol = ?negotiated.protocol,
            "websocket connected"
        );
        *self
            .negotiated
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(negotiated);

        self.handler.on_ready(ConnectionState::Connected);
        tokio::spawn(Arc::clone(self).receive(read, leftover, shutdown));
        Ok(())
    }

    /// Token of the current (or most recent) connection.
    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Moves out of `Connected`/`Open` into `to`. Returns `false` when the
    /// connection was not up, so only one caller wins the shutdown.
    fn leave_active(&self, to: ConnectionState) -> bool {
        loop {
            let current = self.state.load();
            if !current.can_send() {
                return false;
            }
            if self.state.transition_from(current, to).is_ok() {
                return true;
            }
        }
    }

    /// Application write. `Open` is held for the duration of the write.
    async fn send_frame(&self, frame: Frame) -> Result<()> {
        let shutdown = self.shutdown_token();
        let mut slot = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::debug!(opcode = ?frame.opcode(), "send ignored, connection shut down");
                return Ok(());
            }
            slot = self.writer.lock() => slot,
        };

        if let Err(state) = self
            .state
            .transition_from(ConnectionState::Connected, ConnectionState::Open)
        {
            tracing::debug!(%state, opcode = ?frame.opcode(), "send ignored");
            return Ok(());
        }

        let result = match slot.as_mut() {
            Some(writer) => tokio::select! {
                biased;
                _ = shutdown.cancelled() => Err(WebSocketError::ConnectionClosed),
                result = writer.send(frame) => result,
            },
            None => Err(WebSocketError::ConnectionClosed),
        };
        // a concurrent close may already have moved us on
        let _ = self
            .state
            .transition_from(ConnectionState::Open, ConnectionState::Connected);
        drop(slot);

        if let Err(err) = &result {
            tracing::warn!(error = %err, "websocket write failed");
        }
        result
    }

    /// Protocol-level write for the connection owning `shutdown` (pong
    /// replies). Leaves the state alone.
    async fn write_control(&self, frame: Frame, shutdown: &CancellationToken) -> Result<()> {
        let mut slot = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(WebSocketError::ConnectionClosed),
            slot = self.writer.lock() => slot,
        };
        match slot.as_mut() {
            Some(writer) => tokio::select! {
                biased;
                _ = shutdown.cancelled() => Err(WebSocketError::ConnectionClosed),
                result = writer.send(frame) => result,
            },
            None => Err(WebSocketError::ConnectionClosed),
        }
    }

    async fn close(&self, code: CloseCode) {
        if !self.leave_active(ConnectionState::Closing) {
            tracing::debug!(state = %self.state.load(), "close ignored");
            return;
        }
        // releases the writer lock if a send is stuck on the transport
        self.shutdown_token().cancel();

        let frame = if code.is_allowed() {
            Frame::close(code, "")
        } else {
            Frame::new(true, OpCode::Close, None, Bytes::new())
        };

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let written = tokio::time::timeout(CLOSE_TIMEOUT, async {
                writer.send(frame).await?;
                writer.get_mut().shutdown().await?;
                Ok::<_, WebSocketError>(())
            })
            .await
            .unwrap_or_else(|_| {
                Err(WebSocketError::IoError(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "close frame write timed out",
                )))
            });

            if let Err(err) = written {
                tracing::warn!(error = %err, "failed to send close frame");
                self.handler.on_error(&err);
            }
        }

        let _ = self
            .state
            .transition_from(ConnectionState::Closing, ConnectionState::Closed);
        tracing::debug!(%code, "websocket closed");
        self.handler.on_close(code);
    }

    /// Reports `err` and closes with the matching status code.
    async fn fail(&self, err: WebSocketError) {
        tracing::warn!(error = %err, "websocket connection error");
        self.handler.on_error(&err);
        self.close(err.close_code()).await;
    }

    async fn receive(
        self: Arc<Self>,
        read: ReadHalf<BoxedIo>,
        mut leftover: BytesMut,
        shutdown: CancellationToken,
    ) {
        let mut decoder = Decoder::new(self.options.max_payload_read());
        let mut reassembler = Reassembler::new(self.options.max_read_buffer());

        // frames that arrived together with the handshake response
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            let result = match decoder.decode(&mut leftover) {
                Ok(Some(frame)) => self.dispatch(frame, &mut reassembler, &shutdown).await,
                Ok(None) => break,
                Err(err) => Err(err),
            };
            if self.settle(result, &shutdown).await.is_break() {
                return;
            }
        }

        let mut reader = FramedRead::with_capacity(read, decoder, self.options.read_chunk_size());
        reader.read_buffer_mut().extend_from_slice(&leftover);

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                next = reader.next() => next,
            };
            // the connection may have been replaced while the read was pending
            if shutdown.is_cancelled() || !self.state.load().can_send() {
                return;
            }

            let result = match next {
                Some(Ok(frame)) => self.dispatch(frame, &mut reassembler, &shutdown).await,
                Some(Err(err)) => Err(err),
                None => {
                    if reassembler.is_pending() {
                        tracing::debug!("dropping partial message at end of stream");
                    }
                    Err(WebSocketError::IoError(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed without a close frame",
                    )))
                }
            };
            if self.settle(result, &shutdown).await.is_break() {
                return;
            }
        }
    }

    /// Turns a dispatch outcome into loop control. Errors close the
    /// connection unless it has already been shut down.
    async fn settle(
        &self,
        result: Result<ControlFlow<()>>,
        shutdown: &CancellationToken,
    ) -> ControlFlow<()> {
        match result {
            Ok(flow) => flow,
            Err(err) => {
                if !shutdown.is_cancelled() {
                    self.fail(err).await;
                }
                ControlFlow::Break(())
            }
        }
    }

    async fn dispatch(
        &self,
        frame: Frame,
        reassembler: &mut Reassembler,
        shutdown: &CancellationToken,
    ) -> Result<ControlFlow<()>> {
        tracing::trace!(?frame, "frame received");

        match frame.opcode() {
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                if let Some(message) = reassembler.push(frame)? {
                    self.handler.on_message(message);
                }
            }
            OpCode::Ping => {
                let (_, _, payload) = frame.into_parts();
                self.write_control(Frame::pong(payload), shutdown).await?;
            }
            OpCode::Pong => self.handler.on_pong(frame.into_parts().2),
            OpCode::Close => {
                let code = frame.close_code().unwrap_or(CloseCode::Status);
                if self.leave_active(ConnectionState::Closing) {
                    shutdown.cancel();
                    self.writer.lock().await.take();
                    let _ = self
                        .state
                        .transition_from(ConnectionState::Closing, ConnectionState::Closed);
                    tracing::debug!(%code, "websocket closed by server");
                    self.handler.on_close(code);
                }
                return Ok(ControlFlow::Break(()));
            }
        }

        Ok(ControlFlow::Continue(()))
    }
}
