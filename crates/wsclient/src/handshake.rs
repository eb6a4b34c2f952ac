//! # handshake
//!
//! HTTP/1.1 upgrade negotiation
//! ([RFC 6455 Section 4.1](https://datatracker.ietf.org/doc/html/rfc6455#section-4.1)).
//!
//! The client sends a `GET` carrying a random `Sec-WebSocket-Key`; the server
//! must answer `101 Switching Protocols` with `Connection: Upgrade`,
//! `Upgrade: websocket` and a `Sec-WebSocket-Accept` derived from the key.
//! Any bytes that follow the response header block already belong to the
//! frame stream and are handed back to the caller.

use base64::prelude::*;
use bytes::BytesMut;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::{Result, WebSocketError};

/// GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest response header block accepted from a server.
pub const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Fresh `Sec-WebSocket-Key`: 16 random bytes, standard base64.
pub fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Expected `Sec-WebSocket-Accept` for `key`.
pub fn sec_websocket_accept(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// What the server agreed to, echoed from its response. Neither value is
/// enforced against what was requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiated {
    /// Selected sub-protocol, if the server named one.
    pub protocol: Option<String>,
    /// Extension offers accepted by the server, one entry per offer.
    pub extensions: Vec<String>,
}

/// Client upgrade request.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    host: String,
    path: String,
    origin: String,
    user_agent: String,
    key: String,
    protocols: Vec<String>,
    extensions: Vec<String>,
    headers: HeaderMap,
}

impl HandshakeRequest {
    /// Builds a request for `url` with a freshly generated key.
    ///
    /// `Host` carries the port only when the URL names a non-default one.
    /// `Origin` defaults to `http://host` for `ws` and `https://host` for
    /// `wss`.
    pub fn new(url: &Url) -> Result<Self> {
        let origin_scheme = match url.scheme() {
            "ws" => "http",
            "wss" => "https",
            _ => return Err(WebSocketError::InvalidHttpScheme),
        };
        let host_name = url.host_str().ok_or(WebSocketError::MissingHost)?;
        let host = match url.port() {
            Some(port) => format!("{host_name}:{port}"),
            None => host_name.to_owned(),
        };

        let path = &url[url::Position::BeforePath..url::Position::AfterQuery];
        let path = if path.is_empty() { "/" } else { path };

        Ok(Self {
            origin: format!("{origin_scheme}://{host}"),
            host,
            path: path.to_owned(),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
            key: generate_key(),
            protocols: Vec::new(),
            extensions: Vec::new(),
            headers: HeaderMap::new(),
        })
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_protocols(mut self, protocols: Vec<String>) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// The `Sec-WebSocket-Key` this request carries.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Renders the request line and headers, terminated by an empty line.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Origin: {}\r\n\
             User-Agent: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            self.path, self.host, self.origin, self.user_agent, self.key
        )
        .into_bytes();

        if !self.protocols.is_empty() {
            push_header(&mut out, "Sec-WebSocket-Protocol", self.protocols.join(", ").as_bytes());
        }
        if !self.extensions.is_empty() {
            push_header(&mut out, "Sec-WebSocket-Extensions", self.extensions.join("; ").as_bytes());
        }
        for (name, value) in &self.headers {
            push_header(&mut out, name.as_str(), value.as_bytes());
        }

        out.extend_from_slice(b"\r\n");
        out
    }
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

/// Parsed server response head.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    status: StatusCode,
    headers: HeaderMap,
}

impl HandshakeResponse {
    /// Parses an `HTTP/1.1` status line and header block. Trailing CRLFs are
    /// optional.
    pub fn parse(head: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(head)
            .map_err(|_| WebSocketError::MalformedResponse("response head is not UTF-8"))?;
        let mut lines = text.split("\r\n");

        let status_line = lines
            .next()
            .ok_or(WebSocketError::MalformedResponse("missing status line"))?;
        let mut parts = status_line.splitn(3, ' ');
        if parts.next() != Some("HTTP/1.1") {
            return Err(WebSocketError::MalformedResponse("expected HTTP/1.1"));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or(WebSocketError::MalformedResponse("invalid status code"))?;

        let mut headers = HeaderMap::new();
        for line in lines.take_while(|line| !line.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or(WebSocketError::MalformedResponse("header line without colon"))?;
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|_| WebSocketError::MalformedResponse("invalid header name"))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|_| WebSocketError::MalformedResponse("invalid header value"))?;
            headers.append(name, value);
        }

        Ok(Self { status, headers })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|h| h.to_str().ok())
    }
}

/// Checks that `response` completes the upgrade requested with `key`.
///
/// All four conditions must hold: status 101, a `Connection` header listing
/// `Upgrade`, `Upgrade: websocket` and the matching `Sec-WebSocket-Accept`.
pub fn verify(response: &HandshakeResponse, key: &str) -> Result<Negotiated> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(WebSocketError::InvalidStatusCode(response.status().as_u16()));
    }

    let connection_upgrade = response.headers().get_all(header::CONNECTION).iter().any(|h| {
        h.to_str()
            .map(|h| h.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")))
            .unwrap_or(false)
    });
    if !connection_upgrade {
        return Err(WebSocketError::InvalidConnectionHeader);
    }

    if !response
        .header_str(&header::UPGRADE)
        .map(|h| h.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
    {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }

    let expected = sec_websocket_accept(key);
    let actual = response.header_str(&header::SEC_WEBSOCKET_ACCEPT);
    if actual.map(str::trim) != Some(expected.as_str()) {
        return Err(WebSocketError::InvalidAcceptKey {
            expected,
            actual: actual.map(str::to_owned),
        });
    }

    let protocol = response
        .header_str(&header::SEC_WEBSOCKET_PROTOCOL)
        .map(|p| p.trim().to_owned())
        .filter(|p| !p.is_empty());
    let extensions = response
        .headers()
        .get_all(header::SEC_WEBSOCKET_EXTENSIONS)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(','))
        .map(|e| e.trim().to_owned())
        .filter(|e| !e.is_empty())
        .collect();

    Ok(Negotiated {
        protocol,
        extensions,
    })
}

/// Reads a response head from `io`.
///
/// Returns the parsed head and whatever bytes arrived after the blank line
/// that ends it. Fails with [`WebSocketError::ResponseTooLarge`] once `limit`
/// bytes have been read without finding the end of the head.
pub async fn read_response<S>(io: &mut S, limit: usize) -> Result<(HandshakeResponse, BytesMut)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        let searched = buf.len().saturating_sub(3);
        buf.reserve(1024);
        let n = io.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(WebSocketError::IoError(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed during handshake",
            )));
        }

        if let Some(pos) = find_head_end(&buf[searched..]) {
            let head = buf.split_to(searched + pos + 4);
            if head.len() > limit {
                return Err(WebSocketError::ResponseTooLarge);
            }
            let response = HandshakeResponse::parse(&head)?;
            return Ok((response, buf));
        }

        if buf.len() > limit {
            return Err(WebSocketError::ResponseTooLarge);
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Sends `request` over `io`, then reads and verifies the response.
///
/// On success returns the negotiated values and any frame bytes that arrived
/// with the response.
pub async fn perform<S>(io: &mut S, request: &HandshakeRequest) -> Result<(Negotiated, BytesMut)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    io.write_all(&request.to_bytes()).await?;
    io.flush().await?;

    let (response, leftover) = read_response(io, MAX_RESPONSE_HEAD).await?;
    tracing::trace!(status = %response.status(), "handshake response received");

    let negotiated = verify(&response, request.key())?;
    Ok((negotiated, leftover))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const RFC_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    fn response(extra: &str) -> HandshakeResponse {
        let raw = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {RFC_ACCEPT}\r\n{extra}\r\n"
        );
        HandshakeResponse::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn test_accept_key_rfc_example() {
        assert_eq!(sec_websocket_accept(RFC_KEY), RFC_ACCEPT);
    }

    #[test]
    fn test_generate_key_is_16_bytes() {
        let key = generate_key();
        assert_eq!(BASE64_STANDARD.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_request_rendering() {
        let url = Url::parse("ws://example.com:9001/chat?room=1#frag").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-token", HeaderValue::from_static("abc"));

        let request = HandshakeRequest::new(&url)
            .unwrap()
            .with_key(RFC_KEY)
            .with_protocols(vec!["chat".into(), "superchat".into()])
            .with_extensions(vec!["permessage-foo".into(), "x-bar".into()])
            .with_headers(headers);
        let text = String::from_utf8(request.to_bytes()).unwrap();

        assert!(text.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com:9001\r\n"));
        assert!(text.contains("Origin: http://example.com:9001\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains(&format!("Sec-WebSocket-Key: {RFC_KEY}\r\n")));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: chat, superchat\r\n"));
        assert!(text.contains("Sec-WebSocket-Extensions: permessage-foo; x-bar\r\n"));
        assert!(text.contains("x-token: abc\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_request_defaults() {
        let url = Url::parse("wss://example.com").unwrap();
        let request = HandshakeRequest::new(&url).unwrap();
        let text = String::from_utf8(request.to_bytes()).unwrap();

        assert!(text.starts_with("GET / HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.contains("Origin: https://example.com\r\n"));
        assert!(text.contains("User-Agent: wsclient/"));
        assert!(!text.contains("Sec-WebSocket-Protocol"));
        assert!(!text.contains("Sec-WebSocket-Extensions"));
    }

    #[test]
    fn test_request_rejects_http_scheme() {
        let url = Url::parse("http://example.com").unwrap();
        assert!(matches!(
            HandshakeRequest::new(&url),
            Err(WebSocketError::InvalidHttpScheme)
        ));
    }

    #[test]
    fn test_parse_response() {
        let resp = response("Sec-WebSocket-Protocol: chat\r\n");
        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(resp.headers().get("upgrade").unwrap(), "websocket");
        assert_eq!(resp.headers().get("sec-websocket-protocol").unwrap(), "chat");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(HandshakeResponse::parse(b"HTTP/1.0 101 OK\r\n\r\n").is_err());
        assert!(HandshakeResponse::parse(b"HTTP/1.1 abc\r\n\r\n").is_err());
        assert!(HandshakeResponse::parse(b"HTTP/1.1 101 OK\r\nbroken\r\n\r\n").is_err());
    }

    #[test]
    fn test_verify_accepts_valid_response() {
        let negotiated = verify(
            &response("Sec-WebSocket-Protocol: chat\r\nSec-WebSocket-Extensions: a, b\r\n"),
            RFC_KEY,
        )
        .unwrap();
        assert_eq!(negotiated.protocol.as_deref(), Some("chat"));
        assert_eq!(negotiated.extensions, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        let raw = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             upgrade: WebSocket\r\n\
             connection: keep-alive, upgrade\r\n\
             sec-websocket-accept: {RFC_ACCEPT}\r\n\r\n"
        );
        let resp = HandshakeResponse::parse(raw.as_bytes()).unwrap();
        assert!(verify(&resp, RFC_KEY).is_ok());
    }

    #[test]
    fn test_verify_failures() {
        let bad_status = HandshakeResponse::parse(b"HTTP/1.1 400 Bad Request\r\n\r\n").unwrap();
        assert!(matches!(
            verify(&bad_status, RFC_KEY),
            Err(WebSocketError::InvalidStatusCode(400))
        ));

        let no_connection = HandshakeResponse::parse(
            format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
                 Sec-WebSocket-Accept: {RFC_ACCEPT}\r\n\r\n"
            )
            .as_bytes(),
        )
        .unwrap();
        assert!(matches!(
            verify(&no_connection, RFC_KEY),
            Err(WebSocketError::InvalidConnectionHeader)
        ));

        let bad_upgrade = HandshakeResponse::parse(
            format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: h2c\r\nConnection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {RFC_ACCEPT}\r\n\r\n"
            )
            .as_bytes(),
        )
        .unwrap();
        assert!(matches!(
            verify(&bad_upgrade, RFC_KEY),
            Err(WebSocketError::InvalidUpgradeHeader)
        ));

        assert!(matches!(
            verify(&response(""), "AAAAAAAAAAAAAAAAAAAAAA=="),
            Err(WebSocketError::InvalidAcceptKey { actual: Some(_), .. })
        ));
    }

    #[tokio::test]
    async fn test_read_response_keeps_leftover() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let raw = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Accept: {RFC_ACCEPT}\r\n\r\n"
        );
        server.write_all(raw.as_bytes()).await.unwrap();
        server.write_all(&[0x81, 0x02, b'h', b'i']).await.unwrap();

        let (resp, leftover) = read_response(&mut client, MAX_RESPONSE_HEAD).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(&leftover[..], &[0x81, 0x02, b'h', b'i']);
    }

    #[tokio::test]
    async fn test_read_response_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let writer = tokio::spawn(async move {
            for chunk in ["HTTP/1.1 101 OK\r", "\nUpgrade: websocket\r\n\r", "\n"] {
                server.write_all(chunk.as_bytes()).await.unwrap();
                tokio::task::yield_now().await;
            }
            server
        });

        let (resp, leftover) = read_response(&mut client, MAX_RESPONSE_HEAD).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert!(leftover.is_empty());
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_response_limit() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        server.write_all(b"HTTP/1.1 101 OK\r\n").await.unwrap();
        server.write_all(&vec![b'a'; 20 * 1024]).await.unwrap();

        assert!(matches!(
            read_response(&mut client, MAX_RESPONSE_HEAD).await,
            Err(WebSocketError::ResponseTooLarge)
        ));
    }

    #[tokio::test]
    async fn test_read_response_eof() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"HTTP/1.1 101").await.unwrap();
        drop(server);

        let err = read_response(&mut client, MAX_RESPONSE_HEAD).await.unwrap_err();
        assert!(err.is_io_error());
    }

    #[tokio::test]
    async fn test_perform_against_scripted_server() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let url = Url::parse("ws://localhost:8080/ws").unwrap();
        let request = HandshakeRequest::new(&url).unwrap();
        let key = request.key().to_owned();

        let server_task = tokio::spawn(async move {
            let (head, _) = read_request(&mut server).await;
            assert!(head.starts_with("GET /ws HTTP/1.1\r\n"));
            let reply = format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
                 Connection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
                sec_websocket_accept(&key)
            );
            server.write_all(reply.as_bytes()).await.unwrap();
            server
        });

        let (negotiated, leftover) = perform(&mut client, &request).await.unwrap();
        assert_eq!(negotiated, Negotiated::default());
        assert!(leftover.is_empty());
        drop(server_task.await.unwrap());
    }

    async fn read_request(io: &mut tokio::io::DuplexStream) -> (String, BytesMut) {
        let mut buf = BytesMut::new();
        loop {
            io.read_buf(&mut buf).await.unwrap();
            if let Some(pos) = find_head_end(&buf) {
                let head = buf.split_to(pos + 4);
                return (String::from_utf8(head.to_vec()).unwrap(), buf);
            }
        }
    }
}
