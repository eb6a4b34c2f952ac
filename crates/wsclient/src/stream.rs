use std::{
    net::SocketAddr,
    pin::{Pin, pin},
    sync::Arc,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{self, pki_types::ServerName},
};
use url::{Host, Url};

use crate::{Options, Result, WebSocketError};

/// Byte stream a session can run over.
///
/// Writing, reading and closing map to tokio's `write_all`, `read_buf` and
/// `shutdown`. Implemented for every suitable stream, so tests can hand a
/// `tokio::io::DuplexStream` to [`ClientSession::connect_with`].
///
/// [`ClientSession::connect_with`]: crate::ClientSession::connect_with
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A stream that might be protected with TLS.
#[non_exhaustive]
#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub enum MaybeTlsStream<S> {
    /// Unencrypted socket stream.
    Plain(S),
    /// Encrypted socket stream using `rustls`.
    Tls(TlsStream<S>),
}

impl<S> From<S> for MaybeTlsStream<S> {
    fn from(value: S) -> Self {
        Self::Plain(value)
    }
}

impl<S> From<TlsStream<S>> for MaybeTlsStream<S> {
    fn from(value: TlsStream<S>) -> Self {
        Self::Tls(value)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for MaybeTlsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => pin!(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => pin!(s).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for MaybeTlsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => pin!(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => pin!(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => pin!(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => pin!(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => pin!(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => pin!(s).poll_shutdown(cx),
        }
    }
}

/// TLS connector trusting the bundled webpki roots.
fn tls_connector() -> Result<TlsConnector> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    config.alpn_protocols = vec!["http/1.1".into()];

    Ok(TlsConnector::from(Arc::new(config)))
}

fn server_name(host: Host<&str>) -> Result<ServerName<'static>> {
    match host {
        Host::Domain(domain) => ServerName::try_from(domain.to_owned())
            .map_err(|_| WebSocketError::InvalidDnsName(domain.to_owned())),
        Host::Ipv4(ip) => Ok(ServerName::from(std::net::IpAddr::V4(ip))),
        Host::Ipv6(ip) => Ok(ServerName::from(std::net::IpAddr::V6(ip))),
    }
}

/// Opens the TCP connection for `url` and, for `wss`, runs the TLS
/// handshake on top of it. `tcp_address` bypasses name resolution; the URL
/// host is still used for TLS server name checks.
pub(crate) async fn connect_transport(
    url: &Url,
    tcp_address: Option<SocketAddr>,
    options: &Options,
) -> Result<MaybeTlsStream<TcpStream>> {
    let host = url.host().ok_or(WebSocketError::MissingHost)?;
    let host_str = url.host_str().ok_or(WebSocketError::MissingHost)?;
    let port = url
        .port_or_known_default()
        .ok_or(WebSocketError::InvalidHttpScheme)?;

    let tcp_stream = match tcp_address {
        Some(address) => TcpStream::connect(address).await?,
        None => TcpStream::connect(format!("{host_str}:{port}")).await?,
    };
    if let Err(err) = tcp_stream.set_nodelay(options.no_delay) {
        tracing::debug!(%err, "failed to set TCP_NODELAY");
    }
    tracing::trace!(host = host_str, port, "tcp connected");

    match url.scheme() {
        "ws" => Ok(MaybeTlsStream::Plain(tcp_stream)),
        "wss" => {
            let connector = tls_connector()?;
            let domain = server_name(host)?;
            let tls_stream = connector.connect(domain, tcp_stream).await?;
            tracing::trace!(host = host_str, "tls established");
            Ok(MaybeTlsStream::Tls(tls_stream))
        }
        _ => Err(WebSocketError::InvalidHttpScheme),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn test_server_name() {
        assert!(server_name(Host::Domain("example.com")).is_ok());
        assert!(server_name(Host::Ipv4([127, 0, 0, 1].into())).is_ok());
        assert!(matches!(
            server_name(Host::Domain("bad name")),
            Err(WebSocketError::InvalidDnsName(_))
        ));
    }

    #[test]
    fn test_tls_connector_builds() {
        assert!(tls_connector().is_ok());
    }

    #[tokio::test]
    async fn test_plain_stream_passthrough() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut stream = MaybeTlsStream::Plain(a);

        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        b.write_all(b"pong").await.unwrap();
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_connect_plain_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = Url::parse(&format!("ws://{addr}/")).unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let stream = connect_transport(&url, None, &Options::default().with_no_delay())
            .await
            .unwrap();
        assert!(matches!(stream, MaybeTlsStream::Plain(_)));
        accept.await.unwrap();
    }
}
