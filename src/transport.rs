//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::MqttError;

/// TLS material, all paths to PEM files.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct TlsConfig {
    #[builder(setter(into))]
    trusted_certificates: PathBuf,
    #[builder(default, setter(strip_option, into))]
    client_certificate_chain: Option<PathBuf>,
    #[builder(default, setter(strip_option, into))]
    private_key: Option<PathBuf>,
}

impl TlsConfig {
    fn client_config(&self) -> Result<ClientConfig, MqttError> {
        let mut roots = RootCertStore::empty();
        let mut reader = io::BufReader::new(std::fs::File::open(&self.trusted_certificates)?);
        for cert in rustls_pemfile::certs(&mut reader) {
            roots.add(cert?)?;
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);

        let config = match (&self.client_certificate_chain, &self.private_key) {
            (Some(chain_path), Some(key_path)) => {
                let mut chain_reader = io::BufReader::new(std::fs::File::open(chain_path)?);
                let chain = rustls_pemfile::certs(&mut chain_reader)
                    .collect::<Result<Vec<_>, io::Error>>()?;

                let mut key_reader = io::BufReader::new(std::fs::File::open(key_path)?);
                let key = rustls_pemfile::private_key(&mut key_reader)?
                    .ok_or(MqttError::MissingPrivateKey)?;

                builder.with_client_auth_cert(chain, key)?
            }
            _ => builder.with_no_client_auth(),
        };

        Ok(config)
    }
}

async fn open_tls_stream(
    host: &str,
    port: u16,
    config: &TlsConfig,
) -> Result<TlsStream<TcpStream>, MqttError> {
    let tcp = TcpStream::connect((host, port)).await?;

    let connector = TlsConnector::from(Arc::new(config.client_config()?));
    let server_name =
        ServerName::try_from(host.to_string()).map_err(|_| MqttError::InvalidServerName)?;

    Ok(connector.connect(server_name, tcp).await?)
}

fn websocket_io_error(error: tokio_tungstenite::tungstenite::Error) -> io::Error {
    match error {
        tokio_tungstenite::tungstenite::Error::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

async fn open_websocket<S>(host: &str, port: u16, secure: bool, stream: S) -> Result<WebSocketStream<S>, MqttError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let scheme = if secure { "wss" } else { "ws" };
    let mut request = format!("{scheme}://{host}:{port}/mqtt")
        .into_client_request()
        .map_err(|e| MqttError::Io(websocket_io_error(e)))?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("mqtt"));

    let (websocket, _response) = tokio_tungstenite::client_async(request, stream)
        .await
        .map_err(|e| MqttError::Io(websocket_io_error(e)))?;

    Ok(websocket)
}

/// Presents a WebSocket carrying binary frames as an ordered byte stream.
pub struct WebSocketByteStream<S> {
    inner: WebSocketStream<S>,
    read_buffer: BytesMut,
}

impl<S> WebSocketByteStream<S> {
    fn new(inner: WebSocketStream<S>) -> WebSocketByteStream<S> {
        WebSocketByteStream {
            inner,
            read_buffer: BytesMut::new(),
        }
    }
}

impl<S> AsyncRead for WebSocketByteStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.read_buffer.is_empty() {
                let n = buf.remaining().min(this.read_buffer.len());
                buf.put_slice(&this.read_buffer.split_to(n));
                return Poll::Ready(Ok(()));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Binary(data)))) => {
                    this.read_buffer.extend_from_slice(&data);
                }
                Poll::Ready(Some(Ok(Message::Close(_)))) | Poll::Ready(None) => {
                    return Poll::Ready(Ok(()));
                }
                // Pings and pongs are answered by the protocol layer, a
                // text frame carries nothing for an MQTT session.
                Poll::Ready(Some(Ok(_))) => {}
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Err(websocket_io_error(e)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> AsyncWrite for WebSocketByteStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_ready(cx) {
            Poll::Ready(Ok(())) => {
                Pin::new(&mut this.inner)
                    .start_send(Message::binary(buf.to_vec()))
                    .map_err(websocket_io_error)?;
                Poll::Ready(Ok(buf.len()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(websocket_io_error(e))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        Pin::new(&mut this.inner)
            .poll_flush(cx)
            .map_err(websocket_io_error)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        Pin::new(&mut this.inner)
            .poll_close(cx)
            .map_err(websocket_io_error)
    }
}

/// A freshly opened transport handed to the client for the handshake.
pub enum MqttConnectTransport {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    WebSocket(Box<WebSocketByteStream<TcpStream>>),
    SecureWebSocket(Box<WebSocketByteStream<TlsStream<TcpStream>>>),
    Duplex(DuplexStream),
}

impl MqttConnectTransport {
    pub async fn connect_tcp(host: &str, port: u16) -> Result<MqttConnectTransport, MqttError> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(MqttConnectTransport::Tcp(stream))
    }

    pub async fn connect_tls(
        host: &str,
        port: u16,
        config: &TlsConfig,
    ) -> Result<MqttConnectTransport, MqttError> {
        let stream = open_tls_stream(host, port, config).await?;
        Ok(MqttConnectTransport::Tls(Box::new(stream)))
    }

    pub async fn connect_websocket(
        host: &str,
        port: u16,
    ) -> Result<MqttConnectTransport, MqttError> {
        let tcp = TcpStream::connect((host, port)).await?;
        let websocket = open_websocket(host, port, false, tcp).await?;
        Ok(MqttConnectTransport::WebSocket(Box::new(
            WebSocketByteStream::new(websocket),
        )))
    }

    pub async fn connect_secure_websocket(
        host: &str,
        port: u16,
        config: &TlsConfig,
    ) -> Result<MqttConnectTransport, MqttError> {
        let tls = open_tls_stream(host, port, config).await?;
        let websocket = open_websocket(host, port, true, tls).await?;
        Ok(MqttConnectTransport::SecureWebSocket(Box::new(
            WebSocketByteStream::new(websocket),
        )))
    }
}

pub(crate) enum MqttConnection {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    WebSocket(Box<WebSocketByteStream<TcpStream>>),
    SecureWebSocket(Box<WebSocketByteStream<TlsStream<TcpStream>>>),
    Duplex(DuplexStream),
}

impl From<MqttConnectTransport> for MqttConnection {
    fn from(value: MqttConnectTransport) -> Self {
        match value {
            MqttConnectTransport::Tcp(t) => MqttConnection::Tcp(t),
            MqttConnectTransport::Tls(t) => MqttConnection::Tls(t),
            MqttConnectTransport::WebSocket(w) => MqttConnection::WebSocket(w),
            MqttConnectTransport::SecureWebSocket(w) => MqttConnection::SecureWebSocket(w),
            MqttConnectTransport::Duplex(d) => MqttConnection::Duplex(d),
        }
    }
}

impl AsyncRead for MqttConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MqttConnection::Tcp(t) => Pin::new(t).poll_read(cx, buf),
            MqttConnection::Tls(t) => Pin::new(t.as_mut()).poll_read(cx, buf),
            MqttConnection::WebSocket(w) => Pin::new(w.as_mut()).poll_read(cx, buf),
            MqttConnection::SecureWebSocket(w) => Pin::new(w.as_mut()).poll_read(cx, buf),
            MqttConnection::Duplex(d) => Pin::new(d).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MqttConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MqttConnection::Tcp(t) => Pin::new(t).poll_write(cx, buf),
            MqttConnection::Tls(t) => Pin::new(t.as_mut()).poll_write(cx, buf),
            MqttConnection::WebSocket(w) => Pin::new(w.as_mut()).poll_write(cx, buf),
            MqttConnection::SecureWebSocket(w) => Pin::new(w.as_mut()).poll_write(cx, buf),
            MqttConnection::Duplex(d) => Pin::new(d).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MqttConnection::Tcp(t) => Pin::new(t).poll_flush(cx),
            MqttConnection::Tls(t) => Pin::new(t.as_mut()).poll_flush(cx),
            MqttConnection::WebSocket(w) => Pin::new(w.as_mut()).poll_flush(cx),
            MqttConnection::SecureWebSocket(w) => Pin::new(w.as_mut()).poll_flush(cx),
            MqttConnection::Duplex(d) => Pin::new(d).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MqttConnection::Tcp(t) => Pin::new(t).poll_shutdown(cx),
            MqttConnection::Tls(t) => Pin::new(t.as_mut()).poll_shutdown(cx),
            MqttConnection::WebSocket(w) => Pin::new(w.as_mut()).poll_shutdown(cx),
            MqttConnection::SecureWebSocket(w) => Pin::new(w.as_mut()).poll_shutdown(cx),
            MqttConnection::Duplex(d) => Pin::new(d).poll_shutdown(cx),
        }
    }
}
