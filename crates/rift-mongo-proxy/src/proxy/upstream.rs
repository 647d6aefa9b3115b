//! Dialing the upstream server, over plain TCP or TLS.

use super::tls::{client_config, server_name};
use crate::config::ConnectionString;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// A connected upstream socket.
pub enum UpstreamStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            UpstreamStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for UpstreamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            UpstreamStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_flush(cx),
            UpstreamStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            UpstreamStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Dials upstream addresses with the TLS mode decided once from the target.
#[derive(Clone)]
pub struct UpstreamConnector {
    tls: Option<TlsConnector>,
}

impl UpstreamConnector {
    pub fn new(target: &ConnectionString) -> Result<Self, anyhow::Error> {
        let tls = client_config(target)?.map(TlsConnector::from);
        Ok(Self { tls })
    }

    pub fn plain() -> Self {
        Self { tls: None }
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub async fn connect(&self, addr: &str) -> io::Result<UpstreamStream> {
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;

        match self.tls {
            None => Ok(UpstreamStream::Plain(tcp)),
            Some(ref connector) => {
                let name = server_name(addr)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
                let stream = connector.connect(name, tcp).await?;
                Ok(UpstreamStream::Tls(Box::new(stream)))
            }
        }
    }
}
