//! `SocketFactory` collaborator (spec §6): produces a possibly-TLS connected socket. `Stream`
//! boxes its variants to reduce type size — without boxing a TLS stream is far larger than a
//! plain TCP one, see upstream issue #189 this is adapted from.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{TcpSocket, TcpStream},
};

#[cfg(feature = "tls")]
use std::sync::Arc;
#[cfg(feature = "tls")]
use tokio_rustls::client::TlsStream;
#[cfg(feature = "tls")]
use tokio_rustls::rustls::pki_types::ServerName;
#[cfg(feature = "tls")]
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
#[cfg(feature = "tls")]
use tokio_rustls::TlsConnector;

#[cfg(feature = "tls")]
lazy_static::lazy_static! {
    static ref TLS_CONNECTOR: TlsConnector = {
        let mut roots = RootCertStore::empty();
        let loaded = rustls_native_certs::load_native_certs();
        for err in &loaded.errors {
            warn!("error loading a native cert: {}", err);
        }
        for cert in loaded.certs {
            if let Err(err) = roots.add(cert) {
                warn!("rejecting a native cert: {}", err);
            }
        }
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    };
}

#[derive(Debug)]
// Boxed to keep the enum small: the TLS variant is much larger than the plain TCP one.
pub enum Stream {
    TcpStream(Box<TcpStream>),
    #[cfg(feature = "tls")]
    TlsStream(Box<TlsStream<TcpStream>>),
}

#[cfg(feature = "tls")]
pub type TlsError = tokio_rustls::rustls::Error;

#[derive(Debug)]
pub enum StreamError {
    #[cfg(feature = "tls")]
    TlsError(TlsError),
    IoError(std::io::Error),
}

#[cfg(feature = "tls")]
impl From<TlsError> for StreamError {
    fn from(err: TlsError) -> Self {
        StreamError::TlsError(err)
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::IoError(err)
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "tls")]
            StreamError::TlsError(e) => write!(f, "TLS error: {}", e),
            StreamError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for StreamError {}

impl Stream {
    pub async fn new_tcp(addr: SocketAddr, local_address: Option<IpAddr>) -> Result<Stream, StreamError> {
        Ok(Stream::TcpStream(connect_tcp(addr, local_address).await?.into()))
    }

    #[cfg(feature = "tls")]
    pub async fn new_tls(
        addr: SocketAddr,
        host_name: &str,
        local_address: Option<IpAddr>,
    ) -> Result<Stream, StreamError> {
        let tcp_stream = connect_tcp(addr, local_address).await?;
        let server_name = ServerName::try_from(host_name.to_owned())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let tls_stream = TLS_CONNECTOR.connect(server_name, tcp_stream).await?;
        Ok(Stream::TlsStream(tls_stream.into()))
    }
}

/// Binds the configured `localAddress` (spec §6) before dialing, when one was given; otherwise
/// dials directly, letting the OS pick the source address as usual.
async fn connect_tcp(addr: SocketAddr, local_address: Option<IpAddr>) -> std::io::Result<TcpStream> {
    let Some(local_ip) = local_address else {
        return TcpStream::connect(addr).await;
    };
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.bind(SocketAddr::new(local_ip, 0))?;
    socket.connect(addr).await
}

/// Produces a connected (possibly TLS) socket for a resolved address. The default impl just
/// dials `Stream::new_tcp`/`new_tls`; callers that need a SOCKS proxy, a pinned cert store, or a
/// test double substitute their own.
pub trait SocketFactory: Send + Sync {
    fn connect<'a>(
        &'a self,
        addr: SocketAddr,
        host_name: &'a str,
        use_tls: bool,
        local_address: Option<IpAddr>,
    ) -> Pin<Box<dyn Future<Output = Result<Stream, StreamError>> + Send + 'a>>;
}

pub struct DefaultSocketFactory;

impl SocketFactory for DefaultSocketFactory {
    fn connect<'a>(
        &'a self,
        addr: SocketAddr,
        #[allow(unused_variables)] host_name: &'a str,
        use_tls: bool,
        local_address: Option<IpAddr>,
    ) -> Pin<Box<dyn Future<Output = Result<Stream, StreamError>> + Send + 'a>> {
        Box::pin(async move {
            if use_tls {
                #[cfg(feature = "tls")]
                {
                    Stream::new_tls(addr, host_name, local_address).await
                }
                #[cfg(not(feature = "tls"))]
                {
                    let _ = local_address;
                    Err(StreamError::IoError(std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "TLS requested but the `tls` feature is disabled",
                    )))
                }
            } else {
                Stream::new_tcp(addr, local_address).await
            }
        })
    }
}

impl Stream {
    /// The underlying TCP peer/local addresses, for identd registration (spec §6).
    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            Stream::TcpStream(s) => s.peer_addr(),
            #[cfg(feature = "tls")]
            Stream::TlsStream(s) => s.get_ref().0.peer_addr(),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            Stream::TcpStream(s) => s.local_addr(),
            #[cfg(feature = "tls")]
            Stream::TlsStream(s) => s.get_ref().0.local_addr(),
        }
    }
}

//
// Boilerplate
//

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf,
    ) -> Poll<Result<(), std::io::Error>> {
        match *self {
            Stream::TcpStream(ref mut tcp_stream) => Pin::new(tcp_stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Stream::TlsStream(ref mut tls_stream) => Pin::new(tls_stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match *self {
            Stream::TcpStream(ref mut tcp_stream) => Pin::new(tcp_stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Stream::TlsStream(ref mut tls_stream) => Pin::new(tls_stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), std::io::Error>> {
        match *self {
            Stream::TcpStream(ref mut tcp_stream) => Pin::new(tcp_stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            Stream::TlsStream(ref mut tls_stream) => Pin::new(tls_stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Result<(), std::io::Error>> {
        match *self {
            Stream::TcpStream(ref mut tcp_stream) => Pin::new(tcp_stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Stream::TlsStream(ref mut tls_stream) => Pin::new(tls_stream).poll_shutdown(cx),
        }
    }
}
