//! Transport adapter over TCP and UNIX-domain byte streams.
//!
//! The writer and reader each own one direction of the stream, so the
//! connection is split into owned halves at connect time.

use std::io;
use std::path::Path;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::{unix, UnixStream};

/// The sending direction of a connection.
pub(crate) enum SendHalf {
    Tcp(tcp::OwnedWriteHalf),
    #[cfg(unix)]
    Unix(unix::OwnedWriteHalf),
}

/// The receiving direction of a connection.
pub(crate) enum RecvHalf {
    Tcp(tcp::OwnedReadHalf),
    #[cfg(unix)]
    Unix(unix::OwnedReadHalf),
}

impl SendHalf {
    /// Write the whole buffer to the transport.
    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            SendHalf::Tcp(tcp) => tcp.write_all(buf).await,
            #[cfg(unix)]
            SendHalf::Unix(unix) => unix.write_all(buf).await,
        }
    }
}

impl RecvHalf {
    /// Read more bytes into the buffer, returning the number read.
    /// A return of 0 means the peer closed the connection.
    pub(crate) async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            RecvHalf::Tcp(tcp) => tcp.read_buf(buf).await,
            #[cfg(unix)]
            RecvHalf::Unix(unix) => unix.read_buf(buf).await,
        }
    }
}

/// Open the configured transport and split it into owned halves.
///
/// A non-`None` `path` selects the UNIX-domain transport and ignores
/// `host`/`port`.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    path: Option<&Path>,
) -> io::Result<(SendHalf, RecvHalf)> {
    match path {
        #[cfg(unix)]
        Some(path) => {
            let stream = UnixStream::connect(path).await?;
            let (recv, send) = stream.into_split();
            Ok((SendHalf::Unix(send), RecvHalf::Unix(recv)))
        }
        #[cfg(not(unix))]
        Some(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix sockets are not supported on this platform",
        )),
        None => {
            let stream = TcpStream::connect((host, port)).await?;
            stream.set_nodelay(true)?;
            let (recv, send) = stream.into_split();
            Ok((SendHalf::Tcp(send), RecvHalf::Tcp(recv)))
        }
    }
}
