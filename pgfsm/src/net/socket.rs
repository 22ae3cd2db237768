use bytes::BytesMut;
use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::{
    common::verbose,
    connection::ConnectionOptions,
    transport::{Connect, Transport, poll_read_buf, track},
};

/// an either `TcpStream` or `UnixStream`, which implement
/// `AsyncRead` and `AsyncWrite` transparently
pub struct Socket {
    kind: Kind,
    connected: bool,
}

enum Kind {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl Socket {
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        let socket = tokio::net::TcpStream::connect((host,port)).await?;
        socket.set_nodelay(true)?;
        Ok(Socket { kind: Kind::Tcp(socket), connected: true })
    }

    #[cfg(unix)]
    pub async fn connect_socket(path: &str) -> io::Result<Socket> {
        let socket = tokio::net::UnixStream::connect(path).await?;
        Ok(Socket { kind: Kind::Unix(socket), connected: true })
    }

    #[cfg(not(unix))]
    pub async fn connect_socket(_path: &str) -> io::Result<Socket> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "unix socket is not supported"))
    }
}

impl Connect for Socket {
    fn connect(options: ConnectionOptions) -> impl Future<Output = io::Result<Self>> + Send + 'static {
        async move {
            match options.socket_path() {
                Some(path) => {
                    verbose!("Connect unix socket {path}");
                    Socket::connect_socket(&path).await
                },
                None => {
                    verbose!("Connect tcp {}:{}", options.host, options.port);
                    Socket::connect_tcp(&options.host, options.port).await
                },
            }
        }
    }
}

impl Transport for Socket {
    fn poll_read(&mut self, cx: &mut Context, buf: &mut BytesMut) -> Poll<io::Result<usize>> {
        let n = match ready!(poll_read_buf(self, cx, buf)) {
            Ok(n) => n,
            Err(err) => {
                self.connected = false;
                return Poll::Ready(Err(err));
            },
        };
        if n == 0 {
            self.connected = false;
        }
        Poll::Ready(Ok(n))
    }

    fn poll_write(&mut self, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        track!(self, AsyncWrite::poll_write(Pin::new(&mut *self), cx, buf))
    }

    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        track!(self, AsyncWrite::poll_flush(Pin::new(&mut *self), cx))
    }

    fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        self.connected = false;
        AsyncWrite::poll_shutdown(Pin::new(self), cx)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_read(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_write(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_flush(cx),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_shutdown(cx),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            Kind::Tcp(ref tcp) => std::fmt::Debug::fmt(tcp, f),
            #[cfg(unix)]
            Kind::Unix(ref unix) => std::fmt::Debug::fmt(unix, f),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn connect_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let options = ConnectionOptions::new().host("127.0.0.1").port(port);
        let (socket, accepted) = tokio::join!(Socket::connect(options), listener.accept());

        let socket = socket.unwrap();
        assert!(socket.is_connected());
        drop(accepted.unwrap());
    }
}
