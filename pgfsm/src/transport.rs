//! The [`Transport`] and [`Connect`] traits.
//!
//! A transport is a byte stream polled by the connection worker. The built in
//! implementation is [`Socket`][crate::net::Socket], [`Stream`] adapts any tokio
//! [`AsyncRead`] + [`AsyncWrite`] io, e.g. an in memory duplex.
use bytes::{BufMut, BytesMut};
use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::connection::ConnectionOptions;

const DEFAULT_READ_CAPACITY: usize = 8 * 1024;

/// A byte stream which can carry postgres messages.
pub trait Transport: Unpin + Send + 'static {
    /// Read available bytes into the spare capacity of `buf`.
    ///
    /// Returns the number of bytes read, `0` means end of stream.
    fn poll_read(&mut self, cx: &mut Context, buf: &mut BytesMut) -> Poll<io::Result<usize>>;

    /// Write bytes from `buf`, returns the number of bytes written.
    fn poll_write(&mut self, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>>;

    /// Flush buffered bytes, if any.
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Close the write half of the stream.
    fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Returns `false` once the stream ends, fails, or is shut down.
    fn is_connected(&self) -> bool;
}

/// A [`Transport`] which can establish itself from [`ConnectionOptions`].
pub trait Connect: Transport + Sized {
    /// Open the transport.
    fn connect(options: ConnectionOptions) -> impl Future<Output = io::Result<Self>> + Send + 'static;
}

/// Read from tokio io into the spare capacity of `buf`.
pub(crate) fn poll_read_buf<IO: AsyncRead + Unpin>(
    io: &mut IO,
    cx: &mut Context,
    buf: &mut BytesMut,
) -> Poll<io::Result<usize>> {
    if buf.capacity() == buf.len() {
        buf.reserve(DEFAULT_READ_CAPACITY);
    }

    let n = {
        let dst = buf.chunk_mut();
        // SAFETY: `ReadBuf` never de-initialize memory
        let dst = unsafe { dst.as_uninit_slice_mut() };
        let mut read = ReadBuf::uninit(dst);
        let ptr = read.filled().as_ptr();
        ready!(Pin::new(io).poll_read(cx, &mut read)?);

        // Ensure the pointer does not change from under us
        assert_eq!(ptr, read.filled().as_ptr());
        read.filled().len()
    };

    // SAFETY: This is guaranteed to be the number of initialized (and read)
    // bytes due to the invariants provided by `ReadBuf::filled`.
    unsafe {
        buf.advance_mut(n);
    }

    Poll::Ready(Ok(n))
}

/// Adapter of tokio io as [`Transport`].
#[derive(Debug)]
pub struct Stream<IO> {
    io: IO,
    connected: bool,
}

impl<IO> Stream<IO> {
    pub fn new(io: IO) -> Self {
        Self { io, connected: true }
    }

    pub fn get_ref(&self) -> &IO {
        &self.io
    }

    pub fn into_inner(self) -> IO {
        self.io
    }
}

/// Record disconnection from an io result.
macro_rules! track {
    ($self:ident, $poll:expr) => {
        match ready!($poll) {
            Ok(n) => Poll::Ready(Ok(n)),
            Err(err) => {
                $self.connected = false;
                Poll::Ready(Err(err))
            },
        }
    };
}

pub(crate) use track;

impl<IO> Transport for Stream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn poll_read(&mut self, cx: &mut Context, buf: &mut BytesMut) -> Poll<io::Result<usize>> {
        let n = match ready!(poll_read_buf(&mut self.io, cx, buf)) {
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
        track!(self, Pin::new(&mut self.io).poll_write(cx, buf))
    }

    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        track!(self, Pin::new(&mut self.io).poll_flush(cx))
    }

    fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        self.connected = false;
        Pin::new(&mut self.io).poll_shutdown(cx)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
