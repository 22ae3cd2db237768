use bytes::Buf;
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    Error, Result,
    common::verbose,
    machine::{Machine, Request},
    postgres::MessageDecoder,
    transport::Transport,
};

type ConnectFuture<T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'static>>;

enum Phase<T> {
    Connecting(ConnectFuture<T>),
    Running(T),
    /// Flushing `Terminate` then shutting down.
    Closing(T),
    Closed,
}

/// Future that drives one connection.
///
/// Requests from handles, transport reads, and transport writes are the events
/// that make progress, all of them run in this single future.
pub(crate) struct ConnectionWorker<T> {
    phase: Phase<T>,
    machine: Machine,
    decoder: MessageDecoder,
    recv: UnboundedReceiver<Request>,
}

impl<T: Transport> ConnectionWorker<T> {
    pub(crate) fn connecting(
        connect: ConnectFuture<T>,
        mut machine: Machine,
        recv: UnboundedReceiver<Request>,
    ) -> Self {
        machine.connecting();
        Self { phase: Phase::Connecting(connect), machine, decoder: MessageDecoder::new(), recv }
    }

    pub(crate) fn connected(
        transport: T,
        mut machine: Machine,
        recv: UnboundedReceiver<Request>,
    ) -> Self {
        machine.connected();
        Self { phase: Phase::Running(transport), machine, decoder: MessageDecoder::new(), recv }
    }
}

/// Write and read until the transport is pending, or the machine terminates.
fn poll_io<T: Transport>(
    io: &mut T,
    machine: &mut Machine,
    decoder: &mut MessageDecoder,
    cx: &mut Context,
) -> Result<()> {
    loop {
        let out = machine.output();
        while !out.is_empty() {
            match io.poll_write(cx, &out[..])? {
                Poll::Ready(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Poll::Ready(n) => out.advance(n),
                Poll::Pending => break,
            }
        }
        if out.is_empty() {
            let _ = io.poll_flush(cx)?;
        }

        match io.poll_read(cx, decoder.buffer_mut())? {
            Poll::Pending => return Ok(()),
            Poll::Ready(0) => {
                let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
                return Err(Error::from(eof).context("connection closed by server"));
            },
            Poll::Ready(_n) => {
                verbose!("Read {_n} bytes");
                while let Some(msg) = decoder.decode()? {
                    machine.handle(msg);
                    if machine.is_terminated() {
                        return Ok(());
                    }
                }
            },
        }
    }
}

/// Best effort flush of pending output, then shutdown.
fn poll_close<T: Transport>(io: &mut T, machine: &mut Machine, cx: &mut Context) -> Poll<()> {
    let out = machine.output();
    while !out.is_empty() && io.is_connected() {
        match io.poll_write(cx, &out[..]) {
            Poll::Ready(Ok(0)) | Poll::Ready(Err(_)) => out.clear(),
            Poll::Ready(Ok(n)) => out.advance(n),
            Poll::Pending => return Poll::Pending,
        }
    }
    out.clear();

    if io.is_connected() {
        if let Poll::Pending = io.poll_flush(cx) {
            return Poll::Pending;
        }
    }

    match io.poll_shutdown(cx) {
        Poll::Pending => Poll::Pending,
        Poll::Ready(_) => Poll::Ready(()),
    }
}

impl<T: Transport> Future for ConnectionWorker<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let ConnectionWorker { phase, machine, decoder, recv } = self.get_mut();

        while let Poll::Ready(req) = recv.poll_recv(cx) {
            let Some(req) = req else {
                // all handles are dropped
                machine.terminate();
                break;
            };
            machine.request(req);
        }

        if let Phase::Connecting(connect) = phase {
            if let Poll::Ready(result) = connect.as_mut().poll(cx) {
                match result {
                    Ok(io) => {
                        *phase = Phase::Running(io);
                        machine.connected();
                    },
                    Err(err) => {
                        machine.fail(Error::from(err).context("failed to connect"));
                        *phase = Phase::Closed;
                    },
                }
            }
        }

        if let Phase::Running(io) = phase {
            if let Err(err) = poll_io(io, machine, decoder, cx) {
                machine.fail(err);
            }
        }

        if machine.is_terminated() {
            *phase = match std::mem::replace(phase, Phase::Closed) {
                Phase::Running(io) | Phase::Closing(io) => Phase::Closing(io),
                Phase::Connecting(_) | Phase::Closed => Phase::Closed,
            };
        }

        match phase {
            Phase::Closing(io) => {
                if let Poll::Pending = poll_close(io, machine, cx) {
                    return Poll::Pending;
                }
                verbose!("Connection closed");
                *phase = Phase::Closed;
                Poll::Ready(())
            },
            Phase::Closed => Poll::Ready(()),
            Phase::Connecting(_) | Phase::Running(_) => Poll::Pending,
        }
    }
}
