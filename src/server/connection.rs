//! Accepted connections that can be cut off when the drain runs out of time

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

/// A TCP listener whose connections are counted and can be force-closed.
///
/// Implements [`axum::serve::Listener`] so it can be handed to `axum::serve`
/// in place of a plain [`TcpListener`].
pub struct TrackedListener {
    inner: TcpListener,
    force_close: CancellationToken,
    connections: TaskTracker,
}

impl TrackedListener {
    /// Wrap `listener`. Every accepted stream holds a token of `connections`
    /// until it is dropped and fails all I/O once `force_close` fires.
    pub fn new(listener: TcpListener, force_close: CancellationToken, connections: TaskTracker) -> Self {
        Self {
            inner: listener,
            force_close,
            connections,
        }
    }
}

impl axum::serve::Listener for TrackedListener {
    type Io = GuardedStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.inner.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "Accepted connection");
                    let guarded = GuardedStream::new(stream, &self.force_close, self.connections.token());
                    return (guarded, addr);
                }
                Err(e) => {
                    error!(error = %e, "TCP accept error");
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

/// Accepted stream that errors out once the force-close token fires
pub struct GuardedStream {
    inner: TcpStream,
    force_close: CancellationToken,
    closed: Pin<Box<WaitForCancellationFutureOwned>>,
    _connection: TaskTrackerToken,
}

impl GuardedStream {
    fn new(inner: TcpStream, force_close: &CancellationToken, connection: TaskTrackerToken) -> Self {
        Self {
            inner,
            force_close: force_close.clone(),
            closed: Box::pin(force_close.clone().cancelled_owned()),
            _connection: connection,
        }
    }

    /// Registers the waker so a stalled read or write wakes up on force-close.
    fn poll_force_closed(&mut self, cx: &mut Context<'_>) -> Poll<io::Error> {
        if self.force_close.is_cancelled() || self.closed.as_mut().poll(cx).is_ready() {
            return Poll::Ready(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed at end of shutdown grace period",
            ));
        }
        Poll::Pending
    }
}

impl AsyncRead for GuardedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Poll::Ready(e) = self.poll_force_closed(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for GuardedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Poll::Ready(e) = self.poll_force_closed(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Poll::Ready(e) = self.poll_force_closed(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
