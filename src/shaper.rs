//! Per-chunk bandwidth shaping for streamed response bodies.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Future, Stream};
use tokio::time::Sleep;

use crate::engine::ChaosEngine;

/// Wraps a byte stream and sleeps before yielding each chunk so that the
/// transfer approximates `limit_kbps` KB/s. Shaping is per-chunk rather
/// than token-bucketed: short chunks see short delays, large chunks
/// proportionally longer ones. Nothing is buffered beyond the chunk in
/// flight, so shaping doubles as backpressure.
pub struct ThrottledStream<S> {
    inner: S,
    limit_kbps: u64,
    pending: Option<(Pin<Box<Sleep>>, Bytes)>,
}

impl<S> ThrottledStream<S> {
    pub fn new(inner: S, limit_kbps: u64) -> Self {
        Self {
            inner,
            limit_kbps,
            pending: None,
        }
    }
}

impl<S, E> Stream for ThrottledStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some((mut sleep, chunk)) = this.pending.take() {
            match sleep.as_mut().poll(cx) {
                Poll::Ready(()) => return Poll::Ready(Some(Ok(chunk))),
                Poll::Pending => {
                    this.pending = Some((sleep, chunk));
                    return Poll::Pending;
                }
            }
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let delay =
                    ChaosEngine::calculate_bandwidth_delay(chunk.len(), this.limit_kbps);
                if delay.is_zero() {
                    return Poll::Ready(Some(Ok(chunk)));
                }
                let mut sleep = Box::pin(tokio::time::sleep(delay));
                // Arm the timer; if it fires immediately we can yield now.
                match sleep.as_mut().poll(cx) {
                    Poll::Ready(()) => Poll::Ready(Some(Ok(chunk))),
                    Poll::Pending => {
                        this.pending = Some((sleep, chunk));
                        Poll::Pending
                    }
                }
            }
            other => other,
        }
    }
}
