//! Deadline enforcement for upstream response bodies.
//!
//! A data source that sends response headers promptly and then stalls would
//! otherwise pin the client connection open forever. [`TimeoutBody`] wraps the
//! upstream body and fails the stream when no frame arrives within the chunk
//! deadline or when the whole body takes longer than the total deadline.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use thiserror::Error;
use tokio::time::{Instant, Sleep, sleep};

use crate::config::UpstreamConfig;

/// Deadlines applied to a streamed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyTimeouts {
    /// Maximum gap between two frames
    pub chunk: Duration,
    /// Maximum duration of the whole body, from the first poll
    pub total: Duration,
}

impl BodyTimeouts {
    /// Create body deadlines.
    pub fn new(chunk: Duration, total: Duration) -> Self {
        Self { chunk, total }
    }
}

impl From<&UpstreamConfig> for BodyTimeouts {
    fn from(config: &UpstreamConfig) -> Self {
        Self::new(config.chunk_timeout, config.total_timeout)
    }
}

/// Deadline failures surfaced as body errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyTimeoutError {
    /// No frame arrived within the chunk deadline
    #[error("upstream body stalled for {0:?}")]
    Chunk(Duration),

    /// The body did not finish within the total deadline
    #[error("upstream body exceeded total deadline of {0:?}")]
    Total(Duration),
}

/// Body wrapper enforcing [`BodyTimeouts`].
pub struct TimeoutBody<B> {
    inner: B,
    timeouts: BodyTimeouts,
    chunk_deadline: Pin<Box<Sleep>>,
    total_deadline: Pin<Box<Sleep>>,
    started: bool,
}

impl<B> TimeoutBody<B> {
    /// Wrap `inner`. Deadlines start on the first poll.
    pub fn new(inner: B, timeouts: BodyTimeouts) -> Self {
        Self {
            inner,
            timeouts,
            chunk_deadline: Box::pin(sleep(timeouts.chunk)),
            total_deadline: Box::pin(sleep(timeouts.total)),
            started: false,
        }
    }

    /// Deadlines in effect.
    pub fn timeouts(&self) -> BodyTimeouts {
        self.timeouts
    }
}

impl<B> Body for TimeoutBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        if !this.started {
            this.started = true;
            let now = Instant::now();
            this.total_deadline.as_mut().reset(now + this.timeouts.total);
            this.chunk_deadline.as_mut().reset(now + this.timeouts.chunk);
        }

        if this.total_deadline.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Some(Err(BodyTimeoutError::Total(this.timeouts.total).into())));
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                // Progress: the stall window starts over
                let next = Instant::now() + this.timeouts.chunk;
                this.chunk_deadline.as_mut().reset(next);
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e.into()))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => {
                if this.chunk_deadline.as_mut().poll(cx).is_ready() {
                    Poll::Ready(Some(Err(BodyTimeoutError::Chunk(this.timeouts.chunk).into())))
                } else {
                    Poll::Pending
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Full, StreamBody};
    use std::convert::Infallible;

    #[tokio::test]
    async fn test_forwards_data() {
        let data = Bytes::from("up{job=\"node\"} 1");
        let body = TimeoutBody::new(
            Full::new(data.clone()),
            BodyTimeouts::new(Duration::from_secs(1), Duration::from_secs(5)),
        );

        let collected = body.collect().await.expect("should collect").to_bytes();
        assert_eq!(collected, data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_body_fails_with_chunk_timeout() {
        let (_tx, rx) = tokio::sync::mpsc::channel::<Result<Frame<Bytes>, Infallible>>(1);
        let body = TimeoutBody::new(
            StreamBody::new(tokio_stream_from(rx)),
            BodyTimeouts::new(Duration::from_millis(100), Duration::from_secs(60)),
        );

        let err = body.collect().await.err().expect("should time out");
        let err = err
            .downcast_ref::<BodyTimeoutError>()
            .expect("should be a timeout error");
        assert_eq!(*err, BodyTimeoutError::Chunk(Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_body_fails_with_total_timeout() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Frame<Bytes>, Infallible>>(1);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if tx.send(Ok(Frame::data(Bytes::from_static(b".")))).await.is_err() {
                    break;
                }
            }
        });
        let body = TimeoutBody::new(
            StreamBody::new(tokio_stream_from(rx)),
            BodyTimeouts::new(Duration::from_millis(100), Duration::from_millis(500)),
        );

        let err = body.collect().await.err().expect("should time out");
        let err = err
            .downcast_ref::<BodyTimeoutError>()
            .expect("should be a timeout error");
        assert_eq!(*err, BodyTimeoutError::Total(Duration::from_millis(500)));
    }

    #[test]
    fn test_from_upstream_config() {
        let timeouts = BodyTimeouts::from(&UpstreamConfig::default());
        assert_eq!(timeouts.chunk, Duration::from_secs(30));
        assert_eq!(timeouts.total, Duration::from_secs(300));
    }

    fn tokio_stream_from<T>(
        mut rx: tokio::sync::mpsc::Receiver<T>,
    ) -> impl futures_util::Stream<Item = T> + Unpin {
        futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx))
    }
}
