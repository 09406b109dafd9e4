//! Post-request observation. Each request produces exactly one
//! [`RequestLog`], delivered through a bounded queue so the hot path never
//! waits on the sink.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{ChaosType, RequestLog};
use crate::store::StoreError;

/// How long the worker waits on the sink for one record.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Where request records end up. Persistence is best-effort; errors are
/// logged and swallowed.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn record(&self, entry: RequestLog) -> Result<(), StoreError>;
    /// Most recent records, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<RequestLog>, StoreError>;
}

/// Keeps the most recent records in memory, newest first.
pub struct MemoryLogSink {
    entries: RwLock<VecDeque<RequestLog>>,
    capacity: usize,
}

impl MemoryLogSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn record(&self, entry: RequestLog) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.push_front(entry);
        entries.truncate(self.capacity);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RequestLog>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().take(limit).cloned().collect())
    }
}

/// Hands records off to a single worker task that drains the queue into the
/// sink. The queue is bounded; overflow drops the record with a warning
/// rather than backpressuring a client response.
pub struct RequestObserver {
    tx: mpsc::Sender<RequestLog>,
}

impl RequestObserver {
    pub fn spawn(sink: std::sync::Arc<dyn LogSink>, queue_capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<RequestLog>(queue_capacity);
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let id = entry.id.clone();
                match tokio::time::timeout(DELIVERY_TIMEOUT, sink.record(entry)).await {
                    Ok(Ok(())) => debug!("recorded request log {}", id),
                    Ok(Err(e)) => warn!("failed to record request log {}: {}", id, e),
                    Err(_) => warn!("request log {} delivery timed out", id),
                }
            }
        });
        Self { tx }
    }

    pub fn sender(&self) -> mpsc::Sender<RequestLog> {
        self.tx.clone()
    }
}

/// Accumulates the facts of one in-flight request and emits the record when
/// dropped. Riding on `Drop` guarantees exactly one record per request no
/// matter which pipeline exit is taken, including a client disconnect
/// mid-sleep, which surfaces as the initial 499 status never being
/// overwritten.
pub struct RequestTrace {
    tx: mpsc::Sender<RequestLog>,
    started_at: chrono::DateTime<Utc>,
    start: Instant,
    config_id: String,
    method: String,
    path: String,
    status_code: u16,
    chaos_type: ChaosType,
}

impl RequestTrace {
    pub fn new(
        tx: mpsc::Sender<RequestLog>,
        config_id: String,
        method: String,
        path: String,
    ) -> Self {
        Self {
            tx,
            started_at: Utc::now(),
            start: Instant::now(),
            config_id,
            method,
            path,
            status_code: 499,
            chaos_type: ChaosType::None,
        }
    }

    pub fn set_status(&mut self, status_code: u16) {
        self.status_code = status_code;
    }

    pub fn set_chaos_type(&mut self, chaos_type: ChaosType) {
        self.chaos_type = chaos_type;
    }

    pub fn chaos_type(&self) -> ChaosType {
        self.chaos_type
    }
}

impl Drop for RequestTrace {
    fn drop(&mut self) {
        let entry = RequestLog {
            id: Uuid::new_v4().to_string(),
            timestamp: self.started_at,
            config_id: std::mem::take(&mut self.config_id),
            method: std::mem::take(&mut self.method),
            path: std::mem::take(&mut self.path),
            status_code: self.status_code,
            duration_ms: self.start.elapsed().as_millis() as i64,
            chaos_type: self.chaos_type,
        };
        if self.tx.try_send(entry).is_err() {
            warn!("request log queue full, dropping record");
        }
    }
}

/// Carries a [`RequestTrace`] inside a response body stream so the recorded
/// duration covers the body transfer, not just the header exchange.
pub struct ObservedStream<S> {
    inner: S,
    trace: Option<RequestTrace>,
}

impl<S> ObservedStream<S> {
    pub fn new(inner: S, trace: RequestTrace) -> Self {
        Self {
            inner,
            trace: Some(trace),
        }
    }
}

impl<S, E> Stream for ObservedStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(None) = polled {
            // End of body: record now rather than when hyper drops us.
            this.trace.take();
        }
        polled
    }
}
