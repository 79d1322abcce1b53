//! Sink / Flow: the backpressure-aware delivery primitive.
//!
//! Every subscription owns one [`Sink`], shared with the [`Flow`] handed to the
//! subscriber. The sink sits between the pull task, which offers freshly
//! fetched entries, and the subscriber, which drains a bounded channel.
//!
//! ## Architecture
//!
//! ```text
//!   pull tick                    consume tick
//!      │ offer()                    │ flush()
//!      ▼                            ▼
//! ┌──────────────────────────────────────────┐        ┌────────────┐
//! │ Sink                                     │ try_   │ Flow       │
//! │ - buffer: VecDeque<StreamEntry>          │ send   │ - receiver │──→ subscriber
//! │ - demand: requested - delivered          │──────→ │            │
//! │ - capacity: read count                   │        └────────────┘
//! └──────────────────────────────────────────┘             │ request(n) / drop
//!                      ▲───────────────────────────────────┘
//! ```
//!
//! ## Credit
//!
//! `credit = min(demand, capacity)`. An offer is accepted only while
//! `buffered < credit`, and a flush removes one entry from the buffer for each
//! unit of demand it consumes, so `buffered <= credit` at every observation
//! point. The engine never pulls for a sink that is not ready (no request yet)
//! or has no space left.
//!
//! ## Lifecycle
//!
//! 1. **Created**: empty, not ready
//! 2. **Ready**: the subscriber called `request(n)` with `n > 0`
//! 3. **Delivering**: entries are offered, buffered and flushed
//! 4. **Cancelled** (terminal): the flow was dropped or disposed, or a terminal
//!    error was reported. Buffered entries are discarded and the channel closes.
//!
//! A flush that cannot drain the whole buffer (subscriber not keeping up) is
//! not an error: the remaining entries stay buffered and the next consume tick
//! retries them.

use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use streamtap_core::StreamEntry;
use streamtap_observability::metrics;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::error::{ClientError, Result};

/// Engine-side half of a subscription's delivery path.
pub struct Sink {
    stream: String,
    capacity: usize,

    /// Monotonic: false → true, never reverts
    cancelled: AtomicBool,

    state: Mutex<SinkState>,
}

struct SinkState {
    /// Accepted, not yet delivered
    buffer: VecDeque<StreamEntry>,

    /// Requested by the subscriber and not yet delivered
    demand: u64,

    ready: bool,

    /// Dropped on cancellation, which ends the subscriber's flow
    sender: Option<mpsc::Sender<StreamEntry>>,

    /// Terminal error, handed to the flow once its channel is drained
    error: Option<ClientError>,
}

impl Sink {
    /// Create a sink and the flow that drains it.
    ///
    /// # Arguments
    ///
    /// * `stream` - Stream key the sink delivers for
    /// * `capacity` - Maximum buffered entries; also the flow's channel size
    pub(crate) fn channel(stream: impl Into<String>, capacity: usize) -> (Arc<Sink>, Flow) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        let sink = Arc::new(Sink {
            stream: stream.into(),
            capacity,
            cancelled: AtomicBool::new(false),
            state: Mutex::new(SinkState {
                buffer: VecDeque::new(),
                demand: 0,
                ready: false,
                sender: Some(sender),
                error: None,
            }),
        });

        let flow = Flow {
            sink: Arc::clone(&sink),
            receiver,
            finished: false,
        };

        (sink, flow)
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Signal demand for `n` more entries. The first non-zero request makes the
    /// sink ready. Requests on a cancelled sink are ignored.
    pub fn request(&self, n: u64) {
        if n == 0 || self.is_cancelled() {
            return;
        }

        let mut state = self.state.lock();
        state.demand = state.demand.saturating_add(n);
        if !state.ready {
            state.ready = true;
            debug!(stream = %self.stream, demand = state.demand, "Subscriber requested data");
        }
    }

    /// Try to buffer one entry.
    ///
    /// Returns `false` once credit is exhausted or the sink is cancelled. The
    /// caller must stop offering the rest of its batch at the first `false`.
    pub fn offer(&self, entry: StreamEntry) -> bool {
        let mut state = self.state.lock();
        if self.is_cancelled() || state.buffer.len() >= Self::credit_of(&state, self.capacity) {
            return false;
        }
        state.buffer.push_back(entry);
        true
    }

    /// True until the subscriber's first request.
    pub fn is_not_ready(&self) -> bool {
        !self.state.lock().ready
    }

    /// True when the buffer has caught up with the outstanding credit.
    pub fn is_not_enough_space(&self) -> bool {
        let state = self.state.lock();
        state.buffer.len() >= Self::credit_of(&state, self.capacity)
    }

    /// Push buffered entries to the subscriber, in order, until the buffer is
    /// empty, demand runs out, or the subscriber's channel is full.
    ///
    /// Returns the number of entries delivered.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;
        let mut receiver_gone = false;

        {
            let mut guard = self.state.lock();
            if self.is_cancelled() {
                return 0;
            }
            let state = &mut *guard;

            while state.demand > 0 {
                let Some(entry) = state.buffer.pop_front() else {
                    break;
                };
                let Some(sender) = state.sender.as_ref() else {
                    break;
                };

                match sender.try_send(entry) {
                    Ok(()) => {
                        state.demand -= 1;
                        delivered += 1;
                    }
                    Err(TrySendError::Full(entry)) => {
                        state.buffer.push_front(entry);
                        metrics::FLUSH_STALLS_TOTAL
                            .with_label_values(&[self.stream.as_str()])
                            .inc();
                        trace!(
                            stream = %self.stream,
                            buffered = state.buffer.len(),
                            "Subscriber not keeping up; retrying on next tick"
                        );
                        break;
                    }
                    Err(TrySendError::Closed(_)) => {
                        receiver_gone = true;
                        break;
                    }
                }
            }
        }

        if receiver_gone {
            self.cancel();
        }
        if delivered > 0 {
            metrics::ENTRIES_DELIVERED_TOTAL
                .with_label_values(&[self.stream.as_str()])
                .inc_by(delivered as u64);
        }
        delivered
    }

    /// Deliver a terminal error to the subscriber and cancel the sink.
    ///
    /// A sink that is already cancelled absorbs the error silently.
    pub fn error(&self, cause: ClientError) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut state = self.state.lock();
        debug!(stream = %self.stream, error = %cause, "Terminating subscription");
        state.error = Some(cause);
        state.buffer.clear();
        state.sender = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel the sink. Idempotent.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut state = self.state.lock();
        state.buffer.clear();
        state.sender = None;
        debug!(stream = %self.stream, "Subscription cancelled");
    }

    /// Entries accepted but not yet delivered.
    pub fn buffered(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Entries the sink is currently willing to hold.
    pub fn credit(&self) -> usize {
        Self::credit_of(&self.state.lock(), self.capacity)
    }

    /// How many more entries `offer` would accept right now.
    pub fn remaining_credit(&self) -> usize {
        let state = self.state.lock();
        Self::credit_of(&state, self.capacity).saturating_sub(state.buffer.len())
    }

    fn credit_of(state: &SinkState, capacity: usize) -> usize {
        usize::try_from(state.demand).map_or(capacity, |demand| demand.min(capacity))
    }

    fn take_error(&self) -> Option<ClientError> {
        self.state.lock().error.take()
    }
}

/// Subscriber-side handle of a subscription.
///
/// Entries arrive only after [`request`](Flow::request). The flow ends (`None`)
/// when the subscription is cancelled; if the subscription failed, the error is
/// yielded once, after every entry already delivered. Dropping the flow cancels
/// the subscription.
///
/// # Examples
///
/// ```ignore
/// use futures::StreamExt;
///
/// let mut flow = container.subscribe(StreamOffset::latest("orders"), options)?;
/// flow.request(100);
///
/// while let Some(entry) = flow.next().await {
///     let entry = entry?;
///     println!("{} {:?}", entry.id, entry.fields);
///     flow.request(1);
/// }
/// ```
pub struct Flow {
    sink: Arc<Sink>,
    receiver: mpsc::Receiver<StreamEntry>,
    finished: bool,
}

impl Flow {
    pub fn stream(&self) -> &str {
        self.sink.stream()
    }

    /// Ask for `n` more entries.
    pub fn request(&self, n: u64) {
        self.sink.request(n);
    }

    pub fn is_cancelled(&self) -> bool {
        self.sink.is_cancelled()
    }

    /// Cancel the subscription. Equivalent to dropping the flow.
    pub fn dispose(self) {}

    /// Wait for the next entry. See [`Flow`] for when this returns `None`.
    pub async fn next_entry(&mut self) -> Option<Result<StreamEntry>> {
        futures::StreamExt::next(self).await
    }
}

impl Stream for Flow {
    type Item = Result<StreamEntry>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(entry)) => Poll::Ready(Some(Ok(entry))),
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(self.sink.take_error().map(Err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Flow {
    fn drop(&mut self) {
        self.sink.cancel();
    }
}
