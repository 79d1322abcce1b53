//! Per-stream subscription state.
//!
//! A subscription ties a stream key and its current read offset to the sink
//! that delivers to the subscriber. The offset only ever moves past entries the
//! sink actually accepted, so a refused entry is fetched again on a later pull.

use parking_lot::Mutex;
use std::sync::Arc;
use streamtap_core::{ConsumerIdentity, EntryId, ReadOffset, ReadOptions, StreamEntry, StreamOffset};
use streamtap_observability::metrics;
use tracing::trace;

use crate::sink::{Flow, Sink};

pub struct Subscription {
    id: u64,
    stream: String,
    offset: Mutex<StreamOffset>,
    options: ReadOptions,
    consumer: Option<ConsumerIdentity>,
    sink: Arc<Sink>,
}

impl Subscription {
    /// Create a subscription and the flow its entries are delivered to.
    ///
    /// `id` is allocated by the owner (normally the container) and must be
    /// unique among the subscriptions of one pull task. The sink capacity
    /// equals the read count, so one pull never fetches more for this stream
    /// than the sink could hold.
    pub fn new(
        id: u64,
        offset: StreamOffset,
        options: ReadOptions,
        consumer: Option<ConsumerIdentity>,
    ) -> (Arc<Subscription>, Flow) {
        let (sink, flow) = Sink::channel(offset.stream.clone(), options.count() as usize);
        let subscription = Arc::new(Subscription {
            id,
            stream: offset.stream.clone(),
            offset: Mutex::new(offset),
            options,
            consumer,
            sink,
        });
        (subscription, flow)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Snapshot of the current read position.
    pub fn offset(&self) -> StreamOffset {
        self.offset.lock().clone()
    }

    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// Read options for the next read on behalf of this subscription.
    ///
    /// A group `>` read moves the group's cursor past everything it returns,
    /// and entries the sink refuses are never handed out again. Those reads
    /// therefore ask for no more than the sink can currently accept.
    pub fn next_read_options(&self) -> ReadOptions {
        if self.consumer.is_some() && self.offset.lock().offset == ReadOffset::NextUndelivered {
            self.options.capped(self.sink.remaining_credit())
        } else {
            self.options
        }
    }

    /// Replace a `$` offset with the position after `last`.
    ///
    /// Returns whether the offset was pinned. Any other offset is left alone.
    pub(crate) fn pin_latest(&self, last: EntryId) -> bool {
        let mut offset = self.offset.lock();
        if offset.offset != ReadOffset::Latest {
            return false;
        }
        offset.offset = ReadOffset::After(last);
        trace!(stream = %self.stream, after = %last, "Pinned latest offset");
        true
    }

    pub fn consumer(&self) -> Option<&ConsumerIdentity> {
        self.consumer.as_ref()
    }

    pub fn sink(&self) -> &Arc<Sink> {
        &self.sink
    }

    pub fn is_cancelled(&self) -> bool {
        self.sink.is_cancelled()
    }

    /// Whether a pull on behalf of this subscription could deliver anything.
    pub fn is_pullable(&self) -> bool {
        !self.sink.is_cancelled() && !self.sink.is_not_ready() && !self.sink.is_not_enough_space()
    }

    /// Offer fetched entries (in stream order) to the sink.
    ///
    /// Stops at the first refusal. The offset advances to the id of the last
    /// accepted entry; nothing past a refused entry is consumed. Returns the
    /// number of accepted entries.
    pub fn receive(&self, entries: Vec<StreamEntry>) -> usize {
        if self.is_cancelled() {
            return 0;
        }

        let total = entries.len();
        let mut accepted = 0;
        let mut last_accepted = None;

        for entry in entries {
            let id = entry.id;
            if !self.sink.offer(entry) {
                break;
            }
            accepted += 1;
            last_accepted = Some(id);
        }

        if let Some(id) = last_accepted {
            let mut offset = self.offset.lock();
            *offset = offset.advanced(id);
        }

        let rejected = total - accepted;
        if rejected > 0 {
            metrics::ENTRIES_REJECTED_TOTAL
                .with_label_values(&[self.stream.as_str()])
                .inc_by(rejected as u64);
            trace!(
                stream = %self.stream,
                accepted,
                rejected,
                "Sink out of credit; remaining entries will be fetched again"
            );
        }

        accepted
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("offset", &*self.offset.lock())
            .field("options", &self.options)
            .field("consumer", &self.consumer)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
