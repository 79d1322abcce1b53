//! In-memory stream operator.
//!
//! [`MemoryStreamOperator`] keeps append-only streams in process and answers
//! reads with the same semantics a Redis-Streams-style log store has:
//!
//! - `$` resolves to the last id of the stream when the read is issued
//! - `count` limits the entries returned per stream
//! - blocking reads wait for an append to any stream, up to `block`
//!   (`Duration::ZERO` waits forever)
//! - consumer groups keep a delivery cursor (`>`) and a pending list per
//!   group; reading a group with an explicit id replays the consumer's
//!   pending entries instead
//!
//! It also lets tests inject read failures and observe how the engine uses it
//! (`read_calls`, `blocked_reads`).
//!
//! ## Example
//!
//! ```ignore
//! let store = Arc::new(MemoryStreamOperator::new());
//! store.append("orders", [("sku", "A-42"), ("qty", "1")]);
//!
//! let container = StreamContainer::builder()
//!     .operator(store.clone())
//!     .build()?;
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use streamtap_core::{ConsumerIdentity, EntryId, ReadOffset, ReadOptions, StreamEntry, StreamOffset};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{ClientError, Result};
use crate::operator::StreamOperator;

type Fields = Vec<(Bytes, Bytes)>;

/// An in-process log store implementing [`StreamOperator`].
pub struct MemoryStreamOperator {
    state: Mutex<StoreState>,

    /// Bumped on every append (and on close) to wake blocked reads
    appended: watch::Sender<u64>,

    read_calls: AtomicUsize,
    blocked_reads: AtomicUsize,
    closed: AtomicBool,
}

#[derive(Default)]
struct StoreState {
    streams: HashMap<String, StreamLog>,

    /// Injected failures, consumed by the next read touching the stream
    failures: HashMap<String, VecDeque<String>>,
}

#[derive(Default)]
struct StreamLog {
    entries: BTreeMap<EntryId, Fields>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

struct GroupState {
    last_delivered: EntryId,

    /// Delivered but unacknowledged entries, with the consumer that owns them
    pending: BTreeMap<EntryId, String>,
}

impl StreamLog {
    fn next_id(&self) -> EntryId {
        let now = current_timestamp_ms();
        if now > self.last_id.millis {
            EntryId::new(now, 0)
        } else {
            self.last_id.successor()
        }
    }

    fn entries_after(&self, stream: &str, start: EntryId, count: usize) -> Vec<StreamEntry> {
        self.entries
            .range((Excluded(start), Unbounded))
            .take(count)
            .map(|(id, fields)| StreamEntry::new(stream, *id, fields.clone()))
            .collect()
    }
}

/// Keeps `blocked_reads` accurate for as long as a read is parked.
struct BlockedRead<'a>(&'a AtomicUsize);

impl<'a> BlockedRead<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for BlockedRead<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStreamOperator {
    pub fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            state: Mutex::new(StoreState::default()),
            appended,
            read_calls: AtomicUsize::new(0),
            blocked_reads: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Append one entry to `stream`, creating the stream if needed.
    pub fn append<I, K, V>(&self, stream: &str, fields: I) -> EntryId
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Bytes>,
        V: Into<Bytes>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let id = {
            let mut state = self.state.lock();
            let log = state.streams.entry(stream.to_string()).or_default();
            let id = log.next_id();
            log.entries.insert(id, fields);
            log.last_id = id;
            id
        };

        trace!(stream = stream, id = %id, "Appended entry");
        self.notify_appended();
        id
    }

    /// Append several entries atomically; blocked reads see all of them at once.
    pub fn append_batch(&self, stream: &str, batch: Vec<Fields>) -> Vec<EntryId> {
        let ids = {
            let mut state = self.state.lock();
            let log = state.streams.entry(stream.to_string()).or_default();
            batch
                .into_iter()
                .map(|fields| {
                    let id = log.next_id();
                    log.entries.insert(id, fields);
                    log.last_id = id;
                    id
                })
                .collect::<Vec<_>>()
        };

        debug!(stream = stream, count = ids.len(), "Appended batch");
        self.notify_appended();
        ids
    }

    /// Create a consumer group whose cursor starts at `start`.
    ///
    /// The stream is created if it does not exist.
    ///
    /// # Errors
    ///
    /// - `OperatorError` if the group already exists or `start` is `>`
    pub fn create_group(&self, stream: &str, group: &str, start: ReadOffset) -> Result<()> {
        let mut state = self.state.lock();
        let log = state.streams.entry(stream.to_string()).or_default();

        if log.groups.contains_key(group) {
            return Err(ClientError::OperatorError(
                "BUSYGROUP Consumer Group name already exists".into(),
            ));
        }

        let last_delivered = match start {
            ReadOffset::Latest => log.last_id,
            ReadOffset::Beginning => EntryId::MIN,
            ReadOffset::After(id) => id,
            ReadOffset::NextUndelivered => {
                return Err(ClientError::OperatorError(
                    "'>' is not a valid group start".into(),
                ))
            }
        };

        log.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Make the next read that includes `stream` fail with `message`.
    ///
    /// Calls queue up: N calls fail the next N reads touching the stream.
    pub fn fail_next_read(&self, stream: &str, message: impl Into<String>) {
        self.state
            .lock()
            .failures
            .entry(stream.to_string())
            .or_default()
            .push_back(message.into());
    }

    /// Unacknowledged entries of `group` on `stream`.
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.state
            .lock()
            .streams
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    /// Number of entries in `stream`.
    pub fn len(&self, stream: &str) -> usize {
        self.state
            .lock()
            .streams
            .get(stream)
            .map_or(0, |log| log.entries.len())
    }

    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    pub fn last_id(&self, stream: &str) -> Option<EntryId> {
        self.state
            .lock()
            .streams
            .get(stream)
            .filter(|log| !log.entries.is_empty())
            .map(|log| log.last_id)
    }

    /// Total read and group-read calls received.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Reads currently parked waiting for data.
    pub fn blocked_reads(&self) -> usize {
        self.blocked_reads.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn notify_appended(&self) {
        self.appended.send_modify(|version| *version += 1);
    }

    /// Count the call, then fail it if the store is closed or a failure was
    /// injected for one of its streams.
    fn begin_read(&self, offsets: &[StreamOffset]) -> Result<()> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);

        if self.is_closed() {
            return Err(ClientError::OperatorError("operator is closed".into()));
        }

        let mut state = self.state.lock();
        for offset in offsets {
            if let Some(message) = state
                .failures
                .get_mut(&offset.stream)
                .and_then(|queue| queue.pop_front())
            {
                return Err(ClientError::OperatorError(message));
            }
        }
        Ok(())
    }

    /// Run `attempt` until it yields entries, blocking between attempts as
    /// `options` allows.
    async fn wait_for<F>(
        &self,
        options: &ReadOptions,
        can_block: bool,
        mut attempt: F,
    ) -> Result<Vec<StreamEntry>>
    where
        F: FnMut() -> Result<Vec<StreamEntry>> + Send,
    {
        // Subscribe before the first attempt so no append can slip in between.
        let mut changes = self.appended.subscribe();

        let entries = attempt()?;
        let block = match options.block() {
            Some(block) if can_block && entries.is_empty() => block,
            _ => return Ok(entries),
        };

        let deadline = (!block.is_zero()).then(|| Instant::now() + block);
        let _blocked = BlockedRead::enter(&self.blocked_reads);

        loop {
            let woke = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, changes.changed())
                    .await
                    .ok(),
                None => Some(changes.changed().await),
            };

            match woke {
                Some(Ok(())) => {}
                // Timed out, or the sender is gone
                _ => return Ok(Vec::new()),
            }

            if self.is_closed() {
                return Err(ClientError::OperatorError("operator is closed".into()));
            }

            let entries = attempt()?;
            if !entries.is_empty() {
                return Ok(entries);
            }
        }
    }
}

impl Default for MemoryStreamOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamOperator for MemoryStreamOperator {
    async fn read(
        &self,
        options: &ReadOptions,
        offsets: &[StreamOffset],
    ) -> Result<Vec<StreamEntry>> {
        self.begin_read(offsets)?;

        // Resolve `$` once, at call time, so a blocked read returns entries
        // appended while it waited.
        let starts = {
            let state = self.state.lock();
            offsets
                .iter()
                .map(|offset| match offset.offset {
                    ReadOffset::Latest => Ok(state
                        .streams
                        .get(&offset.stream)
                        .map_or(EntryId::MIN, |log| log.last_id)),
                    ReadOffset::Beginning => Ok(EntryId::MIN),
                    ReadOffset::After(id) => Ok(id),
                    ReadOffset::NextUndelivered => Err(ClientError::OperatorError(
                        "'>' is only valid for consumer group reads".into(),
                    )),
                })
                .collect::<Result<Vec<_>>>()?
        };

        let count = options.count() as usize;
        self.wait_for(options, true, || {
            let state = self.state.lock();
            Ok(offsets
                .iter()
                .zip(&starts)
                .filter_map(|(offset, start)| {
                    state
                        .streams
                        .get(&offset.stream)
                        .map(|log| log.entries_after(&offset.stream, *start, count))
                })
                .flatten()
                .collect())
        })
        .await
    }

    async fn read_group(
        &self,
        consumer: &ConsumerIdentity,
        options: &ReadOptions,
        offsets: &[StreamOffset],
    ) -> Result<Vec<StreamEntry>> {
        self.begin_read(offsets)?;

        {
            let state = self.state.lock();
            for offset in offsets {
                if offset.offset == ReadOffset::Latest {
                    return Err(ClientError::OperatorError(
                        "'$' is not valid for consumer group reads".into(),
                    ));
                }
                let has_group = state
                    .streams
                    .get(&offset.stream)
                    .is_some_and(|log| log.groups.contains_key(consumer.group()));
                if !has_group {
                    return Err(ClientError::OperatorError(format!(
                        "NOGROUP No such key '{}' or consumer group '{}'",
                        offset.stream,
                        consumer.group()
                    )));
                }
            }
        }

        // Only reads for new entries wait; history reads answer immediately.
        let can_block = offsets
            .iter()
            .all(|offset| offset.offset == ReadOffset::NextUndelivered);
        let count = options.count() as usize;
        let no_ack = options.no_ack();

        self.wait_for(options, can_block, || {
            let mut state = self.state.lock();
            let mut entries = Vec::new();

            for offset in offsets {
                let log = state.streams.get_mut(&offset.stream).ok_or_else(|| {
                    ClientError::OperatorError(format!("stream '{}' vanished", offset.stream))
                })?;
                let StreamLog {
                    entries: log_entries,
                    groups,
                    ..
                } = log;
                let group = groups.get_mut(consumer.group()).ok_or_else(|| {
                    ClientError::OperatorError(format!(
                        "consumer group '{}' vanished",
                        consumer.group()
                    ))
                })?;

                match offset.offset {
                    ReadOffset::NextUndelivered => {
                        let fresh: Vec<StreamEntry> = log_entries
                            .range((Excluded(group.last_delivered), Unbounded))
                            .take(count)
                            .map(|(id, fields)| StreamEntry::new(&offset.stream, *id, fields.clone()))
                            .collect();

                        if let Some(last) = fresh.last() {
                            group.last_delivered = last.id;
                        }
                        if !no_ack {
                            for entry in &fresh {
                                group.pending.insert(entry.id, consumer.name().to_string());
                            }
                        }
                        entries.extend(fresh);
                    }
                    ReadOffset::Beginning | ReadOffset::After(_) => {
                        let start = match offset.offset {
                            ReadOffset::After(id) => id,
                            _ => EntryId::MIN,
                        };
                        let history = group
                            .pending
                            .range((Excluded(start), Unbounded))
                            .filter(|(_, owner)| owner.as_str() == consumer.name())
                            .filter_map(|(id, _)| {
                                log_entries
                                    .get(id)
                                    .map(|fields| StreamEntry::new(&offset.stream, *id, fields.clone()))
                            })
                            .take(count);
                        entries.extend(history);
                    }
                    ReadOffset::Latest => {}
                }
            }

            Ok(entries)
        })
        .await
    }

    async fn last_entry_id(&self, stream: &str) -> Result<Option<EntryId>> {
        if self.is_closed() {
            return Err(ClientError::OperatorError("operator is closed".into()));
        }
        Ok(self.last_id(stream))
    }

    async fn acknowledge(&self, group: &str, stream: &str, ids: &[EntryId]) -> Result<u64> {
        let mut state = self.state.lock();
        let Some(group) = state
            .streams
            .get_mut(stream)
            .and_then(|log| log.groups.get_mut(group))
        else {
            return Ok(0);
        };

        let acked = ids
            .iter()
            .filter(|id| group.pending.remove(*id).is_some())
            .count();
        Ok(acked as u64)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.notify_appended();
        debug!("Memory stream operator closed");
        Ok(())
    }
}

/// Get current timestamp in milliseconds since Unix epoch
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn options(count: i64) -> ReadOptions {
        ReadOptions::new(count, None, false).unwrap()
    }

    fn blocking(count: i64, block_ms: i64) -> ReadOptions {
        ReadOptions::new(count, Some(block_ms), false).unwrap()
    }

    fn group_consumer(name: &str) -> ConsumerIdentity {
        ConsumerIdentity::new("workers", name).unwrap()
    }

    #[test]
    fn test_append_ids_strictly_increase() {
        let store = MemoryStreamOperator::new();
        let mut previous = EntryId::MIN;
        for _ in 0..50 {
            let id = store.append("s", [("k", "v")]);
            assert!(id > previous);
            previous = id;
        }
        assert_eq!(store.len("s"), 50);
        assert_eq!(store.last_id("s"), Some(previous));
    }

    #[tokio::test]
    async fn test_read_from_beginning_respects_count() {
        let store = MemoryStreamOperator::new();
        let ids: Vec<_> = (0..5).map(|_| store.append("s", [("k", "v")])).collect();

        let entries = store
            .read(&options(3), &[StreamOffset::beginning("s")])
            .await
            .unwrap();

        assert_eq!(
            entries.iter().map(|e| e.id).collect::<Vec<_>>(),
            ids[..3].to_vec()
        );
    }

    #[tokio::test]
    async fn test_read_after_id_is_exclusive() {
        let store = MemoryStreamOperator::new();
        let ids: Vec<_> = (0..3).map(|_| store.append("s", [("k", "v")])).collect();

        let entries = store
            .read(&options(10), &[StreamOffset::after("s", ids[0])])
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, ids[1]);
    }

    #[tokio::test]
    async fn test_non_blocking_latest_sees_nothing() {
        let store = MemoryStreamOperator::new();
        store.append("s", [("k", "v")]);

        let entries = store
            .read(&options(10), &[StreamOffset::latest("s")])
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_multi_stream_read() {
        let store = MemoryStreamOperator::new();
        store.append("a", [("k", "1")]);
        store.append("b", [("k", "2")]);
        store.append("a", [("k", "3")]);

        let entries = store
            .read(
                &options(10),
                &[StreamOffset::beginning("a"), StreamOffset::beginning("b")],
            )
            .await
            .unwrap();

        let streams: Vec<_> = entries.iter().map(|e| e.stream.as_str()).collect();
        assert_eq!(streams, vec!["a", "a", "b"]);
    }

    #[tokio::test]
    async fn test_blocking_latest_wakes_on_append() {
        let store = Arc::new(MemoryStreamOperator::new());
        store.append("s", [("old", "1")]);

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .read(&blocking(10, 5_000), &[StreamOffset::latest("s")])
                    .await
            })
        };

        while store.blocked_reads() == 0 {
            tokio::task::yield_now().await;
        }
        let ids = store.append_batch(
            "s",
            vec![
                vec![(Bytes::from("new"), Bytes::from("1"))],
                vec![(Bytes::from("new"), Bytes::from("2"))],
            ],
        );

        let entries = reader.await.unwrap().unwrap();
        assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
        assert_eq!(store.blocked_reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_read_times_out_empty() {
        let store = MemoryStreamOperator::new();
        let entries = store
            .read(&blocking(10, 200), &[StreamOffset::latest("s")])
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let store = MemoryStreamOperator::new();
        store.append("s", [("k", "v")]);
        store.fail_next_read("s", "connection reset");

        let err = store
            .read(&options(10), &[StreamOffset::beginning("s")])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::OperatorError(ref m) if m == "connection reset"));

        let entries = store
            .read(&options(10), &[StreamOffset::beginning("s")])
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(store.read_calls(), 2);
    }

    #[tokio::test]
    async fn test_plain_read_rejects_group_cursor() {
        let store = MemoryStreamOperator::new();
        let err = store
            .read(&options(10), &[StreamOffset::next_undelivered("s")])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::OperatorError(_)));
    }

    #[tokio::test]
    async fn test_group_read_requires_group() {
        let store = MemoryStreamOperator::new();
        store.append("s", [("k", "v")]);

        let err = store
            .read_group(
                &group_consumer("c1"),
                &options(10),
                &[StreamOffset::next_undelivered("s")],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("NOGROUP"));
    }

    #[tokio::test]
    async fn test_group_read_delivers_once_and_tracks_pending() {
        let store = MemoryStreamOperator::new();
        store.create_group("s", "workers", ReadOffset::Beginning).unwrap();
        for i in 0..4 {
            store.append("s", [("n", i.to_string())]);
        }

        let first = store
            .read_group(
                &group_consumer("c1"),
                &options(3),
                &[StreamOffset::next_undelivered("s")],
            )
            .await
            .unwrap();
        let second = store
            .read_group(
                &group_consumer("c2"),
                &options(3),
                &[StreamOffset::next_undelivered("s")],
            )
            .await
            .unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 1);
        assert!(second[0].id > first[2].id);
        assert_eq!(store.pending_count("s", "workers"), 4);

        let acked = store
            .acknowledge("workers", "s", &[first[0].id, first[1].id])
            .await
            .unwrap();
        assert_eq!(acked, 2);
        assert_eq!(store.pending_count("s", "workers"), 2);
    }

    #[tokio::test]
    async fn test_group_history_read_replays_own_pending() {
        let store = MemoryStreamOperator::new();
        store.create_group("s", "workers", ReadOffset::Beginning).unwrap();
        store.append("s", [("n", "1")]);
        store.append("s", [("n", "2")]);

        let c1 = group_consumer("c1");
        let delivered = store
            .read_group(&c1, &options(1), &[StreamOffset::next_undelivered("s")])
            .await
            .unwrap();
        store
            .read_group(
                &group_consumer("c2"),
                &options(1),
                &[StreamOffset::next_undelivered("s")],
            )
            .await
            .unwrap();

        let history = store
            .read_group(&c1, &options(10), &[StreamOffset::beginning("s")])
            .await
            .unwrap();
        assert_eq!(history, delivered);
    }

    #[tokio::test]
    async fn test_group_no_ack_skips_pending() {
        let store = MemoryStreamOperator::new();
        store.create_group("s", "workers", ReadOffset::Beginning).unwrap();
        store.append("s", [("n", "1")]);

        let no_ack = ReadOptions::new(10, None, true).unwrap();
        let entries = store
            .read_group(
                &group_consumer("c1"),
                &no_ack,
                &[StreamOffset::next_undelivered("s")],
            )
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(store.pending_count("s", "workers"), 0);
    }

    #[tokio::test]
    async fn test_last_entry_id() {
        let store = MemoryStreamOperator::new();
        assert_eq!(store.last_entry_id("s").await.unwrap(), None);

        store.append("s", [("k", "v")]);
        let last = store.append("s", [("k", "v")]);
        assert_eq!(store.last_entry_id("s").await.unwrap(), Some(last));
        assert_eq!(store.read_calls(), 0);

        store.close().await.unwrap();
        assert!(store.last_entry_id("s").await.is_err());
    }

    #[test]
    fn test_create_group_twice_fails() {
        let store = MemoryStreamOperator::new();
        store.create_group("s", "g", ReadOffset::Latest).unwrap();
        let err = store.create_group("s", "g", ReadOffset::Latest).unwrap_err();
        assert!(err.to_string().contains("BUSYGROUP"));
    }

    #[tokio::test]
    async fn test_close_fails_reads_and_wakes_blocked() {
        let store = Arc::new(MemoryStreamOperator::new());

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .read(&blocking(10, 0), &[StreamOffset::latest("s")])
                    .await
            })
        };
        while store.blocked_reads() == 0 {
            tokio::task::yield_now().await;
        }

        store.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
        assert!(store.is_closed());
        assert!(store
            .read(&options(1), &[StreamOffset::beginning("s")])
            .await
            .is_err());
    }
}
