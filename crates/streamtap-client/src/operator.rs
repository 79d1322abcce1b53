//! The stream operator seam.
//!
//! The engine never talks to the log store directly. Every command goes
//! through a [`StreamOperator`], shared by all subscriptions of a container
//! behind an `Arc`. Implementations must be stateless with respect to the
//! engine: commands may be issued concurrently from several pull executions.
//!
//! ```text
//! StreamContainer ─→ PullTask ─→ Arc<dyn StreamOperator> ─→ log store
//! ```
//!
//! [`MemoryStreamOperator`](crate::memory::MemoryStreamOperator) is the
//! in-process implementation used by tests and demos.

use async_trait::async_trait;
use streamtap_core::{ConsumerIdentity, EntryId, ReadOptions, StreamEntry, StreamOffset};

use crate::error::Result;

#[async_trait]
pub trait StreamOperator: Send + Sync {
    /// Plain (non-group) read of one or more streams.
    ///
    /// Honors `count` (per stream) and `block` from `options`. Returns the
    /// entries of all streams, each stream's entries in increasing id order.
    async fn read(&self, options: &ReadOptions, offsets: &[StreamOffset])
        -> Result<Vec<StreamEntry>>;

    /// Consumer-group read of one or more streams.
    ///
    /// Additionally honors `no_ack`: when unset, delivered entries are added to
    /// the group's pending list until acknowledged.
    async fn read_group(
        &self,
        consumer: &ConsumerIdentity,
        options: &ReadOptions,
        offsets: &[StreamOffset],
    ) -> Result<Vec<StreamEntry>>;

    /// Id of the newest entry in `stream`, or `None` if it holds no entries.
    ///
    /// Used to pin a `$` offset once, so entries appended between two reads
    /// of the same subscription are not skipped.
    async fn last_entry_id(&self, stream: &str) -> Result<Option<EntryId>>;

    /// Acknowledge entries for a consumer group. Returns how many entries were
    /// removed from the pending list.
    async fn acknowledge(&self, group: &str, stream: &str, ids: &[EntryId]) -> Result<u64>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()>;
}
