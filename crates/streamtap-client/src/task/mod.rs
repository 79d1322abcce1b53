//! Pull/consume strategies.
//!
//! A container owns exactly one [`PullTask`]. The container's schedulers call
//! [`pull`](PullTask::pull) to fetch entries into sinks and
//! [`consume`](PullTask::consume) to flush sinks to subscribers. Both passes
//! evict cancelled subscriptions as they go.
//!
//! | Strategy | Registry | Reads per pull | Failure scope |
//! |---|---|---|---|
//! | [`MergedPullTask`] | one live subscription per stream key | one multi-stream read | every participant |
//! | [`GenericPullTask`] | any subscriptions, duplicates allowed | one read per subscription | the failing subscription |

mod generic;
mod merged;

pub use generic::GenericPullTask;
pub use merged::MergedPullTask;

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use streamtap_core::{EntryId, ReadOffset, StreamEntry};
use streamtap_observability::metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::operator::StreamOperator;
use crate::subscription::Subscription;

#[async_trait]
pub trait PullTask: Send + Sync {
    /// Label used in logs and metrics.
    fn strategy(&self) -> &'static str;

    /// Register a subscription. Fails if the strategy cannot serve it.
    fn add(&self, subscription: Arc<Subscription>) -> Result<()>;

    /// One pull cycle: read on behalf of every pullable subscription.
    async fn pull(&self);

    /// One consume cycle: flush every live sink.
    fn consume(&self);

    /// Registered subscriptions, including cancelled ones not yet evicted.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel and drop every registered subscription.
    fn cancel_all(&self);
}

pub(crate) fn registered(strategy: &'static str) {
    metrics::SUBSCRIPTIONS_ACTIVE
        .with_label_values(&[strategy])
        .inc();
}

/// Eviction check for one registry slot. Returns whether it stays.
pub(crate) fn retain_live(strategy: &'static str, subscription: &Subscription) -> bool {
    if subscription.is_cancelled() {
        metrics::SUBSCRIPTIONS_ACTIVE
            .with_label_values(&[strategy])
            .dec();
        debug!(
            strategy,
            stream = %subscription.stream(),
            subscription = subscription.id(),
            "Evicted cancelled subscription"
        );
        false
    } else {
        true
    }
}

pub(crate) fn flush_all<'a>(subscriptions: impl IntoIterator<Item = &'a Arc<Subscription>>) -> usize {
    subscriptions
        .into_iter()
        .map(|subscription| subscription.sink().flush())
        .sum()
}

/// Hand fetched entries to a subscription.
pub(crate) fn deliver(subscription: &Subscription, entries: Vec<StreamEntry>) -> usize {
    if entries.is_empty() {
        return 0;
    }
    metrics::ENTRIES_FETCHED_TOTAL
        .with_label_values(&[subscription.stream()])
        .inc_by(entries.len() as u64);
    subscription.receive(entries)
}

/// Pin the `$` offsets of `participants` to their stream's current last id.
///
/// Runs before a subscription's first read, so entries appended between two
/// pulls are never skipped. A subscription whose lookup fails is failed like
/// a read and left out of the returned list.
pub(crate) async fn pin_latest(
    strategy: &'static str,
    operator: &dyn StreamOperator,
    shutdown: &CancellationToken,
    participants: Vec<Arc<Subscription>>,
) -> Vec<Arc<Subscription>> {
    let resolved = join_all(participants.into_iter().map(|subscription| async move {
        if subscription.offset().offset != ReadOffset::Latest {
            return Some(subscription);
        }
        match operator.last_entry_id(subscription.stream()).await {
            Ok(last) => {
                subscription.pin_latest(last.unwrap_or(EntryId::MIN));
                Some(subscription)
            }
            Err(e) => {
                fail(strategy, shutdown, std::slice::from_ref(&subscription), &e);
                None
            }
        }
    }))
    .await;

    resolved.into_iter().flatten().collect()
}

/// Route a failed read to the sinks that took part in it.
///
/// Reads that fail after shutdown began are the operator being closed under
/// them; those subscriptions are cancelled by the container instead.
pub(crate) fn fail(
    strategy: &'static str,
    shutdown: &CancellationToken,
    participants: &[Arc<Subscription>],
    cause: &ClientError,
) {
    if shutdown.is_cancelled() {
        debug!(strategy, error = %cause, "Read failed during shutdown");
        return;
    }

    metrics::READ_ERRORS_TOTAL
        .with_label_values(&[strategy])
        .inc();

    let error = ClientError::read_failed(participants.iter().map(|s| s.stream()), cause);
    warn!(
        strategy,
        subscriptions = participants.len(),
        error = %error,
        "Read failed; terminating subscriptions"
    );
    for subscription in participants {
        subscription.sink().error(error.clone());
    }
}
