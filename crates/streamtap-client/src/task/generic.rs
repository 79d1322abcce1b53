//! Generic strategy: one independent read per subscription.
//!
//! Serves what a merged read cannot: differing block durations or counts,
//! consumer groups, and several subscriptions to the same stream key. The
//! reads of one pull run concurrently and the pull completes when all of them
//! have.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use streamtap_observability::metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::PullTask;
use crate::error::{ClientError, Result};
use crate::operator::StreamOperator;
use crate::subscription::Subscription;

const STRATEGY: &str = "generic";

/// Registry keyed by subscription id. Stream keys may repeat.
pub struct GenericPullTask {
    operator: Arc<dyn StreamOperator>,
    registry: DashMap<u64, Arc<Subscription>>,
    shutdown: CancellationToken,
}

impl GenericPullTask {
    pub fn new(operator: Arc<dyn StreamOperator>, shutdown: CancellationToken) -> Self {
        Self {
            operator,
            registry: DashMap::new(),
            shutdown,
        }
    }

    fn evict_cancelled(&self) {
        self.registry
            .retain(|_, subscription| super::retain_live(STRATEGY, subscription));
    }

    async fn pull_one(&self, subscription: &Arc<Subscription>) -> usize {
        let offsets = [subscription.offset()];
        let options = subscription.next_read_options();

        let result = match subscription.consumer() {
            Some(consumer) => self.operator.read_group(consumer, &options, &offsets).await,
            None => self.operator.read(&options, &offsets).await,
        };

        match result {
            Ok(entries) => super::deliver(subscription, entries),
            Err(e) => {
                super::fail(
                    STRATEGY,
                    &self.shutdown,
                    std::slice::from_ref(subscription),
                    &e,
                );
                0
            }
        }
    }
}

#[async_trait]
impl PullTask for GenericPullTask {
    fn strategy(&self) -> &'static str {
        STRATEGY
    }

    fn add(&self, subscription: Arc<Subscription>) -> Result<()> {
        match self.registry.entry(subscription.id()) {
            Entry::Occupied(_) => Err(ClientError::IncompatibleSubscription(format!(
                "subscription id {} is already registered",
                subscription.id()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(subscription);
                super::registered(STRATEGY);
                Ok(())
            }
        }
    }

    async fn pull(&self) {
        self.evict_cancelled();

        let ready: Vec<Arc<Subscription>> = self
            .registry
            .iter()
            .filter(|slot| slot.value().is_pullable())
            .map(|slot| Arc::clone(slot.value()))
            .collect();

        if ready.is_empty() {
            trace!(strategy = STRATEGY, "No subscription ready; skipping reads");
            return;
        }

        let participants =
            super::pin_latest(STRATEGY, self.operator.as_ref(), &self.shutdown, ready).await;

        let timer = metrics::PULL_LATENCY
            .with_label_values(&[STRATEGY])
            .start_timer();
        let accepted: usize = join_all(participants.iter().map(|s| self.pull_one(s)))
            .await
            .into_iter()
            .sum();
        timer.observe_duration();

        debug!(
            strategy = STRATEGY,
            reads = participants.len(),
            accepted,
            "Pull complete"
        );
    }

    fn consume(&self) {
        self.evict_cancelled();

        let delivered: usize = self
            .registry
            .iter()
            .map(|slot| slot.value().sink().flush())
            .sum();
        if delivered > 0 {
            trace!(strategy = STRATEGY, delivered, "Flushed sinks");
        }
    }

    fn len(&self) -> usize {
        self.registry.len()
    }

    fn cancel_all(&self) {
        for slot in self.registry.iter() {
            slot.value().sink().cancel();
        }
        self.evict_cancelled();
    }
}
