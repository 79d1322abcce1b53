//! Merged strategy: every subscription shares one set of read options, so all
//! of them are served by a single multi-stream read per pull.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use streamtap_core::{ReadOptions, StreamEntry, StreamOffset};
use streamtap_observability::metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::PullTask;
use crate::error::{ClientError, Result};
use crate::operator::StreamOperator;
use crate::subscription::Subscription;

const STRATEGY: &str = "merged";

/// Registry keyed by stream. A key holds at most one live subscription.
pub struct MergedPullTask {
    operator: Arc<dyn StreamOperator>,
    options: ReadOptions,
    registry: DashMap<String, Arc<Subscription>>,
    shutdown: CancellationToken,
}

impl MergedPullTask {
    pub fn new(
        operator: Arc<dyn StreamOperator>,
        options: ReadOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            operator,
            options,
            registry: DashMap::new(),
            shutdown,
        }
    }

    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    fn evict_cancelled(&self) {
        self.registry
            .retain(|_, subscription| super::retain_live(STRATEGY, subscription));
    }
}

#[async_trait]
impl PullTask for MergedPullTask {
    fn strategy(&self) -> &'static str {
        STRATEGY
    }

    fn add(&self, subscription: Arc<Subscription>) -> Result<()> {
        if subscription.consumer().is_some() {
            return Err(ClientError::IncompatibleSubscription(
                "merged containers do not serve consumer groups".into(),
            ));
        }
        if subscription.options() != &self.options {
            return Err(ClientError::IncompatibleSubscription(format!(
                "read options {:?} differ from the container's {:?}",
                subscription.options(),
                self.options
            )));
        }

        match self.registry.entry(subscription.stream().to_string()) {
            Entry::Occupied(mut slot) => {
                if !slot.get().is_cancelled() {
                    return Err(ClientError::DuplicateSubscription(
                        subscription.stream().to_string(),
                    ));
                }
                // cancelled, not yet evicted: gauge already counts this slot
                slot.insert(subscription);
            }
            Entry::Vacant(slot) => {
                slot.insert(subscription);
                super::registered(STRATEGY);
            }
        }
        Ok(())
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
            trace!(strategy = STRATEGY, "No subscription ready; skipping read");
            return;
        }

        let participants =
            super::pin_latest(STRATEGY, self.operator.as_ref(), &self.shutdown, ready).await;
        if participants.is_empty() {
            return;
        }

        let offsets: Vec<StreamOffset> = participants.iter().map(|s| s.offset()).collect();

        let timer = metrics::PULL_LATENCY
            .with_label_values(&[STRATEGY])
            .start_timer();
        let result = self.operator.read(&self.options, &offsets).await;
        timer.observe_duration();

        match result {
            Ok(entries) => {
                let fetched = entries.len();
                let mut by_stream: HashMap<String, Vec<StreamEntry>> = HashMap::new();
                for entry in entries {
                    by_stream.entry(entry.stream.clone()).or_default().push(entry);
                }

                let mut accepted = 0;
                for subscription in &participants {
                    if let Some(batch) = by_stream.remove(subscription.stream()) {
                        accepted += super::deliver(subscription, batch);
                    }
                }

                debug!(
                    strategy = STRATEGY,
                    streams = participants.len(),
                    fetched,
                    accepted,
                    "Pull complete"
                );
            }
            Err(e) => super::fail(STRATEGY, &self.shutdown, &participants, &e),
        }
    }

    fn consume(&self) {
        self.evict_cancelled();

        let live: Vec<Arc<Subscription>> = self
            .registry
            .iter()
            .map(|slot| Arc::clone(slot.value()))
            .collect();
        let delivered = super::flush_all(&live);
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
