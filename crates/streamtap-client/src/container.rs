//! The stream container: subscription entry point and scheduler owner.
//!
//! A container owns one stream operator, one [`PullTask`] and two periodic
//! schedulers running on an injected Tokio runtime:
//!
//! ```text
//!                ┌────────────── StreamContainer ──────────────┐
//! subscribe() ──→│ Subscription ─→ PullTask registry            │
//!                │                                              │
//!                │ pull scheduler ──→ PullTask::pull ──→ operator.read / read_group
//!                │ consume scheduler → PullTask::consume ──→ Sink::flush ──→ Flow
//!                └──────────────────────────────────────────────┘
//! ```
//!
//! The consume scheduler runs independently of pull, at no more than half the
//! pull interval, so buffered entries keep draining while a read blocks.
//!
//! ## Scheduling
//!
//! - **Merged**: pull at fixed delay. The next execution is scheduled only
//!   after the previous one completed.
//! - **Generic**: pull at fixed rate. A tick that finds the previous execution
//!   still running is skipped.
//!
//! Pull executions run on their own spawned task and consume executions under
//! `catch_unwind`, so a panicking tick is logged and the schedule continues.
//!
//! ## Lifecycle
//!
//! `Created → Running → ShuttingDown → Closed`. A container is running as soon
//! as [`StreamContainerBuilder::build`] returns.
//!
//! ## Example
//!
//! ```ignore
//! use streamtap_client::{ContainerStrategy, StreamContainer};
//! use streamtap_core::{ReadOptions, StreamOffset};
//!
//! let options = ReadOptions::new(100, Some(1_000), false)?;
//! let container = StreamContainer::builder()
//!     .operator(operator)
//!     .strategy(ContainerStrategy::Merged(options))
//!     .pull_interval(Duration::from_millis(50))
//!     .build()?;
//!
//! let mut flow = container.subscribe(StreamOffset::latest("orders"), options)?;
//! flow.request(100);
//! ```

use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamtap_core::{ConsumerIdentity, EntryId, ReadOptions, StreamOffset};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{
    effective_consume_interval, ContainerConfig, DEFAULT_PULL_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT,
};
use crate::error::{ClientError, Result};
use crate::operator::StreamOperator;
use crate::sink::Flow;
use crate::subscription::Subscription;
use crate::task::{GenericPullTask, MergedPullTask, PullTask};

/// Container lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    ShuttingDown,
    Closed,
}

/// How subscriptions are turned into reads. Fixed for the container's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStrategy {
    /// One multi-stream read per pull; every subscription must use these options
    /// and no consumer group.
    Merged(ReadOptions),

    /// One read per subscription; any options, consumer groups allowed.
    Generic,
}

/// Builder for [`StreamContainer`].
pub struct StreamContainerBuilder {
    operator: Option<Arc<dyn StreamOperator>>,
    strategy: ContainerStrategy,
    pull_interval: Duration,
    consume_interval: Option<Duration>,
    shutdown_quiet_period: Duration,
    shutdown_timeout: Duration,
    runtime: Option<Handle>,
}

impl StreamContainerBuilder {
    pub fn new() -> Self {
        Self {
            operator: None,
            strategy: ContainerStrategy::Generic,
            pull_interval: DEFAULT_PULL_INTERVAL,
            consume_interval: None,
            shutdown_quiet_period: Duration::ZERO,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            runtime: None,
        }
    }

    /// Set the stream operator shared by every subscription.
    pub fn operator(mut self, operator: Arc<dyn StreamOperator>) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn strategy(mut self, strategy: ContainerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the pull interval (default: 100ms).
    pub fn pull_interval(mut self, interval: Duration) -> Self {
        self.pull_interval = interval;
        self
    }

    /// Set the consume interval. Capped at half the pull interval, with a 1ms
    /// floor.
    pub fn consume_interval(mut self, interval: Duration) -> Self {
        self.consume_interval = Some(interval);
        self
    }

    /// Set the default quiet period used by [`StreamContainer::shutdown`].
    pub fn shutdown_quiet_period(mut self, period: Duration) -> Self {
        self.shutdown_quiet_period = period;
        self
    }

    /// Set the default timeout used by [`StreamContainer::shutdown`] (default: 2s).
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Apply every setting of a loaded [`ContainerConfig`].
    ///
    /// # Errors
    ///
    /// Returns the config's validation error.
    pub fn config(mut self, config: &ContainerConfig) -> Result<Self> {
        config.validate()?;
        self.strategy = config.strategy()?;
        self.pull_interval = config.pull_interval();
        self.consume_interval = Some(config.consume_interval());
        self.shutdown_quiet_period = config.shutdown_quiet_period();
        self.shutdown_timeout = config.shutdown_timeout();
        Ok(self)
    }

    /// Run the schedulers on `runtime` instead of the current runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the container and start its schedulers.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - No operator was set
    /// - The pull interval is zero
    /// - No runtime was set and the caller is not inside a Tokio runtime
    pub fn build(self) -> Result<StreamContainer> {
        let operator = self
            .operator
            .ok_or_else(|| ClientError::ConfigError("operator required".into()))?;

        if self.pull_interval.is_zero() {
            return Err(ClientError::ConfigError(
                "pull interval must be greater than 0".into(),
            ));
        }

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                ClientError::ConfigError("no runtime set and not inside a Tokio runtime".into())
            })?,
        };

        let cancel = CancellationToken::new();
        let task: Arc<dyn PullTask> = match self.strategy {
            ContainerStrategy::Merged(options) => Arc::new(MergedPullTask::new(
                Arc::clone(&operator),
                options,
                cancel.clone(),
            )),
            ContainerStrategy::Generic => {
                Arc::new(GenericPullTask::new(Arc::clone(&operator), cancel.clone()))
            }
        };

        let inner = Arc::new(ContainerInner {
            operator,
            task,
            strategy: self.strategy,
            state: Mutex::new(ContainerState::Created),
            next_subscription_id: AtomicU64::new(1),
            cancel,
            runtime,
            pull_interval: self.pull_interval,
            consume_interval: effective_consume_interval(
                self.pull_interval,
                self.consume_interval,
            ),
            shutdown_quiet_period: self.shutdown_quiet_period,
            shutdown_timeout: self.shutdown_timeout,
        });

        inner.start();
        Ok(StreamContainer { inner })
    }
}

impl Default for StreamContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point for subscribing to streams.
///
/// Dropping the container stops its schedulers and ends every outstanding
/// flow without closing the operator; call
/// [`shutdown`](StreamContainer::shutdown) for an orderly stop.
pub struct StreamContainer {
    inner: Arc<ContainerInner>,
}

struct ContainerInner {
    operator: Arc<dyn StreamOperator>,
    task: Arc<dyn PullTask>,
    strategy: ContainerStrategy,
    state: Mutex<ContainerState>,
    next_subscription_id: AtomicU64,

    /// Stops both schedulers; in-flight executions finish
    cancel: CancellationToken,

    runtime: Handle,
    pull_interval: Duration,
    consume_interval: Duration,
    shutdown_quiet_period: Duration,
    shutdown_timeout: Duration,
}

impl StreamContainer {
    pub fn builder() -> StreamContainerBuilder {
        StreamContainerBuilder::new()
    }

    pub fn state(&self) -> ContainerState {
        *self.inner.state.lock()
    }

    pub fn strategy(&self) -> ContainerStrategy {
        self.inner.strategy
    }

    /// Registered subscriptions. Cancelled subscriptions count until the next
    /// pull or consume pass evicts them.
    pub fn subscription_count(&self) -> usize {
        self.inner.task.len()
    }

    /// Subscribe to one stream without a consumer group.
    ///
    /// The returned flow delivers nothing until [`Flow::request`] is called.
    ///
    /// # Errors
    ///
    /// - `ContainerNotRunning` once shutdown has begun
    /// - `IncompatibleSubscription` for a `>` offset, or options the merged
    ///   strategy cannot serve
    /// - `DuplicateSubscription` if a merged container already has a live
    ///   subscription to the stream
    pub fn subscribe(&self, offset: StreamOffset, options: ReadOptions) -> Result<Flow> {
        if offset.offset.requires_group() {
            return Err(ClientError::IncompatibleSubscription(format!(
                "offset '{}' of stream '{}' requires a consumer group",
                offset.offset, offset.stream
            )));
        }
        self.register(offset, options, None)
    }

    /// Subscribe to one stream as a member of a consumer group.
    ///
    /// Entries are added to the group's pending list unless `options.no_ack()`
    /// is set; see [`acknowledge`](StreamContainer::acknowledge).
    pub fn subscribe_group(
        &self,
        offset: StreamOffset,
        options: ReadOptions,
        consumer: ConsumerIdentity,
    ) -> Result<Flow> {
        if !offset.offset.allowed_for_group() {
            return Err(ClientError::IncompatibleSubscription(format!(
                "offset '{}' of stream '{}' is not valid for consumer groups",
                offset.offset, offset.stream
            )));
        }
        self.register(offset, options, Some(consumer))
    }

    /// Acknowledge processed entries of a group subscription.
    ///
    /// Returns how many entries were removed from the group's pending list.
    pub async fn acknowledge(&self, group: &str, stream: &str, ids: &[EntryId]) -> Result<u64> {
        self.ensure_running()?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.inner.operator.acknowledge(group, stream, ids).await
    }

    fn register(
        &self,
        offset: StreamOffset,
        options: ReadOptions,
        consumer: Option<ConsumerIdentity>,
    ) -> Result<Flow> {
        self.ensure_running()?;

        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (subscription, flow) = Subscription::new(id, offset, options, consumer);
        let stream = subscription.stream().to_string();
        let group = subscription.consumer().map(ToString::to_string);

        self.inner.task.add(subscription)?;

        debug!(
            strategy = self.inner.task.strategy(),
            stream = %stream,
            subscription = id,
            consumer = ?group,
            "Subscribed"
        );
        Ok(flow)
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            ContainerState::Running => Ok(()),
            state => Err(ClientError::ContainerNotRunning(state)),
        }
    }

    /// Begin shutdown and return a handle that resolves when it completes.
    ///
    /// 1. Stop both schedulers. An in-flight pull is not interrupted.
    /// 2. Wait `quiet_period`.
    /// 3. Close the operator, bounded by `timeout`.
    /// 4. Cancel every subscription, which ends their flows.
    ///
    /// Calling this on a container that is already shutting down or closed
    /// resolves to `Ok(())` immediately.
    ///
    /// # Errors
    ///
    /// The handle resolves to `Timeout` if closing the operator took longer
    /// than `timeout`, or to the operator's close error.
    pub fn shutdown_async(
        &self,
        quiet_period: Duration,
        timeout: Duration,
    ) -> JoinHandle<Result<()>> {
        let begin = {
            let mut state = self.inner.state.lock();
            match *state {
                ContainerState::Created | ContainerState::Running => {
                    *state = ContainerState::ShuttingDown;
                    true
                }
                ContainerState::ShuttingDown | ContainerState::Closed => false,
            }
        };

        if !begin {
            debug!("Shutdown already in progress");
            return self.inner.runtime.spawn(async { Ok(()) });
        }

        info!(
            strategy = self.inner.task.strategy(),
            subscriptions = self.inner.task.len(),
            "Container shutting down"
        );
        self.inner.cancel.cancel();

        let inner = Arc::clone(&self.inner);
        self.inner
            .runtime
            .spawn(async move { inner.finish_shutdown(quiet_period, timeout).await })
    }

    /// Shut down with the configured quiet period and timeout, waiting for
    /// completion.
    ///
    /// Failures are logged, not returned.
    pub async fn shutdown(&self) {
        let quiet_period = self.inner.shutdown_quiet_period;
        let timeout = self.inner.shutdown_timeout;
        let handle = self.shutdown_async(quiet_period, timeout);

        match tokio::time::timeout(quiet_period + timeout, handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "Container shutdown did not complete cleanly"),
            Ok(Err(e)) => error!(error = %e, "Container shutdown task failed"),
            Err(_) => warn!(
                timeout_ms = (quiet_period + timeout).as_millis() as u64,
                "Timed out waiting for container shutdown"
            ),
        }
    }
}

impl Drop for StreamContainer {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
        self.inner.task.cancel_all();
    }
}

impl ContainerInner {
    fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != ContainerState::Created {
                return;
            }
            *state = ContainerState::Running;
        }

        match self.strategy {
            ContainerStrategy::Merged(_) => {
                self.runtime.spawn(Arc::clone(self).pull_fixed_delay());
            }
            ContainerStrategy::Generic => {
                self.runtime.spawn(Arc::clone(self).pull_fixed_rate());
            }
        }
        self.runtime.spawn(Arc::clone(self).consume_loop());

        info!(
            strategy = self.task.strategy(),
            pull_interval_ms = self.pull_interval.as_millis() as u64,
            consume_interval_ms = self.consume_interval.as_millis() as u64,
            "Container started"
        );
    }

    fn spawn_pull(&self) -> JoinHandle<()> {
        let task = Arc::clone(&self.task);
        self.runtime.spawn(async move { task.pull().await })
    }

    /// Next execution is scheduled `pull_interval` after the previous one ended.
    async fn pull_fixed_delay(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if let Err(e) = self.spawn_pull().await {
                error!(strategy = self.task.strategy(), error = %e, "Pull execution panicked");
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.pull_interval) => {}
            }
        }
        debug!(strategy = self.task.strategy(), "Pull scheduler stopped");
    }

    /// One execution per tick; a tick that finds the previous execution still
    /// running is skipped.
    async fn pull_fixed_rate(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.pull_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Some(previous) = in_flight.take() {
                if !previous.is_finished() {
                    trace!(strategy = self.task.strategy(), "Previous pull still running; skipping tick");
                    in_flight = Some(previous);
                    continue;
                }
                if let Err(e) = previous.await {
                    error!(strategy = self.task.strategy(), error = %e, "Pull execution panicked");
                }
            }

            in_flight = Some(self.spawn_pull());
        }
        debug!(strategy = self.task.strategy(), "Pull scheduler stopped");
    }

    async fn consume_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.consume_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let task = Arc::clone(&self.task);
            if std::panic::catch_unwind(AssertUnwindSafe(move || task.consume())).is_err() {
                error!(strategy = self.task.strategy(), "Consume execution panicked");
            }
        }
        debug!(strategy = self.task.strategy(), "Consume scheduler stopped");
    }

    async fn finish_shutdown(&self, quiet_period: Duration, timeout: Duration) -> Result<()> {
        if !quiet_period.is_zero() {
            tokio::time::sleep(quiet_period).await;
        }

        let closed = tokio::time::timeout(timeout, self.operator.close())
            .map(|result| match result {
                Ok(closed) => closed,
                Err(_) => Err(ClientError::Timeout(timeout)),
            })
            .await;

        let cancelled = self.task.len();
        self.task.cancel_all();
        *self.state.lock() = ContainerState::Closed;

        match &closed {
            Ok(()) => info!(subscriptions = cancelled, "Container closed"),
            Err(e) => warn!(error = %e, subscriptions = cancelled, "Container closed with errors"),
        }
        closed
    }
}
