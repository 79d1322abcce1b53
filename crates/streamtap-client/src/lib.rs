//! StreamTap Client - backpressure-aware stream consumption
//!
//! This crate turns an append-only log store into per-stream asynchronous
//! flows. Subscribers signal demand, a container pulls entries on their behalf
//! through a [`StreamOperator`], and every entry reaches its subscriber in
//! stream order without ever buffering more than was asked for.
//!
//! # Examples
//!
//! ## Tailing streams (merged strategy)
//!
//! ```ignore
//! use futures::StreamExt;
//! use streamtap_client::{ContainerStrategy, StreamContainer};
//! use streamtap_core::{ReadOptions, StreamOffset};
//!
//! let options = ReadOptions::new(100, Some(1_000), false)?;
//! let container = StreamContainer::builder()
//!     .operator(operator)
//!     .strategy(ContainerStrategy::Merged(options))
//!     .build()?;
//!
//! let mut orders = container.subscribe(StreamOffset::latest("orders"), options)?;
//! orders.request(100);
//!
//! while let Some(entry) = orders.next().await {
//!     println!("{}", entry?.id);
//!     orders.request(1);
//! }
//!
//! container.shutdown().await;
//! ```
//!
//! ## Consumer groups (generic strategy)
//!
//! ```ignore
//! use streamtap_core::{ConsumerIdentity, StreamOffset};
//!
//! let consumer = ConsumerIdentity::new("billing", "worker-1")?;
//! let mut flow = container.subscribe_group(
//!     StreamOffset::next_undelivered("orders"),
//!     options,
//!     consumer,
//! )?;
//! flow.request(10);
//!
//! if let Some(entry) = flow.next_entry().await {
//!     let entry = entry?;
//!     container.acknowledge("billing", "orders", &[entry.id]).await?;
//! }
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod memory;
pub mod operator;
pub mod sink;
pub mod subscription;
pub mod task;

pub use config::{ContainerConfig, StrategyConfig};
pub use container::{ContainerState, ContainerStrategy, StreamContainer, StreamContainerBuilder};
pub use error::{ClientError, Result};
pub use memory::MemoryStreamOperator;
pub use operator::StreamOperator;
pub use sink::{Flow, Sink};
pub use subscription::Subscription;

pub use streamtap_core::{
    ConsumerIdentity, EntryId, ReadOffset, ReadOptions, StreamEntry, StreamOffset,
};
