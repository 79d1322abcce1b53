//! StreamTap Core
//!
//! Data model shared by the StreamTap consumption engine: entry ids, stream
//! entries, read offsets, read options and consumer identities.

pub mod consumer;
pub mod entry;
pub mod error;
pub mod offset;
pub mod options;

pub use consumer::ConsumerIdentity;
pub use entry::{EntryId, StreamEntry};
pub use error::{Error, Result};
pub use offset::{ReadOffset, StreamOffset};
pub use options::{ReadOptions, ReadOptionsBuilder, DEFAULT_COUNT, MAX_COUNT};
