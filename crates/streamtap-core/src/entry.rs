//! Stream Entry Data Structure
//!
//! This module defines [`StreamEntry`], the unit of data read from a stream, and
//! [`EntryId`], the position of an entry inside its stream.
//!
//! ## What is an Entry?
//! An entry is one element appended to an append-only stream, similar to:
//! - A Redis Streams entry
//! - A Kafka record
//! - A line in a log file
//!
//! ## Structure
//! Each entry contains:
//! - **stream**: Key of the stream the entry was read from
//! - **id**: `<millis>-<sequence>` identifier, strictly increasing within a stream
//! - **fields**: Ordered field/value pairs (arbitrary bytes)
//!
//! ## Ordering
//! Ids compare by millisecond part first, then by sequence. The log store
//! guarantees that every appended id is strictly greater than the previous one,
//! so ids are totally ordered within a stream. Across streams ids carry no
//! meaning.
//!
//! ## Example
//! ```ignore
//! let entry = StreamEntry::new(
//!     "orders",
//!     "1700000000000-0".parse()?,
//!     vec![(Bytes::from("sku"), Bytes::from("A-42"))],
//! );
//! assert_eq!(entry.field("sku"), Some(&Bytes::from("A-42")));
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Identifier of an entry within a stream. Defaults to [`EntryId::MIN`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId {
    /// Millisecond timestamp part
    pub millis: u64,

    /// Sequence number within the millisecond
    pub sequence: u64,
}

impl EntryId {
    /// The smallest possible id (`0-0`). Reading "after" it yields the whole stream.
    pub const MIN: EntryId = EntryId {
        millis: 0,
        sequence: 0,
    };

    /// The largest possible id.
    pub const MAX: EntryId = EntryId {
        millis: u64::MAX,
        sequence: u64::MAX,
    };

    pub fn new(millis: u64, sequence: u64) -> Self {
        Self { millis, sequence }
    }

    /// The smallest id strictly greater than this one.
    ///
    /// Saturates at [`EntryId::MAX`].
    pub fn successor(&self) -> EntryId {
        if self.sequence < u64::MAX {
            EntryId::new(self.millis, self.sequence + 1)
        } else if self.millis < u64::MAX {
            EntryId::new(self.millis + 1, 0)
        } else {
            EntryId::MAX
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.sequence)
    }
}

impl FromStr for EntryId {
    type Err = Error;

    /// Parse `"<millis>-<sequence>"`, or `"<millis>"` with an implicit sequence of 0.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidEntryId(s.to_string());

        let (millis, sequence) = match s.split_once('-') {
            Some((millis, sequence)) => (millis, sequence),
            None => (s, "0"),
        };

        let millis = millis.parse::<u64>().map_err(|_| invalid())?;
        let sequence = sequence.parse::<u64>().map_err(|_| invalid())?;

        Ok(EntryId::new(millis, sequence))
    }
}

impl TryFrom<String> for EntryId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<EntryId> for String {
    fn from(id: EntryId) -> Self {
        id.to_string()
    }
}

/// A single entry read from a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    /// Key of the stream this entry belongs to
    pub stream: String,

    /// Position of the entry within its stream
    pub id: EntryId,

    /// Field/value body, in append order
    pub fields: Vec<(Bytes, Bytes)>,
}

impl StreamEntry {
    pub fn new(stream: impl Into<String>, id: EntryId, fields: Vec<(Bytes, Bytes)>) -> Self {
        Self {
            stream: stream.into(),
            id,
            fields,
        }
    }

    /// Look up the first value stored under `name`.
    pub fn field(&self, name: impl AsRef<[u8]>) -> Option<&Bytes> {
        let name = name.as_ref();
        self.fields
            .iter()
            .find(|(field, _)| field.as_ref() == name)
            .map(|(_, value)| value)
    }

    /// Estimate the size of this entry in bytes
    pub fn estimated_size(&self) -> usize {
        16 + // id
        self.stream.len() +
        self.fields.iter().map(|(f, v)| f.len() + v.len()).sum::<usize>()
    }
}
