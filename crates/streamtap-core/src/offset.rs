//! Stream offsets.
//!
//! A [`StreamOffset`] pairs a stream key with a [`ReadOffset`], the marker the
//! next read starts from. Offsets are owned by exactly one subscription and are
//! replaced (never mutated in place) each time a batch is accepted.
//!
//! ## Position Markers
//!
//! | Variant | Wire token | Meaning |
//! |---|---|---|
//! | `Latest` | `$` | Only entries appended after the read is issued |
//! | `Beginning` | `0-0` | Every entry in the stream |
//! | `After(id)` | `<id>` | Entries with an id strictly greater than `id` |
//! | `NextUndelivered` | `>` | Consumer groups only: entries never delivered to the group |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entry::EntryId;
use crate::error::{Error, Result};

/// Where in a stream the next read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReadOffset {
    Latest,
    Beginning,
    After(EntryId),
    NextUndelivered,
}

impl ReadOffset {
    /// Token understood by the log store for this marker.
    pub fn to_wire(&self) -> String {
        match self {
            ReadOffset::Latest => "$".to_string(),
            ReadOffset::Beginning => EntryId::MIN.to_string(),
            ReadOffset::After(id) => id.to_string(),
            ReadOffset::NextUndelivered => ">".to_string(),
        }
    }

    /// The offset to continue from once `last_accepted` has been delivered.
    ///
    /// `NextUndelivered` is a cursor held by the store on behalf of the group,
    /// so it stays in place.
    pub fn advance(&self, last_accepted: EntryId) -> ReadOffset {
        match self {
            ReadOffset::NextUndelivered => ReadOffset::NextUndelivered,
            _ => ReadOffset::After(last_accepted),
        }
    }

    /// Whether this marker is only meaningful for consumer-group reads.
    pub fn requires_group(&self) -> bool {
        matches!(self, ReadOffset::NextUndelivered)
    }

    /// Whether this marker can be used for consumer-group reads.
    pub fn allowed_for_group(&self) -> bool {
        !matches!(self, ReadOffset::Latest)
    }
}

impl fmt::Display for ReadOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

impl FromStr for ReadOffset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "$" => Ok(ReadOffset::Latest),
            ">" => Ok(ReadOffset::NextUndelivered),
            "0" | "0-0" => Ok(ReadOffset::Beginning),
            other => other
                .parse::<EntryId>()
                .map(ReadOffset::After)
                .map_err(|_| Error::InvalidOffset(other.to_string())),
        }
    }
}

impl TryFrom<String> for ReadOffset {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ReadOffset> for String {
    fn from(offset: ReadOffset) -> Self {
        offset.to_wire()
    }
}

/// A stream key together with the position to read it from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamOffset {
    pub stream: String,
    pub offset: ReadOffset,
}

impl StreamOffset {
    pub fn new(stream: impl Into<String>, offset: ReadOffset) -> Self {
        Self {
            stream: stream.into(),
            offset,
        }
    }

    /// Only entries appended from now on.
    pub fn latest(stream: impl Into<String>) -> Self {
        Self::new(stream, ReadOffset::Latest)
    }

    /// The whole stream.
    pub fn beginning(stream: impl Into<String>) -> Self {
        Self::new(stream, ReadOffset::Beginning)
    }

    /// Entries strictly after `id`.
    pub fn after(stream: impl Into<String>, id: EntryId) -> Self {
        Self::new(stream, ReadOffset::After(id))
    }

    /// Entries never delivered to the consumer group.
    pub fn next_undelivered(stream: impl Into<String>) -> Self {
        Self::new(stream, ReadOffset::NextUndelivered)
    }

    /// A copy of this offset advanced past `last_accepted`.
    pub fn advanced(&self, last_accepted: EntryId) -> Self {
        Self::new(self.stream.clone(), self.offset.advance(last_accepted))
    }
}

impl fmt::Display for StreamOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.stream, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_special_tokens() {
        assert_eq!("$".parse::<ReadOffset>().unwrap(), ReadOffset::Latest);
        assert_eq!(">".parse::<ReadOffset>().unwrap(), ReadOffset::NextUndelivered);
        assert_eq!("0".parse::<ReadOffset>().unwrap(), ReadOffset::Beginning);
        assert_eq!("0-0".parse::<ReadOffset>().unwrap(), ReadOffset::Beginning);
    }

    #[test]
    fn test_parse_entry_id() {
        assert_eq!(
            "17-3".parse::<ReadOffset>().unwrap(),
            ReadOffset::After(EntryId::new(17, 3))
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(
            "latest".parse::<ReadOffset>(),
            Err(Error::InvalidOffset("latest".to_string()))
        );
    }

    #[test]
    fn test_wire_tokens() {
        assert_eq!(ReadOffset::Latest.to_wire(), "$");
        assert_eq!(ReadOffset::Beginning.to_wire(), "0-0");
        assert_eq!(ReadOffset::NextUndelivered.to_wire(), ">");
        assert_eq!(ReadOffset::After(EntryId::new(9, 1)).to_wire(), "9-1");
    }

    #[test]
    fn test_advance_replaces_positional_markers() {
        let id = EntryId::new(100, 2);
        assert_eq!(ReadOffset::Latest.advance(id), ReadOffset::After(id));
        assert_eq!(ReadOffset::Beginning.advance(id), ReadOffset::After(id));
        assert_eq!(
            ReadOffset::After(EntryId::new(1, 0)).advance(id),
            ReadOffset::After(id)
        );
    }

    #[test]
    fn test_advance_keeps_group_cursor() {
        assert_eq!(
            ReadOffset::NextUndelivered.advance(EntryId::new(5, 5)),
            ReadOffset::NextUndelivered
        );
    }

    #[test]
    fn test_group_compatibility() {
        assert!(ReadOffset::NextUndelivered.requires_group());
        assert!(!ReadOffset::Beginning.requires_group());
        assert!(!ReadOffset::Latest.allowed_for_group());
        assert!(ReadOffset::After(EntryId::MIN).allowed_for_group());
    }

    #[test]
    fn test_stream_offset_advanced_keeps_stream() {
        let offset = StreamOffset::latest("orders");
        let next = offset.advanced(EntryId::new(3, 0));

        assert_eq!(next.stream, "orders");
        assert_eq!(next.offset, ReadOffset::After(EntryId::new(3, 0)));
        // source offset untouched
        assert_eq!(offset.offset, ReadOffset::Latest);
    }

    #[test]
    fn test_stream_offset_display() {
        assert_eq!(StreamOffset::beginning("s").to_string(), "s@0-0");
    }
}
