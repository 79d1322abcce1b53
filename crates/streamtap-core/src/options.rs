//! Read options shared by every read a subscription issues.
//!
//! Options are validated once at construction and are immutable afterwards.
//!
//! # Fields
//!
//! * `count` - Maximum entries returned per stream per read, `1..=MAX_COUNT`
//! * `block` - `None` for a non-blocking read, `Some(Duration::ZERO)` to block
//!   until data arrives, otherwise the longest time a read may wait
//! * `no_ack` - Consumer-group reads only: do not add delivered entries to the
//!   group's pending list
//!
//! # Examples
//!
//! ```ignore
//! let options = ReadOptions::builder()
//!     .count(10)
//!     .block(Duration::from_millis(500))
//!     .build()?;
//! ```

use std::time::Duration;

use crate::error::{Error, Result};

/// Upper bound accepted for `count`.
pub const MAX_COUNT: i64 = 1 << 29;

/// Default `count` used by [`ReadOptions::default`].
pub const DEFAULT_COUNT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadOptions {
    count: u32,
    block: Option<Duration>,
    no_ack: bool,
}

impl Default for ReadOptions {
    /// Non-blocking reads of up to 100 entries, acknowledged explicitly.
    fn default() -> Self {
        Self {
            count: DEFAULT_COUNT,
            block: None,
            no_ack: false,
        }
    }
}

impl ReadOptions {
    /// Create validated read options.
    ///
    /// # Arguments
    ///
    /// * `count` - Maximum entries per read
    /// * `block_millis` - `None` for non-blocking, `Some(0)` to block indefinitely
    /// * `no_ack` - Skip the pending list for consumer-group reads
    ///
    /// # Errors
    ///
    /// - `InvalidCount` if `count <= 0` or `count > MAX_COUNT`
    /// - `InvalidBlock` if `block_millis` is negative
    pub fn new(count: i64, block_millis: Option<i64>, no_ack: bool) -> Result<Self> {
        if count <= 0 || count > MAX_COUNT {
            return Err(Error::InvalidCount(count));
        }

        let block = match block_millis {
            Some(ms) if ms < 0 => return Err(Error::InvalidBlock(ms)),
            Some(ms) => Some(Duration::from_millis(ms as u64)),
            None => None,
        };

        Ok(Self {
            count: count as u32,
            block,
            no_ack,
        })
    }

    pub fn builder() -> ReadOptionsBuilder {
        ReadOptionsBuilder::new()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn block(&self) -> Option<Duration> {
        self.block
    }

    pub fn is_blocking(&self) -> bool {
        self.block.is_some()
    }

    /// True when reads wait until data arrives, however long that takes.
    pub fn blocks_indefinitely(&self) -> bool {
        self.block == Some(Duration::ZERO)
    }

    pub fn no_ack(&self) -> bool {
        self.no_ack
    }

    /// The same options with `count` lowered to `max` if it is larger.
    ///
    /// The result still asks for at least one entry.
    pub fn capped(&self, max: usize) -> ReadOptions {
        let max = u32::try_from(max).unwrap_or(u32::MAX).max(1);
        ReadOptions {
            count: self.count.min(max),
            ..*self
        }
    }
}

/// Builder for [`ReadOptions`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ReadOptionsBuilder {
    count: i64,
    block_millis: Option<i64>,
    no_ack: bool,
}

impl ReadOptionsBuilder {
    pub fn new() -> Self {
        Self {
            count: DEFAULT_COUNT as i64,
            block_millis: None,
            no_ack: false,
        }
    }

    pub fn count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }

    /// Block each read for up to `block`; `Duration::ZERO` blocks indefinitely.
    pub fn block(mut self, block: Duration) -> Self {
        self.block_millis = Some(i64::try_from(block.as_millis()).unwrap_or(i64::MAX));
        self
    }

    pub fn block_millis(mut self, millis: i64) -> Self {
        self.block_millis = Some(millis);
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.block_millis = None;
        self
    }

    pub fn no_ack(mut self, no_ack: bool) -> Self {
        self.no_ack = no_ack;
        self
    }

    pub fn build(self) -> Result<ReadOptions> {
        ReadOptions::new(self.count, self.block_millis, self.no_ack)
    }
}

impl Default for ReadOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ReadOptions::default();
        assert_eq!(options.count(), 100);
        assert_eq!(options.block(), None);
        assert!(!options.is_blocking());
        assert!(!options.no_ack());
    }

    #[test]
    fn test_count_bounds() {
        assert_eq!(ReadOptions::new(0, None, false), Err(Error::InvalidCount(0)));
        assert_eq!(ReadOptions::new(-5, None, false), Err(Error::InvalidCount(-5)));
        assert_eq!(
            ReadOptions::new(MAX_COUNT + 1, None, false),
            Err(Error::InvalidCount(MAX_COUNT + 1))
        );

        assert_eq!(ReadOptions::new(1, None, false).unwrap().count(), 1);
        assert_eq!(
            ReadOptions::new(MAX_COUNT, None, false).unwrap().count() as i64,
            MAX_COUNT
        );
    }

    #[test]
    fn test_negative_block_rejected() {
        assert_eq!(
            ReadOptions::new(10, Some(-1), false),
            Err(Error::InvalidBlock(-1))
        );
    }

    #[test]
    fn test_block_zero_is_indefinite() {
        let options = ReadOptions::new(10, Some(0), false).unwrap();
        assert!(options.is_blocking());
        assert!(options.blocks_indefinitely());
    }

    #[test]
    fn test_capped_lowers_count_only() {
        let options = ReadOptions::new(10, Some(500), true).unwrap();

        let capped = options.capped(3);
        assert_eq!(capped.count(), 3);
        assert_eq!(capped.block(), options.block());
        assert!(capped.no_ack());

        assert_eq!(options.capped(50).count(), 10);
        assert_eq!(options.capped(0).count(), 1);
    }

    #[test]
    fn test_builder() {
        let options = ReadOptions::builder()
            .count(25)
            .block(Duration::from_millis(750))
            .no_ack(true)
            .build()
            .unwrap();

        assert_eq!(options.count(), 25);
        assert_eq!(options.block(), Some(Duration::from_millis(750)));
        assert!(!options.blocks_indefinitely());
        assert!(options.no_ack());
    }

    #[test]
    fn test_builder_non_blocking_clears_block() {
        let options = ReadOptions::builder()
            .block_millis(100)
            .non_blocking()
            .build()
            .unwrap();
        assert_eq!(options.block(), None);
    }

    #[test]
    fn test_builder_validates() {
        assert!(ReadOptions::builder().count(0).build().is_err());
        assert!(ReadOptions::builder().block_millis(-20).build().is_err());
    }
}
