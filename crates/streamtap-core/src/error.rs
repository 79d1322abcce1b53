//! Error Types for StreamTap Core
//!
//! Every error in this crate is raised while *constructing* a value of the data
//! model, never while consuming a stream. They are reported synchronously to
//! whoever built the value.
//!
//! ## Error Categories
//!
//! ### Parse Errors
//! - `InvalidEntryId`: An entry id is not of the form `<millis>-<sequence>`
//! - `InvalidOffset`: A read offset token is neither `$`, `>`, `0` nor an entry id
//!
//! ### Validation Errors
//! - `InvalidCount`: Read `count` is not positive or exceeds [`MAX_COUNT`]
//! - `InvalidBlock`: Read `block` duration is negative
//! - `InvalidConsumer`: Consumer group or consumer name is empty
//!
//! ## Usage
//! All fallible constructors return `Result<T>`, aliased to `Result<T, Error>`.
//!
//! ```ignore
//! use streamtap_core::{ReadOptions, Error};
//!
//! match ReadOptions::new(0, None, false) {
//!     Err(Error::InvalidCount(count)) => eprintln!("bad count {}", count),
//!     _ => unreachable!(),
//! }
//! ```
//!
//! [`MAX_COUNT`]: crate::options::MAX_COUNT

use thiserror::Error;

use crate::options::MAX_COUNT;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Invalid entry id: '{0}'")]
    InvalidEntryId(String),

    #[error("Invalid read offset: '{0}'")]
    InvalidOffset(String),

    #[error("Invalid count {0}: must be between 1 and {MAX_COUNT}")]
    InvalidCount(i64),

    #[error("Invalid block duration {0}ms: must not be negative")]
    InvalidBlock(i64),

    #[error("Invalid consumer identity: {0}")]
    InvalidConsumer(String),
}

pub type Result<T> = std::result::Result<T, Error>;
