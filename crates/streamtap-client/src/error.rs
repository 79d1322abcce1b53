//! Error types for StreamTap client operations.
//!
//! Errors reach the application through two different paths:
//!
//! - **Synchronously**, as the `Err` of a call such as `subscribe()`:
//!   invalid read options, duplicate subscriptions, incompatible
//!   subscriptions, a container that is no longer running.
//! - **Asynchronously**, as the terminal item of a [`Flow`](crate::Flow): a read
//!   that failed while the subscription was being pulled. A flow that yields an
//!   error is finished; the engine does not reconnect it.
//!
//! `ClientError` is `Clone` because a single failed multi-stream read is
//! reported to every subscription that took part in it.
//!
//! ## Examples
//!
//! ```ignore
//! use streamtap_client::ClientError;
//!
//! match container.subscribe(StreamOffset::latest("orders"), options) {
//!     Ok(flow) => flow.request(10),
//!     Err(ClientError::DuplicateSubscription(stream)) => {
//!         eprintln!("'{}' is already being consumed", stream);
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::container::ContainerState;

/// Convenience type alias for `Result<T, ClientError>`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error type for StreamTap client operations.
///
/// ## Error Categories
///
/// - **Validation**: `Core`, `IncompatibleSubscription`
/// - **Registration**: `DuplicateSubscription`
/// - **Reads**: `ReadFailed`, `OperatorError`
/// - **Lifecycle**: `ContainerNotRunning`, `Timeout`
/// - **Configuration**: `ConfigError`
/// - **Unknown**: `Internal`
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// A value of the data model failed validation (read options, offsets,
    /// consumer identity).
    #[error(transparent)]
    Core(#[from] streamtap_core::Error),

    /// A live subscription already owns this stream key in a merged container.
    ///
    /// A merged read returns one copy of each entry, so two live subscribers
    /// to the same key cannot both be served. Dispose the existing flow before
    /// subscribing again.
    #[error("Stream '{0}' already has a live subscription")]
    DuplicateSubscription(String),

    /// The subscription cannot be served by this container.
    ///
    /// ## Causes
    /// - Merged container and read options differ from the container's options
    /// - Merged container and a consumer group was requested
    /// - `>` offset without a consumer group, or `$` with one
    #[error("Incompatible subscription: {0}")]
    IncompatibleSubscription(String),

    /// A read issued on behalf of the subscription failed.
    ///
    /// This is the terminal error a flow yields. `streams` lists every stream
    /// that took part in the failed read call.
    #[error("Read failed for [{streams}]: {message}")]
    ReadFailed { streams: String, message: String },

    /// The stream operator rejected a command.
    #[error("Stream operator error: {0}")]
    OperatorError(String),

    /// The container no longer accepts work.
    #[error("Container is not running (state: {0:?})")]
    ContainerNotRunning(ContainerState),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation exceeded configured timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Internal error that shouldn't normally occur.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Wrap an operator failure as the error delivered to subscribers of `streams`.
    pub fn read_failed<'a>(streams: impl IntoIterator<Item = &'a str>, cause: &ClientError) -> Self {
        let streams = streams.into_iter().collect::<Vec<_>>().join(", ");
        let message = match cause {
            ClientError::OperatorError(message) => message.clone(),
            other => other.to_string(),
        };
        ClientError::ReadFailed { streams, message }
    }
}
