//! Error kinds surfaced by this crate (§7).

use thiserror::Error;

/// Everything that can go wrong using a [`crate::Comm`].
///
/// Transient backpressure (a send group's per-peer slot running out of room) is not an
/// error: `send` just blocks through a flush and retries.
#[derive(Debug, Error)]
pub enum CommError {
    /// The comm handle could not be constructed: the send window failed to map, the
    /// background flusher thread failed to spawn, or the supplied configuration was
    /// internally inconsistent in a way `Config::validate` could not catch up front.
    #[error("failed to initialize the comm handle: {0}")]
    FatalInitFailure(String),

    /// A transport collective (`all_to_all_counts`, `all_to_all_v`, `all_reduce_sum`,
    /// `barrier`) returned an error or the background flusher thread panicked.
    #[error("transport collective failed: {0}")]
    FatalTransportFailure(String),

    /// An argument passed to this crate's API was out of range or otherwise invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
