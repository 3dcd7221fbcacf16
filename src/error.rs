use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by [`crate::transfer::MultiSourceStream`] and its worker.
///
/// Network-level failures on a single source are absorbed by the retry loop
/// and by source switching; only the terminal conditions below reach the
/// consumer.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// Every candidate source was exhausted or at capacity.
    #[error("no usable source for product {product}")]
    SourceUnavailable { product: Uuid },

    /// The underlying stream ended before the declared size was reached and
    /// no further source switch is possible.
    #[error("incomplete transfer: {transferred}/{declared} bytes")]
    IncompleteTransfer { transferred: u64, declared: u64 },

    /// More bytes were delivered than the product declares. Never retried.
    #[error("Too much bytes read: {transferred}/{declared}")]
    OversizedTransfer { transferred: u64, declared: u64 },

    /// Digest over the delivered bytes does not match the product checksum.
    #[error("checksum mismatch for product {product}: expected {expected}, got {computed}")]
    ChecksumMismatch {
        product: Uuid,
        expected: String,
        computed: String,
    },

    /// The consumer was cancelled mid-read.
    #[error("transfer interrupted")]
    InterruptedTransfer,

    /// The product declares a checksum with an algorithm this build cannot
    /// compute.
    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedChecksum(String),
}

/// Errors surfaced synchronously by [`crate::store::FetchQuotaGate::fetch`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// The per-user cap on concurrent outstanding fetches was reached.
    #[error("quota exceeded: at most {max} concurrent fetches allowed, rejected {resource}")]
    QuotaExceeded { max: usize, resource: String },

    /// No user could be resolved for the request; quota cannot be attributed.
    #[error("no user context for fetch request")]
    NoUserContext,

    /// Propagated verbatim from the archive-backed store.
    #[error("store failure: {0}")]
    UnderlyingStoreFailure(#[source] anyhow::Error),
}
