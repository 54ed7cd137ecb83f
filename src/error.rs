//! Closed error taxonomy for every public map operation.

use thiserror::Error;

/// Result type returned by every public operation on [`crate::ShmMap`].
pub type MapResult<T> = Result<T, MapError>;

/// The closed set of outcomes a map operation can report.
///
/// `Ok(_)` stands in for the reference implementation's `OK` code; every
/// other code has a dedicated variant. `MapFailed`/`LockFailed` carry the
/// originating `io::Error` so the OS-level description survives into
/// `Display`/`source()`.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to create or map the shared region: {0}")]
    MapFailed(#[source] std::io::Error),

    #[error("failed to initialize or acquire the process-shared lock: {0}")]
    LockFailed(#[source] std::io::Error),

    #[error("requested memory size is too small to hold the required layout")]
    MemorySizeTooSmall,

    #[error("no contiguous tail space or free block large enough for this record")]
    NoSpace,

    #[error("bucket table is full; no empty or reusable slot available for this key")]
    NoEmptyBucket,

    #[error("freelist is full; this record's space cannot be reclaimed")]
    NoEmptyFreeBlock,

    #[error("key not found")]
    NotFound,

    /// Not one of the reference implementation's eight codes: this facade
    /// additionally rejects `destroy()` from any process other than the
    /// one that created the region.
    #[error("calling process does not own this region")]
    NotOwner,
}
