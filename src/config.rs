//! Sizing knobs for creating a region, grouped into one options struct
//! instead of a long positional argument list once more than a couple of
//! knobs are in play.

/// Sizing/capacity options for [`crate::ShmMap::init`] and
/// [`crate::ShmMap::create_or_open`].
///
/// `max_buckets = 0` derives the bucket count from `memory_size`
/// (`(memory_size/4)/8`); `max_free_blocks = 0` derives it from the
/// resolved bucket count.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    pub memory_size: usize,
    pub max_buckets: u32,
    pub max_free_blocks: u32,
}

impl CreateOptions {
    pub fn with_memory_size(memory_size: usize) -> Self {
        Self { memory_size, max_buckets: 0, max_free_blocks: 0 }
    }

    pub fn with_capacity(max_buckets: u32) -> Self {
        Self { memory_size: 0, max_buckets, max_free_blocks: 0 }
    }
}
