//! `#[repr(C)]` structures that live in shared memory (mmap).
//!
//! All structs use fixed-size fields and explicit padding so the layout is
//! identical across compilations and processes that map the same region.

use crate::error::{MapError, MapResult};

/// Magic bytes at the start of the header to validate a mapping on open.
pub const MAGIC: [u8; 8] = *b"SHMMAP01";

/// Bumped whenever the on-disk/on-mmap layout changes incompatibly.
pub const LAYOUT_VERSION: u32 = 1;

/// Size of the fixed header at the start of the region.
pub const HEADER_SIZE: usize = 128;

/// Size in bytes of one bucket slot (an arena offset).
pub const BUCKET_SLOT_SIZE: usize = 8;

/// Size in bytes of one freelist entry (an arena offset).
pub const FREE_ENTRY_SIZE: usize = 8;

/// Sentinel bucket-slot value meaning "never used".
pub const SLOT_EMPTY: u64 = 0;

/// Header lives at offset 0 of the region.
///
/// Fields are ordered u64-first to avoid implicit alignment padding in
/// `#[repr(C)]`.
#[repr(C)]
#[derive(Debug)]
pub struct Header {
    pub magic: [u8; 8],           // 0..8
    pub memory_size: u64,         // 8..16
    pub data_tail: u64,           // 16..24  (next unallocated byte, monotonic)
    pub bucket_flags_offset: u64, // 24..32
    pub buckets_offset: u64,      // 32..40
    pub freelist_offset: u64,     // 40..48
    pub data_offset: u64,         // 48..56

    pub layout_version: u32,   // 56..60
    pub max_buckets: u32,      // 60..64
    pub max_bucket_flags: u32, // 64..68 (number of u64 words in the bitmap)
    pub max_free_blocks: u32,  // 68..72
    pub num_free_blocks: u32,  // 72..76
    pub creator_pid: u32,      // 76..80 (ownership token for destroy)

    // Explicit padding to HEADER_SIZE: 128 - 80 = 48
    pub _pad: [u8; 48],
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

/// Result of [`calc_required_memory_size`]: the fully resolved layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutStat {
    pub memory_size: usize,
    pub max_buckets: u32,
    pub max_bucket_flags: u32,
    pub max_free_blocks: u32,
    pub bucket_flags_offset: usize,
    pub buckets_offset: usize,
    pub freelist_offset: usize,
    pub data_offset: usize,
    /// Advisory: size of one record's footprint, if derivable.
    pub record_size: usize,
    pub data_size: usize,
}

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

/// Compute the region layout for one of two sizing modes:
///
/// - by total `memory_size` (buckets derived from it when `max_buckets == 0`)
/// - by `max_buckets` plus an expected per-record key+value size
///   (`record_kv_size`), used to size the arena exactly
///
/// See the data model invariants: `max_bucket_flags = ceil(max_buckets/64)`,
/// `max_free_blocks` defaults to `max_buckets` when zero, and the final
/// memory size is rounded up to the header's natural alignment.
pub fn calc_required_memory_size(
    memory_size: usize,
    mut max_buckets: u32,
    mut max_free_blocks: u32,
    record_kv_size: usize,
) -> MapResult<LayoutStat> {
    if max_buckets == 0 {
        if memory_size == 0 {
            return Err(MapError::MemorySizeTooSmall);
        }
        max_buckets = ((memory_size / 4) / 8) as u32;
        if max_buckets == 0 {
            return Err(MapError::MemorySizeTooSmall);
        }
    }

    if max_free_blocks == 0 {
        max_free_blocks = max_buckets;
    }

    let max_bucket_flags = max_buckets.div_ceil(64);

    let bucket_flags_offset = HEADER_SIZE;
    let bucket_flags_size = max_bucket_flags as usize * 8;
    let buckets_offset = bucket_flags_offset + bucket_flags_size;
    let buckets_size = max_buckets as usize * BUCKET_SLOT_SIZE;
    let freelist_offset = buckets_offset + buckets_size;
    let freelist_size = max_free_blocks as usize * FREE_ENTRY_SIZE;
    let data_offset = freelist_offset + freelist_size;

    let fixed_overhead = data_offset;

    let (record_size, data_size) = if record_kv_size > 0 {
        let record_size = crate::record::RECORD_HEADER_SIZE + 2 + record_kv_size;
        (record_size, record_size * max_buckets as usize)
    } else if memory_size > 0 {
        let data_size = memory_size.saturating_sub(fixed_overhead);
        let record_size = data_size / (crate::record::RECORD_HEADER_SIZE + 2);
        (record_size, data_size)
    } else {
        (0, 0)
    };

    let total = fixed_overhead + data_size;
    let memory_size = align_up(total, std::mem::align_of::<Header>());

    Ok(LayoutStat {
        memory_size,
        max_buckets,
        max_bucket_flags,
        max_free_blocks,
        bucket_flags_offset,
        buckets_offset,
        freelist_offset,
        data_offset,
        record_size,
        data_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_bucket_count_from_memory_size() {
        // Scenario 1 in the testable-properties section: init(1000, 0, 0)
        // derives max_buckets = (1000/4)/8 = 31, and max_free_blocks mirrors it.
        let stat = calc_required_memory_size(1000, 0, 0, 0).unwrap();
        assert_eq!(stat.max_buckets, 31);
        assert_eq!(stat.max_free_blocks, 31);
        assert_eq!(stat.max_bucket_flags, 1); // ceil(31/64) == 1
    }

    #[test]
    fn zero_memory_and_zero_buckets_is_too_small() {
        let err = calc_required_memory_size(0, 0, 0, 0).unwrap_err();
        assert!(matches!(err, MapError::MemorySizeTooSmall));
    }

    #[test]
    fn explicit_record_kv_size_sizes_the_arena_exactly() {
        let stat = calc_required_memory_size(0, 16, 0, 32).unwrap();
        let expected_record_size = crate::record::RECORD_HEADER_SIZE + 2 + 32;
        assert_eq!(stat.record_size, expected_record_size);
        assert_eq!(stat.data_size, expected_record_size * 16);
    }

    #[test]
    fn memory_size_rounds_up_to_header_alignment() {
        let stat = calc_required_memory_size(1000, 0, 0, 0).unwrap();
        assert_eq!(stat.memory_size % std::mem::align_of::<Header>(), 0);
    }
}
