//! Fixed-capacity, cross-process shared-memory hashmap engine.
//!
//! A single contiguous region — header, bucket-flags bitmap, bucket slot
//! array, freelist, and data arena — is mapped by every cooperating
//! process, with all intra-region references stored as byte offsets so the
//! bytes mean the same thing no matter where each process happens to map
//! them. A `pthread_rwlock` configured `PTHREAD_PROCESS_SHARED` and stored
//! outside the region serializes readers against the single writer.
//!
//! Keys and values are opaque byte strings; the engine does not interpret
//! either. There is no resize, no rehash, and no iteration — capacity is
//! fixed for the lifetime of the region.

#[cfg(unix)]
mod bucket;
#[cfg(unix)]
mod config;
#[cfg(unix)]
mod error;
#[cfg(unix)]
mod freelist;
#[cfg(unix)]
mod layout;
#[cfg(unix)]
mod lock;
#[cfg(unix)]
mod map;
#[cfg(unix)]
mod record;
#[cfg(unix)]
mod region;

#[cfg(unix)]
pub use config::CreateOptions;
#[cfg(unix)]
pub use error::{MapError, MapResult};
#[cfg(unix)]
pub use layout::{calc_required_memory_size, LayoutStat};
#[cfg(unix)]
pub use map::{MapStat, ShmMap};

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    // A fixed bucket count still needs a `memory_size` hint to size the
    // data arena: with `record_kv_size` unset (the only mode `init`/
    // `create_or_open` drive), an arena is only sized off `memory_size`.
    fn opts(max_buckets: u32) -> CreateOptions {
        CreateOptions { memory_size: 8192, max_buckets, max_free_blocks: 0 }
    }

    #[test]
    fn init_derives_bucket_count_from_memory_size() {
        let map = ShmMap::init(CreateOptions::with_memory_size(1000)).unwrap();
        let stat = map.stat();
        assert_eq!(stat.max_buckets, 31);
        assert_eq!(stat.max_free_blocks, 31);
    }

    #[test]
    fn basic_set_get_delete_roundtrip() {
        // Scenario 2 from the testable-properties section.
        let map = ShmMap::init(opts(16)).unwrap();
        map.insert(b"hello", b"world!").unwrap();
        assert_eq!(map.search(b"hello").unwrap(), b"world!");
        map.delete(b"hello").unwrap();
        assert!(matches!(map.search(b"hello"), Err(MapError::NotFound)));

        let stat = map.stat();
        assert_eq!(stat.used_buckets, 0);
        assert_eq!(stat.num_free_blocks, 1);
    }

    #[test]
    fn same_size_overwrite_does_not_touch_freelist() {
        // Scenario 3.
        let map = ShmMap::init(opts(16)).unwrap();
        map.insert(b"k", b"ab").unwrap();
        let before = map.stat().num_free_blocks;
        map.insert(b"k", b"cd").unwrap();
        assert_eq!(map.search(b"k").unwrap(), b"cd");
        assert_eq!(map.stat().num_free_blocks, before);
    }

    #[test]
    fn different_size_overwrite_grows_freelist_by_one() {
        // Scenario 4.
        let map = ShmMap::init(opts(16)).unwrap();
        map.insert(b"k", b"a").unwrap();
        let before = map.stat().num_free_blocks;
        map.insert(b"k", b"bbb").unwrap();
        assert_eq!(map.search(b"k").unwrap(), b"bbb");
        assert_eq!(map.stat().num_free_blocks, before + 1);
    }

    #[test]
    fn bucket_exhaustion_returns_no_empty_bucket() {
        // Scenario 5: with a tiny table, the (max_buckets+1)th distinct key
        // must fail once every slot is occupied.
        let map = ShmMap::init(opts(4)).unwrap();
        for i in 0..4u8 {
            map.insert(&[i], b"v").unwrap();
        }
        let err = map.insert(&[99u8], b"v").unwrap_err();
        assert!(matches!(err, MapError::NoEmptyBucket));
    }

    #[test]
    fn freelist_exhaustion_returns_no_empty_free_block() {
        // Scenario 6: max_free_blocks=1, insert two, delete both in order.
        let map = ShmMap::init(CreateOptions {
            memory_size: 8192,
            max_buckets: 8,
            max_free_blocks: 1,
        })
        .unwrap();
        map.insert(b"a", b"1").unwrap();
        map.insert(b"b", b"2").unwrap();

        map.delete(b"a").unwrap();
        assert_eq!(map.stat().num_free_blocks, 1);

        let err = map.delete(b"b").unwrap_err();
        assert!(matches!(err, MapError::NoEmptyFreeBlock));
    }

    #[test]
    fn deleting_missing_key_is_idempotent_and_mutates_nothing() {
        let map = ShmMap::init(opts(8)).unwrap();
        let before = map.stat();
        let err = map.delete(b"nope").unwrap_err();
        assert!(matches!(err, MapError::NotFound));
        assert_eq!(map.stat(), before);
    }

    #[test]
    fn search_never_inspects_more_than_max_buckets_slots() {
        // Filling the table to one below capacity and searching for a
        // never-inserted key must still terminate (not found) instead of
        // looping; this exercises the `insertion_slot == max_buckets`
        // "table full" sentinel path under a near-full table.
        let map = ShmMap::init(opts(8)).unwrap();
        for i in 0..7u8 {
            map.insert(&[i], b"v").unwrap();
        }
        assert!(matches!(map.search(b"absent"), Err(MapError::NotFound)));
    }

    #[test]
    fn space_is_reclaimed_after_delete_then_reinsert() {
        let map = ShmMap::init(opts(8)).unwrap();
        for i in 0..8u8 {
            map.insert(&[i], b"0123456789").unwrap();
        }
        for i in 0..8u8 {
            map.delete(&[i]).unwrap();
        }
        for i in 0..8u8 {
            map.insert(&[i], b"9876543210").unwrap();
        }
        for i in 0..8u8 {
            assert_eq!(map.search(&[i]).unwrap(), b"9876543210");
        }
    }

    #[test]
    fn second_destroy_from_creator_is_a_no_op_success() {
        let map = ShmMap::init(opts(8)).unwrap();
        map.destroy().unwrap();
        map.destroy().unwrap();
    }
}
