//! The map facade: owns a [`Region`] plus the process-shared lock, and
//! translates allocator/bucket-table outcomes into the closed [`MapError`]
//! set. Every operation takes the lock in the appropriate read/write mode
//! and never maps or unmaps memory while holding it, except during
//! `init`/`destroy` themselves.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::bucket::{self, FindResult};
use crate::config::CreateOptions;
use crate::error::{MapError, MapResult};
use crate::freelist;
use crate::record;
use crate::region::Region;

/// Snapshot of region sizing and occupancy, as reported by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapStat {
    pub memory_size: u64,
    pub max_buckets: u32,
    pub max_bucket_flags: u32,
    pub max_free_blocks: u32,
    pub num_free_blocks: u32,
    pub used_buckets: u32,
    pub used_bytes: u64,
    pub data_offset: u64,
    pub data_tail: u64,
}

/// A fixed-capacity, cross-process shared-memory hashmap.
///
/// One handle per process; multiple processes opening the same named
/// region get independent handles over the same underlying bytes and lock.
pub struct ShmMap {
    region: Region,
    closed: AtomicBool,
}

impl ShmMap {
    /// Create a fresh, anonymous region (shareable with `fork`ed children,
    /// not attachable by name from unrelated processes).
    pub fn init(options: CreateOptions) -> MapResult<Self> {
        let region = Region::create_anon(options.memory_size, options.max_buckets, options.max_free_blocks)?;
        Ok(ShmMap { region, closed: AtomicBool::new(false) })
    }

    /// Open (or create, if absent or mismatched) a named region that
    /// unrelated processes can attach to by the same name.
    pub fn create_or_open(name: &str, options: CreateOptions) -> MapResult<Self> {
        let region = Region::create_or_open_named(
            name,
            options.memory_size,
            options.max_buckets,
            options.max_free_blocks,
        )?;
        Ok(ShmMap { region, closed: AtomicBool::new(false) })
    }

    fn flags_base(&self) -> *const u8 {
        unsafe { self.region.base_ptr().add(self.region.header().bucket_flags_offset as usize) }
    }

    fn flags_base_mut(&self) -> *mut u8 {
        unsafe { self.region.base_mut_ptr().add(self.region.header().bucket_flags_offset as usize) }
    }

    fn buckets_base(&self) -> *const u8 {
        unsafe { self.region.base_ptr().add(self.region.header().buckets_offset as usize) }
    }

    fn buckets_base_mut(&self) -> *mut u8 {
        unsafe { self.region.base_mut_ptr().add(self.region.header().buckets_offset as usize) }
    }

    fn freelist_base_mut(&self) -> *mut u8 {
        unsafe { self.region.base_mut_ptr().add(self.region.header().freelist_offset as usize) }
    }

    unsafe fn set_bucket(&self, slot: u32, offset: u64) {
        let ptr = self.buckets_base_mut().add(slot as usize * 8) as *mut u64;
        *ptr = offset;
    }

    unsafe fn find(&self, key_hash: u64, key: &[u8]) -> FindResult {
        let max_buckets = self.region.header().max_buckets;
        bucket::find(self.buckets_base(), self.flags_base(), self.region.base_ptr(), max_buckets, key_hash, key)
    }

    /// Reserve space for a new record: tail allocation first, falling back
    /// to the freelist. Mutates `data_tail`/the freelist only on success,
    /// so a failed reservation leaves the region byte-for-byte unchanged.
    unsafe fn reserve_space(&self, required: u64) -> MapResult<u64> {
        let header = self.region.header_mut();
        if header.memory_size - header.data_tail >= required {
            let offset = header.data_tail;
            header.data_tail += required;
            return Ok(offset);
        }

        let offset = freelist::find_free_block(header, self.freelist_base_mut(), self.region.base_mut_ptr(), required);
        if offset == freelist::NOT_FOUND {
            Err(MapError::NoSpace)
        } else {
            Ok(offset)
        }
    }

    unsafe fn place_record(&self, offset: u64, slot: u32, key_hash: u64, key: &[u8], value: &[u8]) {
        record::write_record(self.region.base_mut_ptr(), offset, key_hash, key, value);
        self.set_bucket(slot, offset);
        bucket::set_used(self.flags_base_mut(), slot);
    }

    /// Insert or update `key` -> `value`.
    ///
    /// A different-size overwrite is atomic: the new record's destination
    /// (tail or a free block) is secured before the old record's space is
    /// freed, so a failed insert never leaves the key observably deleted.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> MapResult<()> {
        let lock = self.region.lock();
        log::trace!("insert: acquiring write lock");
        lock.write_lock();
        let result = unsafe { self.insert_inner(key, value) };
        lock.write_unlock();
        result
    }

    unsafe fn insert_inner(&self, key: &[u8], value: &[u8]) -> MapResult<()> {
        let key_hash = bucket::djb2_hash64(key);
        let max_buckets = self.region.header().max_buckets;

        let (slot, existing) = match self.find(key_hash, key) {
            FindResult::Found { slot, record_offset } => (slot, Some(record_offset)),
            FindResult::NotFound { insertion_slot } => {
                if insertion_slot == max_buckets {
                    return Err(MapError::NoEmptyBucket);
                }
                (insertion_slot, None)
            }
        };

        if let Some(existing_offset) = existing {
            let existing_header =
                &*(self.region.base_ptr().add(existing_offset as usize) as *const record::RecordHeader);

            if existing_header.value_size as usize == value.len() {
                record::overwrite_value(
                    self.region.base_mut_ptr(),
                    existing_offset,
                    existing_header.key_size,
                    value,
                );
                return Ok(());
            }

            let key_size = existing_header.key_size;

            if self.region.header().num_free_blocks == self.region.header().max_free_blocks {
                return Err(MapError::NoEmptyFreeBlock);
            }

            let required = record::footprint(key.len() as u32, value.len() as u32);
            let dest = self.reserve_space(required)?;

            let old_footprint = record::footprint(key_size, existing_header.value_size);
            let header = self.region.header_mut();
            freelist::add_free_block(
                header,
                self.freelist_base_mut(),
                self.region.base_mut_ptr(),
                existing_offset,
                old_footprint - 8,
            );

            self.place_record(dest, slot, key_hash, key, value);
            return Ok(());
        }

        let required = record::footprint(key.len() as u32, value.len() as u32);
        let dest = self.reserve_space(required)?;
        self.place_record(dest, slot, key_hash, key, value);
        Ok(())
    }

    /// Remove `key`. Returns `NOT_FOUND` if absent, mutating nothing.
    pub fn delete(&self, key: &[u8]) -> MapResult<()> {
        let lock = self.region.lock();
        lock.write_lock();
        let result = unsafe { self.delete_inner(key) };
        lock.write_unlock();
        result
    }

    unsafe fn delete_inner(&self, key: &[u8]) -> MapResult<()> {
        let key_hash = bucket::djb2_hash64(key);
        let (slot, offset) = match self.find(key_hash, key) {
            FindResult::Found { slot, record_offset } => (slot, record_offset),
            FindResult::NotFound { .. } => return Err(MapError::NotFound),
        };

        if self.region.header().num_free_blocks == self.region.header().max_free_blocks {
            return Err(MapError::NoEmptyFreeBlock);
        }

        let footprint = record::footprint_at(self.region.base_ptr(), offset);
        let header = self.region.header_mut();
        freelist::add_free_block(header, self.freelist_base_mut(), self.region.base_mut_ptr(), offset, footprint - 8);
        bucket::unset_used(self.flags_base_mut(), slot);
        Ok(())
    }

    /// Look up `key`, returning a copy of its value bytes.
    ///
    /// The copy is taken before the shared lock is released, which is the
    /// Rust expression of the reference implementation's "pointer valid
    /// only while the lock is held" contract.
    pub fn search(&self, key: &[u8]) -> MapResult<Vec<u8>> {
        let lock = self.region.lock();
        lock.read_lock();
        let result = unsafe {
            let key_hash = bucket::djb2_hash64(key);
            match self.find(key_hash, key) {
                FindResult::Found { record_offset, .. } => Ok(record::read_value(self.region.base_ptr(), record_offset)),
                FindResult::NotFound { .. } => Err(MapError::NotFound),
            }
        };
        lock.read_unlock();
        result
    }

    /// Snapshot sizing and occupancy counters.
    pub fn stat(&self) -> MapStat {
        let lock = self.region.lock();
        lock.read_lock();
        let header = self.region.header();
        let used_buckets = unsafe { bucket::count_used(self.flags_base(), header.max_bucket_flags) };
        let stat = MapStat {
            memory_size: header.memory_size,
            max_buckets: header.max_buckets,
            max_bucket_flags: header.max_bucket_flags,
            max_free_blocks: header.max_free_blocks,
            num_free_blocks: header.num_free_blocks,
            used_buckets,
            used_bytes: header.data_tail - header.data_offset,
            data_offset: header.data_offset,
            data_tail: header.data_tail,
        };
        lock.read_unlock();
        stat
    }

    /// Tear down the region: only the creating process may do this.
    ///
    /// A second call from the creator is an idempotent no-op reporting
    /// success. A call from any other process is rejected with
    /// [`MapError::NotOwner`] without touching the region.
    pub fn destroy(&self) -> MapResult<()> {
        if std::process::id() != self.region.header().creator_pid {
            log::debug!("destroy rejected: calling process does not own this region");
            return Err(MapError::NotOwner);
        }

        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        log::debug!("destroying region owned by this process");
        let lock = self.region.lock();
        lock.write_lock();
        let result = unsafe { self.region.unlink() };
        lock.write_unlock();
        // The lock object itself is only destroyed once released: destroying
        // a held `pthread_rwlock_t` and then unlocking the destroyed lock is
        // undefined behavior.
        unsafe { self.region.destroy_lock() };
        result.map_err(MapError::MapFailed)
    }
}

impl Drop for ShmMap {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if std::process::id() == self.region.header().creator_pid {
            let _ = self.destroy();
        }
        // Non-creator processes just let their local mmap(s) unmap via
        // `Region`'s own `Drop`; the shared region outlives this handle.
    }
}
