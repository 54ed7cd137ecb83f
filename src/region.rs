//! Shared memory region management: obtains the backing mapping (anonymous
//! or named/file-backed), lays out the header, and owns the process-shared
//! lock that lives alongside it in a second mapping.

use std::fs;
use std::io;
use std::path::PathBuf;

use memmap2::MmapMut;

use crate::error::{MapError, MapResult};
use crate::layout::{self, Header, LayoutStat, LAYOUT_VERSION, MAGIC};
use crate::lock::{ShmRwLock, LOCK_SIZE};

/// Where named regions' backing files live.
fn shm_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        PathBuf::from("/dev/shm")
    } else {
        std::env::temp_dir().join("shm_hashmap")
    }
}

enum Backing {
    Anonymous,
    Named { data_path: PathBuf, lock_path: PathBuf },
}

/// Owns the mmap(s) backing one region and exposes raw accessors to the
/// structures within. All intra-region references are byte offsets from
/// `base_ptr()`, never absolute addresses, so the same bytes are valid
/// regardless of where each process happens to map them.
pub struct Region {
    mmap: MmapMut,
    lock_mmap: MmapMut,
    backing: Backing,
}

impl Region {
    fn populate_header(mmap: &mut MmapMut, stat: &LayoutStat) {
        let header = unsafe { &mut *(mmap.as_mut_ptr() as *mut Header) };
        header.magic = MAGIC;
        header.layout_version = LAYOUT_VERSION;
        header.memory_size = stat.memory_size as u64;
        header.data_tail = stat.data_offset as u64;
        header.bucket_flags_offset = stat.bucket_flags_offset as u64;
        header.buckets_offset = stat.buckets_offset as u64;
        header.freelist_offset = stat.freelist_offset as u64;
        header.data_offset = stat.data_offset as u64;
        header.max_buckets = stat.max_buckets;
        header.max_bucket_flags = stat.max_bucket_flags;
        header.max_free_blocks = stat.max_free_blocks;
        header.num_free_blocks = 0;
        header.creator_pid = std::process::id();
    }

    /// Create a new anonymous, process-shared mapping (suitable for sharing
    /// with children via `fork`, not for unrelated processes to attach to
    /// by name — see [`Region::create_or_open_named`] for that).
    pub fn create_anon(memory_size: usize, max_buckets: u32, max_free_blocks: u32) -> MapResult<Self> {
        let stat = layout::calc_required_memory_size(memory_size, max_buckets, max_free_blocks, 0)?;
        if memory_size > 0 && memory_size < stat.memory_size {
            return Err(MapError::MemorySizeTooSmall);
        }

        log::debug!(
            "creating anonymous region: memory_size={} max_buckets={} max_free_blocks={}",
            stat.memory_size, stat.max_buckets, stat.max_free_blocks
        );

        let mut mmap = MmapMut::map_anon(stat.memory_size).map_err(MapError::MapFailed)?;
        let mut lock_mmap = MmapMut::map_anon(LOCK_SIZE).map_err(MapError::MapFailed)?;

        Self::populate_header(&mut mmap, &stat);
        unsafe {
            ShmRwLock::init(lock_mmap.as_mut_ptr()).map_err(MapError::LockFailed)?;
        }

        Ok(Region { mmap, lock_mmap, backing: Backing::Anonymous })
    }

    /// Create a brand-new named region, truncating any existing backing
    /// files at that name.
    fn create_named(name: &str, memory_size: usize, max_buckets: u32, max_free_blocks: u32) -> MapResult<Self> {
        let stat = layout::calc_required_memory_size(memory_size, max_buckets, max_free_blocks, 0)?;
        if memory_size > 0 && memory_size < stat.memory_size {
            return Err(MapError::MemorySizeTooSmall);
        }

        let dir = shm_dir();
        fs::create_dir_all(&dir).map_err(MapError::MapFailed)?;
        let data_path = dir.join(format!("{name}.data"));
        let lock_path = dir.join(format!("{name}.lock"));

        log::debug!("creating named region {name:?} at {data_path:?}");

        let data_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&data_path)
            .map_err(MapError::MapFailed)?;
        data_file.set_len(stat.memory_size as u64).map_err(MapError::MapFailed)?;

        let lock_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(MapError::MapFailed)?;
        lock_file.set_len(LOCK_SIZE as u64).map_err(MapError::MapFailed)?;

        let mut mmap = unsafe { MmapMut::map_mut(&data_file).map_err(MapError::MapFailed)? };
        let mut lock_mmap = unsafe { MmapMut::map_mut(&lock_file).map_err(MapError::MapFailed)? };
        mmap.fill(0);
        lock_mmap.fill(0);

        Self::populate_header(&mut mmap, &stat);
        unsafe {
            ShmRwLock::init(lock_mmap.as_mut_ptr()).map_err(MapError::LockFailed)?;
        }

        Ok(Region {
            mmap,
            lock_mmap,
            backing: Backing::Named { data_path, lock_path },
        })
    }

    fn open_named(name: &str) -> MapResult<Self> {
        let dir = shm_dir();
        let data_path = dir.join(format!("{name}.data"));
        let lock_path = dir.join(format!("{name}.lock"));

        let data_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&data_path)
            .map_err(MapError::MapFailed)?;
        let lock_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(MapError::MapFailed)?;

        let mmap = unsafe { MmapMut::map_mut(&data_file).map_err(MapError::MapFailed)? };
        let lock_mmap = unsafe { MmapMut::map_mut(&lock_file).map_err(MapError::MapFailed)? };

        let header = unsafe { &*(mmap.as_ptr() as *const Header) };
        if header.magic != MAGIC || header.layout_version != LAYOUT_VERSION {
            return Err(MapError::MapFailed(io::Error::new(
                io::ErrorKind::InvalidData,
                "region file has an incompatible layout or bad magic",
            )));
        }

        Ok(Region { mmap, lock_mmap, backing: Backing::Named { data_path, lock_path } })
    }

    /// Open an existing named region if one exists and its parameters
    /// match; otherwise create a fresh one. Mirrors the reference
    /// implementation's "parameter mismatch triggers recreate" policy.
    pub fn create_or_open_named(
        name: &str,
        memory_size: usize,
        max_buckets: u32,
        max_free_blocks: u32,
    ) -> MapResult<Self> {
        let dir = shm_dir();
        let data_path = dir.join(format!("{name}.data"));
        let lock_path = dir.join(format!("{name}.lock"));

        if data_path.exists() && lock_path.exists() {
            match Self::open_named(name) {
                Ok(region) => {
                    let stat = layout::calc_required_memory_size(memory_size, max_buckets, max_free_blocks, 0)?;
                    let header = region.header();
                    if header.max_buckets == stat.max_buckets && header.max_free_blocks == stat.max_free_blocks {
                        log::debug!("reusing existing named region {name:?}");
                        return Ok(region);
                    }
                    log::debug!("named region {name:?} parameters changed; recreating");
                }
                Err(_) => {
                    log::debug!("named region {name:?} stale or corrupt; recreating");
                }
            }
        }

        Self::create_named(name, memory_size, max_buckets, max_free_blocks)
    }

    pub fn header(&self) -> &Header {
        unsafe { &*(self.mmap.as_ptr() as *const Header) }
    }

    /// # Safety
    /// Caller must hold the write lock.
    pub unsafe fn header_mut(&self) -> &mut Header {
        &mut *(self.mmap.as_ptr() as *mut Header)
    }

    pub fn lock(&self) -> ShmRwLock {
        unsafe { ShmRwLock::from_existing(self.lock_mmap.as_ptr() as *mut u8) }
    }

    pub fn base_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    pub fn base_mut_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    /// Remove the backing files (named regions only). No-op on the data
    /// itself for anonymous regions beyond unmapping, which happens when
    /// `self.mmap`/`self.lock_mmap` drop. Does not touch the lock object —
    /// see [`Region::destroy_lock`], which must only be called after the
    /// lock has been released.
    ///
    /// # Safety
    /// Caller must hold the write lock and must guarantee no other process
    /// will attempt to lock or map this region again.
    pub unsafe fn unlink(&self) -> io::Result<()> {
        if let Backing::Named { data_path, lock_path } = &self.backing {
            let _ = fs::remove_file(data_path);
            let _ = fs::remove_file(lock_path);
        }
        Ok(())
    }

    /// Destroy the lock object. Must be called only after the caller has
    /// released it (never while holding it): destroying a held
    /// `pthread_rwlock_t` and then unlocking the destroyed lock is
    /// undefined behavior.
    ///
    /// # Safety
    /// Caller must hold no outstanding lock on this region and must
    /// guarantee no other process will attempt to lock it again.
    pub unsafe fn destroy_lock(&self) {
        self.lock().destroy();
    }
}
