//! Cross-process read-write lock using POSIX `pthread_rwlock` with the
//! `PTHREAD_PROCESS_SHARED` attribute.
//!
//! Per the concurrency model, this lock object lives outside the data
//! region (in its own mmap) so it can be reasoned about independently of
//! the region's own lifecycle, while still being reachable by any process
//! that maps the same backing storage.

use std::io;

/// Size reserved for the lock.
/// `pthread_rwlock_t` is 56 bytes on x86_64 Linux, larger on some other
/// platforms; this over-allocates to be safe everywhere we build for.
pub const LOCK_SIZE: usize = 256;

/// A handle to a process-shared rwlock stored in shared memory.
pub struct ShmRwLock {
    lock_ptr: *mut libc::pthread_rwlock_t,
}

unsafe impl Send for ShmRwLock {}
unsafe impl Sync for ShmRwLock {}

impl ShmRwLock {
    /// Initialize a new rwlock at the given memory location.
    ///
    /// # Safety
    /// `ptr` must point to at least `LOCK_SIZE` bytes of shared, zeroed or
    /// otherwise uninitialized memory, and must remain valid and mapped for
    /// as long as any `ShmRwLock` built from it is used.
    pub unsafe fn init(ptr: *mut u8) -> io::Result<Self> {
        let lock_ptr = ptr as *mut libc::pthread_rwlock_t;

        let mut attr: libc::pthread_rwlockattr_t = std::mem::zeroed();
        let ret = libc::pthread_rwlockattr_init(&mut attr);
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }

        let ret = libc::pthread_rwlockattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
        if ret != 0 {
            libc::pthread_rwlockattr_destroy(&mut attr);
            return Err(io::Error::from_raw_os_error(ret));
        }

        let ret = libc::pthread_rwlock_init(lock_ptr, &attr);
        libc::pthread_rwlockattr_destroy(&mut attr);
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }

        Ok(ShmRwLock { lock_ptr })
    }

    /// Attach to an already-initialized rwlock at the given memory location.
    ///
    /// # Safety
    /// `ptr` must point to a previously initialized `pthread_rwlock_t` in
    /// memory mapped by the current process.
    pub unsafe fn from_existing(ptr: *mut u8) -> Self {
        ShmRwLock { lock_ptr: ptr as *mut libc::pthread_rwlock_t }
    }

    /// Acquire a read lock. Blocks until available.
    pub fn read_lock(&self) {
        unsafe {
            let ret = libc::pthread_rwlock_rdlock(self.lock_ptr);
            debug_assert_eq!(ret, 0, "pthread_rwlock_rdlock failed: {ret}");
        }
    }

    /// Release a read lock.
    pub fn read_unlock(&self) {
        unsafe {
            let ret = libc::pthread_rwlock_unlock(self.lock_ptr);
            debug_assert_eq!(ret, 0, "pthread_rwlock_unlock failed: {ret}");
        }
    }

    /// Acquire a write lock. Blocks until available.
    pub fn write_lock(&self) {
        unsafe {
            let ret = libc::pthread_rwlock_wrlock(self.lock_ptr);
            debug_assert_eq!(ret, 0, "pthread_rwlock_wrlock failed: {ret}");
        }
    }

    /// Release a write lock.
    pub fn write_unlock(&self) {
        unsafe {
            let ret = libc::pthread_rwlock_unlock(self.lock_ptr);
            debug_assert_eq!(ret, 0, "pthread_rwlock_unlock failed: {ret}");
        }
    }

    /// Destroy the rwlock. Only call when no other process can still reach
    /// it — see the ownership rules in the facade's `destroy()`.
    ///
    /// # Safety
    /// No other thread or process may be blocked in or about to call any
    /// other method on a lock built from the same memory.
    pub unsafe fn destroy(&self) {
        libc::pthread_rwlock_destroy(self.lock_ptr);
    }
}
