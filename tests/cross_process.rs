//! Cross-process visibility: a child process writes through a named region
//! and exits; the parent, holding its own independent handle to the same
//! region, observes the write after the child is gone.

#![cfg(unix)]

use shm_hashmap::{CreateOptions, ShmMap};

fn wait_for_child(pid: libc::pid_t) -> i32 {
    let mut status: i32 = 0;
    unsafe {
        libc::waitpid(pid, &mut status, 0);
    }
    status
}

#[test]
fn write_in_forked_child_is_visible_to_parent() {
    let dir = tempfile::tempdir().unwrap();
    // SAFETY: pre-fork, no other threads hold locks this crate owns.
    std::env::set_var("TMPDIR", dir.path());

    let name = "cross_process_visibility_test";
    let opts = CreateOptions { memory_size: 8192, max_buckets: 16, max_free_blocks: 0 };

    // Parent creates the region before forking so both processes agree on
    // its parameters from the start.
    let parent_map = ShmMap::create_or_open(name, opts).unwrap();

    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");

    if pid == 0 {
        // Child: open the same named region independently and write a key,
        // then exit without calling `destroy()` — only the creator may.
        let child_map = ShmMap::create_or_open(name, opts).unwrap();
        child_map.insert(b"from-child", b"hello-parent").unwrap();
        std::mem::forget(child_map); // child's Drop must not destroy the region
        unsafe { libc::_exit(0) };
    }

    let status = wait_for_child(pid);
    assert_eq!(status, 0, "child process did not exit cleanly");

    assert_eq!(parent_map.search(b"from-child").unwrap(), b"hello-parent");

    parent_map.destroy().unwrap();
}
