//! Process memory snapshots.
//!
//! Allocation counters come from [`TrackingAllocator`], a thin wrapper over
//! the system allocator. A binary opts in with:
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: sinkbench_core::TrackingAllocator = sinkbench_core::TrackingAllocator;
//! ```
//!
//! Without it the allocation counters read zero. Reserved bytes come from the
//! kernel where available. The process has no tracing collector, so the
//! collection-cycle counter is always zero.

use std::alloc::{GlobalAlloc, Layout, System};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static ALLOCATED: AtomicU64 = AtomicU64::new(0);
static FREED: AtomicU64 = AtomicU64::new(0);

// ---------------------------------------------------------------------------
// Allocator
// ---------------------------------------------------------------------------

/// Counting wrapper around [`System`].
///
/// Tracks bytes handed out and bytes returned. A growing `realloc` counts the
/// growth as new allocation; a shrinking one counts the difference as freed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackingAllocator;

// SAFETY: every method forwards to `System` with the caller's arguments
// unchanged and only adds relaxed counter updates.
unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: caller upholds `GlobalAlloc::alloc` requirements.
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            ALLOCATED.fetch_add(layout.size() as u64, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // SAFETY: caller upholds `GlobalAlloc::alloc_zeroed` requirements.
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            ALLOCATED.fetch_add(layout.size() as u64, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: `ptr` was returned by this allocator with `layout`.
        unsafe { System.dealloc(ptr, layout) };
        FREED.fetch_add(layout.size() as u64, Ordering::Relaxed);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: caller upholds `GlobalAlloc::realloc` requirements.
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            let old_size = layout.size();
            if new_size > old_size {
                ALLOCATED.fetch_add((new_size - old_size) as u64, Ordering::Relaxed);
            } else {
                FREED.fetch_add((old_size - new_size) as u64, Ordering::Relaxed);
            }
        }
        new_ptr
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time memory counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Bytes currently allocated and not yet freed.
    pub alloc_bytes: u64,
    /// Bytes allocated since process start. Never decreases.
    pub total_alloc_bytes: u64,
    /// Address space reserved from the OS.
    pub sys_bytes: u64,
    /// Garbage-collection cycles.
    pub gc_cycles: u64,
}

impl MemorySnapshot {
    pub fn alloc_kib(&self) -> u64 {
        to_kib(self.alloc_bytes)
    }

    pub fn total_alloc_kib(&self) -> u64 {
        to_kib(self.total_alloc_bytes)
    }

    pub fn sys_kib(&self) -> u64 {
        to_kib(self.sys_bytes)
    }
}

impl fmt::Display for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Alloc = {} KiB\tTotalAlloc = {} KiB\tSys = {} KiB\tNumGC = {}",
            self.alloc_kib(),
            self.total_alloc_kib(),
            self.sys_kib(),
            self.gc_cycles
        )
    }
}

/// Whole kibibytes in `bytes`, rounded down.
pub fn to_kib(bytes: u64) -> u64 {
    bytes / 1024
}

/// Read the current counters. Never fails; unavailable values are zero.
pub fn sample() -> MemorySnapshot {
    // Freed first: a concurrent free between the two loads can then only
    // make `live` read high, never underflow.
    let freed = FREED.load(Ordering::Relaxed);
    let allocated = ALLOCATED.load(Ordering::Relaxed);
    MemorySnapshot {
        alloc_bytes: allocated.saturating_sub(freed),
        total_alloc_bytes: allocated,
        sys_bytes: reserved_bytes().unwrap_or(0),
        gc_cycles: 0,
    }
}

#[cfg(target_os = "linux")]
fn reserved_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().next()?.parse().ok()?;
    // SAFETY: `sysconf` is thread-safe for this query and has no side effects.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(pages * page_size as u64)
}

#[cfg(not(target_os = "linux"))]
fn reserved_bytes() -> Option<u64> {
    None
}
