//! Kernel heap allocator.
//!
//! A single `linked_list_allocator` instance backing a statically reserved
//! region, wrapped in a stats-tracking `GlobalAlloc` so the panic handler
//! can read a live allocation snapshot.

use core::alloc::{GlobalAlloc, Layout};
use linked_list_allocator::LockedHeap;
use spin::Mutex;
use core::sync::atomic::{AtomicBool, Ordering};

/// Cache-aligned array wrapper for heap memory
#[repr(align(64))]
struct CacheAlignedArray([u8; HEAP_SIZE]);

static ALLOCATOR: LockedHeap = LockedHeap::empty();

pub struct HeapStats {
    total_allocations: usize,
    total_deallocations: usize,
    current_allocated: usize,
    peak_allocated: usize,
    allocation_failures: usize,
}

impl HeapStats {
    pub fn total_allocations(&self) -> usize { self.total_allocations }
    pub fn total_deallocations(&self) -> usize { self.total_deallocations }
    pub fn current_allocated(&self) -> usize { self.current_allocated }
    pub fn peak_allocated(&self) -> usize { self.peak_allocated }
    pub fn allocation_failures(&self) -> usize { self.allocation_failures }
}

static HEAP_STATS: Mutex<HeapStats> = Mutex::new(HeapStats {
    total_allocations: 0,
    total_deallocations: 0,
    current_allocated: 0,
    peak_allocated: 0,
    allocation_failures: 0,
});

const HEAP_SIZE: usize = 2 * 1024 * 1024; // 2 MiB, plenty for a handful of kernel threads

pub const fn heap_total_size() -> usize {
    HEAP_SIZE
}

static HEAP_INIT_DONE: AtomicBool = AtomicBool::new(false);

/// Initialize the kernel heap. Idempotent; safe to call once during boot.
pub fn init_heap() {
    if HEAP_INIT_DONE
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        unsafe {
            static mut HEAP_MEMORY: CacheAlignedArray = CacheAlignedArray([0; HEAP_SIZE]);
            let heap_arr_ptr = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut CacheAlignedArray;
            let heap_start = core::ptr::addr_of_mut!((*heap_arr_ptr).0) as *mut u8;
            ALLOCATOR.lock().init(heap_start, HEAP_SIZE);
        }
    }
}

pub struct StatsTrackingAllocator;

unsafe impl GlobalAlloc for StatsTrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = ALLOCATOR.alloc(layout);

        if !ptr.is_null() {
            let mut stats = HEAP_STATS.lock();
            stats.total_allocations += 1;
            stats.current_allocated += layout.size();
            if stats.current_allocated > stats.peak_allocated {
                stats.peak_allocated = stats.current_allocated;
            }
        } else {
            HEAP_STATS.lock().allocation_failures += 1;
        }

        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let mut stats = HEAP_STATS.lock();
        stats.total_deallocations += 1;
        stats.current_allocated = stats.current_allocated.saturating_sub(layout.size());
        drop(stats);

        ALLOCATOR.dealloc(ptr, layout);
    }
}

#[global_allocator]
static GLOBAL_ALLOC: StatsTrackingAllocator = StatsTrackingAllocator;

#[alloc_error_handler]
fn alloc_error_handler(layout: Layout) -> ! {
    unsafe {
        crate::uart_print(b"[HEAP] allocation error: size=");
        print_size(layout.size());
        crate::uart_print(b" align=");
        print_size(layout.align());
        crate::uart_print(b"\n");
        print_heap_stats();
    }
    loop {}
}

pub fn print_heap_stats() {
    let stats = HEAP_STATS.lock();
    unsafe {
        crate::uart_print(b"[HEAP] allocs=");
        print_number(stats.total_allocations);
        crate::uart_print(b" deallocs=");
        print_number(stats.total_deallocations);
        crate::uart_print(b" current=");
        print_size(stats.current_allocated);
        crate::uart_print(b" peak=");
        print_size(stats.peak_allocated);
        crate::uart_print(b" failures=");
        print_number(stats.allocation_failures);
        crate::uart_print(b"\n");
    }
}

pub fn get_heap_stats() -> HeapStats {
    let stats = HEAP_STATS.lock();
    HeapStats {
        total_allocations: stats.total_allocations,
        total_deallocations: stats.total_deallocations,
        current_allocated: stats.current_allocated,
        peak_allocated: stats.peak_allocated,
        allocation_failures: stats.allocation_failures,
    }
}

/// Bytes free right now: `heap_total_size() - current_allocated`.
pub fn current_free_heap() -> usize {
    heap_total_size() - HEAP_STATS.lock().current_allocated
}

/// Worst-case free heap ever observed: `heap_total_size() - peak_allocated`.
/// The heap-allocator analogue of [`crate::sched::absolute_free_stack`] -
/// both report a high-water mark rather than the instantaneous figure, so a
/// caller sizing the pool sees the tightest margin actually reached, not
/// just the margin at the moment it asks.
pub fn absolute_free_heap() -> usize {
    heap_total_size() - HEAP_STATS.lock().peak_allocated
}

unsafe fn print_number(mut num: usize) {
    if num == 0 {
        crate::uart_print(b"0");
        return;
    }
    let mut digits = [0u8; 20];
    let mut i = 0;
    while num > 0 {
        digits[i] = b'0' + (num % 10) as u8;
        num /= 10;
        i += 1;
    }
    while i > 0 {
        i -= 1;
        crate::uart_print(&[digits[i]]);
    }
}

unsafe fn print_size(size: usize) {
    if size >= 1024 * 1024 {
        print_number(size / (1024 * 1024));
        crate::uart_print(b" MiB");
    } else if size >= 1024 {
        print_number(size / 1024);
        crate::uart_print(b" KiB");
    } else {
        print_number(size);
        crate::uart_print(b" bytes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_total_size_is_two_mib() {
        assert_eq!(heap_total_size(), 2 * 1024 * 1024);
    }

    #[test]
    fn free_heap_figures_start_at_full_capacity() {
        // Each test binary shares the same global allocator and stats, so
        // this only holds before any allocation has happened on this thread;
        // assert the invariant the two figures must satisfy regardless.
        assert!(current_free_heap() <= heap_total_size());
        assert!(absolute_free_heap() <= current_free_heap());
    }
}
