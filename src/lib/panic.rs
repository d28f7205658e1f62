// Panic handler
//
// Emits a single diagnostic report identifying the failure (location, message,
// heap/uptime snapshot) to the serial console, then reboots through
// `arch::x86_64::reset_cpu` - the same terminal primitive `lib::error::fatal`
// uses, so a Rust-level panic and an explicit invariant-violation call both
// end the same way (SPEC_FULL.md §7).

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Global panic state - prevents recursive panics
static PANICKING: AtomicBool = AtomicBool::new(false);

/// Panic counter for tracking multiple panics
static PANIC_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn panic_handler(info: &PanicInfo) -> ! {
    if PANICKING.swap(true, Ordering::SeqCst) {
        unsafe {
            crate::uart_print(b"\n!!! RECURSIVE PANIC !!!\n");
        }
        halt();
    }

    let panic_num = PANIC_COUNT.fetch_add(1, Ordering::SeqCst) + 1;

    disable_interrupts();

    print_panic_header(panic_num);
    print_panic_info(info);
    print_system_state();

    halt();
}

fn print_panic_header(panic_num: u64) {
    unsafe {
        crate::uart_print(b"\n");
        crate::uart_print(b"================================================================================\n");
        crate::uart_print(b"!!!                        KERNEL PANIC                                      !!!\n");
        crate::uart_print(b"================================================================================\n");

        if panic_num > 1 {
            let msg = alloc::format!("Panic #{}\n", panic_num);
            crate::uart_print(msg.as_bytes());
        }
        crate::uart_print(b"\n");
    }
}

fn print_panic_info(info: &PanicInfo) {
    unsafe {
        crate::uart_print(b"PANIC INFORMATION:\n");
        crate::uart_print(b"------------------\n");

        if let Some(location) = info.location() {
            let loc = alloc::format!("  Location: {}:{}:{}\n",
                location.file(), location.line(), location.column());
            crate::uart_print(loc.as_bytes());
        } else {
            crate::uart_print(b"  Location: <unknown>\n");
        }

        if let Some(payload) = info.payload().downcast_ref::<&str>() {
            let msg = alloc::format!("  Message:  {}\n", payload);
            crate::uart_print(msg.as_bytes());
        } else if let Some(payload) = info.payload().downcast_ref::<alloc::string::String>() {
            let msg = alloc::format!("  Message:  {}\n", payload);
            crate::uart_print(msg.as_bytes());
        } else {
            crate::uart_print(b"  Message:  <no message>\n");
        }

        crate::uart_print(b"\n");
    }
}

fn print_system_state() {
    unsafe {
        crate::uart_print(b"SYSTEM STATE:\n");
        crate::uart_print(b"-------------\n");

        let uptime_ms = crate::time_source::uptime_ms();
        let uptime_sec = uptime_ms / 1000;
        let msg = alloc::format!("  Uptime:       {} seconds ({} ms)\n", uptime_sec, uptime_ms);
        crate::uart_print(msg.as_bytes());

        {
            let stats = crate::heap::get_heap_stats();
            let current_kb = stats.current_allocated() / 1024;
            let peak_kb = stats.peak_allocated() / 1024;
            let allocs = stats.total_allocations();
            let deallocs = stats.total_deallocations();
            let failures = stats.allocation_failures();
            let msg = alloc::format!(
                "  Heap usage:   {} KB current, {} KB peak\n\
                 Allocations: {} allocs, {} deallocs, {} active\n\
                 Failures:    {}\n",
                current_kb, peak_kb, allocs, deallocs,
                allocs.saturating_sub(deallocs), failures
            );
            crate::uart_print(msg.as_bytes());
        }

        let build_info = crate::build_info::get_version_string();
        let msg = alloc::format!("  Version:      {}\n", build_info);
        crate::uart_print(msg.as_bytes());

        crate::uart_print(b"\n");
    }
}

#[inline(always)]
fn disable_interrupts() {
    unsafe {
        core::arch::asm!("cli");
    }
}

#[inline(always)]
fn halt() -> ! {
    unsafe {
        crate::uart_print(b"================================================================================\n");
        crate::uart_print(b"System halted. Rebooting...\n");
        crate::uart_print(b"================================================================================\n");
    }
    crate::lib::bootlog::flush();

    crate::arch::x86_64::reset_cpu();
}

pub fn get_panic_count() -> u64 {
    PANIC_COUNT.load(Ordering::Relaxed)
}

pub fn is_panicking() -> bool {
    PANICKING.load(Ordering::Relaxed)
}
