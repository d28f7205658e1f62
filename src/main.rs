#![no_std]
#![no_main]
#![feature(alloc_error_handler)]
#![cfg_attr(target_arch = "x86_64", feature(abi_x86_interrupt))]
// CI lint gate: when built with `--features strict`, fail on any warning
#![cfg_attr(feature = "strict", deny(warnings))]
#![cfg_attr(feature = "strict", deny(unsafe_op_in_unsafe_fn))]
// During early bringup, suppress warnings to keep logs clean
#![cfg_attr(all(feature = "bringup", not(feature = "strict")), allow(warnings))]

extern crate alloc;

#[allow(special_module_name)]
pub mod lib;

pub mod arch;
pub mod build_info;
pub mod channel;
pub mod context;
pub mod deepsleep;
pub mod heap;
pub mod log;
pub mod logger;
pub mod queue;
pub mod sched;
pub mod sync;
pub mod thread;
pub mod time_source;

#[cfg(test)]
mod tests;

use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;

use thread::DetachState;

#[allow(deprecated)]
static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.kernel_stack_size = 256 * 1024;
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

/// Thin wrapper so the rest of the tree (panic handler, heap, build info)
/// has a single serial sink regardless of what the bootloader handed us.
pub unsafe fn uart_print(msg: &[u8]) {
    arch::x86_64::serial::serial_write(msg);
}

fn kernel_main(_boot_info: &'static mut BootInfo) -> ! {
    unsafe {
        arch::x86_64::boot::early_init().unwrap_or_else(|e| {
            arch::x86_64::serial::serial_write(b"[BOOT] early_init failed: ");
            arch::x86_64::serial::serial_write(e.as_bytes());
            arch::x86_64::serial::serial_write(b"\n");
            lib::error::fatal("early_init failed");
        });
    }

    heap::init_heap();
    unsafe { uart_print(b"[BOOT] heap ready\n"); }

    let version = build_info::get_version_string();
    unsafe {
        uart_print(b"[BOOT] ");
        uart_print(version.as_bytes());
        uart_print(b"\n");
    }

    sched::init(idle_entry);
    unsafe { uart_print(b"[BOOT] scheduler ready\n"); }

    logger::LOGGER.start();
    thread::create(
        logger_producer_entry,
        0,
        thread::DEFAULT_STACK_SIZE,
        10,
        DetachState::Detached,
    );

    unsafe { uart_print(b"[BOOT] starting scheduler\n"); }
    sched::start();
}

/// Runs at the lowest possible priority; the Deep-Sleep Coordinator is
/// invoked here whenever the ready set is otherwise empty.
extern "C" fn idle_entry(_arg: usize) -> usize {
    loop {
        deepsleep::idle_hook(time_source::next_deadline());
    }
}

/// Demonstration producer for the Logger: a periodic "sensor" thread that
/// logs a fixed-size record every tick period, matching the shape of
/// scenario §8.2 (period/duration/record-size all configurable by a real
/// caller; here fixed to keep the demo self-contained).
extern "C" fn logger_producer_entry(_arg: usize) -> usize {
    let mut seq: u32 = 0;
    loop {
        if thread::test_terminate() {
            return 0;
        }
        let mut record = [0u8; 30];
        let msg = alloc::format!("sample #{:08}\n", seq);
        let bytes = msg.as_bytes();
        let n = bytes.len().min(record.len());
        record[..n].copy_from_slice(&bytes[..n]);
        let _ = logger::LOGGER.log(&record[..n]);
        seq = seq.wrapping_add(1);
        thread::sleep(2);
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    lib::panic::panic_handler(info)
}
