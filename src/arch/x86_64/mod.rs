//! # x86_64 platform layer
//!
//! Everything the kernel core needs from one concrete architecture: early
//! boot (GDT/TSS/IDT/PIC/PIT/HPET/serial bring-up), the `Platform` trait
//! implementation used by the context switcher, and the IRQ sources that
//! feed the Time Source and Deep-Sleep Coordinator.
//!
//! This is deliberately narrower than a general-purpose kernel's arch layer:
//! no paging, no SYSCALL/SYSRET, no SMP, no ACPI power management. Those are
//! out of scope for a uniprocessor concurrency core (see `SPEC_FULL.md` §1).
//!
//! ## Module Organization
//!
//! - `cpu`: CPU feature detection and enablement (SSE2, NX, ...)
//! - `gdt` / `tss`: segment and privilege-transition setup
//! - `idt`: exception vectors and the IRQ dispatch trampoline
//! - `serial`: 16550 UART, used for the boot/error log sink
//! - `pic`: legacy 8259A PIC, routes the timer IRQ
//! - `pit`: Programmable Interval Timer - the Time Source's periodic tick
//! - `hpet`: High Precision Event Timer - the Deep-Sleep Coordinator's one-shot channel
//! - `tsc`: calibrated cycle counter, backs `now_ns`
//! - `trapframe` / `boot`: exception context layout and the early-init sequence

// Submodules
pub mod cpu;      // CPU initialization and features
pub mod gdt;      // Global Descriptor Table
pub mod idt;      // Interrupt Descriptor Table
pub mod tss;      // Task State Segment
pub mod serial;   // 16550 UART driver
pub mod boot;     // Boot sequence and early init

// Legacy 8259A PIC, used to route the timer IRQ that drives the scheduler tick
pub mod pic;
// Programmable Interval Timer - the Time Source's primary periodic tick
pub mod pit;
// High Precision Event Timer - one-shot channel the Deep-Sleep Coordinator re-arms
pub mod hpet;
// Time Stamp Counter, calibrated against PIT/HPET for sub-tick timestamps
pub mod tsc;
pub mod trapframe;

// Re-exports for common use
pub use cpu::*;
pub use gdt::init_gdt;
pub use idt::init_idt_early;
pub use tss::init_tss;
pub use serial::{init_serial, serial_write, serial_read};

use x86_64::instructions::interrupts;

/// Read Model-Specific Register
#[inline]
pub unsafe fn rdmsr(msr: u32) -> u64 {
    let (high, low): (u32, u32);
    core::arch::asm!(
        "rdmsr",
        in("ecx") msr,
        out("eax") low,
        out("edx") high,
        options(nomem, nostack, preserves_flags)
    );
    ((high as u64) << 32) | (low as u64)
}

/// Write Model-Specific Register
#[inline]
pub unsafe fn wrmsr(msr: u32, value: u64) {
    let low = value as u32;
    let high = (value >> 32) as u32;
    core::arch::asm!(
        "wrmsr",
        in("ecx") msr,
        in("eax") low,
        in("edx") high,
        options(nomem, nostack, preserves_flags)
    );
}

/// Halt the CPU until the next interrupt.
#[inline]
pub fn halt() {
    x86_64::instructions::hlt();
}

/// Halt the CPU forever with interrupts masked. Fallback for when
/// [`reset_cpu`] doesn't take.
#[inline]
pub fn halt_loop() -> ! {
    loop {
        interrupts::disable();
        halt();
    }
}

/// Resets the CPU by pulsing the 8042 keyboard controller's command port -
/// the standard no-ACPI x86 reset technique (SPEC_FULL.md §7: an invariant
/// violation "halts ... then reboots via the board-provided reset path").
/// Grounds the keyboard-controller method the teacher's own (unused-here)
/// `arch/x86_64/power.rs::system_reset` tries before falling back further to
/// a triple fault; this kernel has no ACPI reset register to try first, and
/// stops at the keyboard controller rather than also attempting a triple
/// fault, falling through to [`halt_loop`] if the pulse doesn't take.
pub fn reset_cpu() -> ! {
    interrupts::disable();
    unsafe {
        let mut kb_ctrl = x86_64::instructions::port::Port::<u8>::new(0x64);
        kb_ctrl.write(0xFEu8);
    }
    halt_loop()
}
