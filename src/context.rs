//! Context Switch (CS): the `Platform` trait boundary the scheduler calls
//! through, and the x86_64 implementation.
//!
//! The scheduler never looks inside a [`Context`]; it only ever passes one to
//! [`Platform::switch_to`] or asks [`Platform::build_initial_context`] for a
//! fresh one. Conceptually the spec describes `save_context`/`restore_context`
//! as two operations, but on real hardware the stack-pointer swap between
//! them has to be a single atomic step (the outgoing thread's own stack is
//! what the "save" half writes into, and that write has to happen before its
//! `rsp` is abandoned) - so here both halves live in one asm routine,
//! `context_switch`, and `switch_to` is a thin safe wrapper around it.

/// Opaque saved-register-file handle. The only field a caller may touch is
/// the one that matters before the thread has ever run: nothing, since even
/// the initial context is built by [`Platform::build_initial_context`].
#[repr(C)]
pub struct Context {
    /// Saved stack pointer. Everything else lives on the thread's own stack.
    rsp: u64,
}

impl Context {
    /// A context that must never be switched into; used as a placeholder
    /// for the currently-running thread's outgoing slot before first use.
    pub const fn zeroed() -> Self {
        Self { rsp: 0 }
    }

    /// The stack pointer this context will resume at. Meaningless for the
    /// currently-running thread (its `Context` isn't updated until the next
    /// switch-out); used by the memory profiling API to measure how deep a
    /// non-running thread's stack is parked.
    pub fn saved_rsp(&self) -> u64 {
        self.rsp
    }
}

extern "C" {
    /// Saves the callee-saved register file and stack pointer of the calling
    /// context into `*old_rsp`, then loads `new_rsp` into `rsp` and restores
    /// the callee-saved registers that were pushed there by an earlier call
    /// to this same routine (or synthesized by [`build_initial_context`]).
    ///
    /// Does not touch caller-saved registers or flags beyond what the `ret`
    /// at the end implies; the System V ABI already requires the caller to
    /// have saved those around the call.
    fn context_switch(old_rsp: *mut u64, new_rsp: u64);
}

// `rflags` travels with the context too (via pushfq/popfq) so that each
// thread's own interrupt-enable state is restored along with its registers,
// rather than leaking whatever IF happened to be set when some other thread
// last switched out.
core::arch::global_asm!(
    ".global context_switch",
    "context_switch:",
    "pushfq",
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [rdi], rsp",
    "mov rsp, rsi",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "popfq",
    "ret",
);

core::arch::global_asm!(
    ".global thread_trampoline",
    "thread_trampoline:",
    // r12/r13 were placed here by build_initial_context and just came back
    // out of context_switch's pop sequence.
    "mov rdi, r12",
    "mov rsi, r13",
    "and rsp, -16",
    "call {launcher}",
    "ud2",
    launcher = sym thread_launcher_trampoline,
);

extern "C" {
    fn thread_trampoline();
}

/// Entry/argument pair threaded through a register-only handoff from the
/// synthesized initial stack frame into the real Rust launcher.
extern "C" fn thread_launcher_trampoline(entry: usize, arg: usize) -> ! {
    let entry: extern "C" fn(usize) -> usize = unsafe { core::mem::transmute(entry) };
    crate::thread::launch(entry, arg)
}

/// Platform boundary the scheduler is generic over. x86_64 is the only
/// implementation; aarch64/riscv64 are this trait's obvious extension
/// points and are intentionally not built here.
pub trait Platform {
    /// Builds the initial [`Context`] for a brand-new thread. Restoring it
    /// (via `switch_to`) begins execution of the thread launcher, which
    /// enables interrupts, calls `entry(arg)`, and on return marks the
    /// thread Terminated and yields forever.
    fn build_initial_context(stack_top: usize, entry: extern "C" fn(usize) -> usize, arg: usize) -> Context;

    /// Saves the outgoing context into `*outgoing` and restores `incoming`.
    /// Never returns into the caller directly - control resumes here only
    /// when some *other* thread later switches back into `outgoing`.
    ///
    /// # Safety
    /// `outgoing` must point at a `Context` that is safe to overwrite (i.e.
    /// genuinely the currently-running thread's slot), and `incoming` must
    /// have been produced by `build_initial_context` or by a previous save
    /// through this same function.
    unsafe fn switch_to(outgoing: *mut Context, incoming: *const Context);
}

pub struct X86_64;

impl Platform for X86_64 {
    fn build_initial_context(stack_top: usize, entry: extern "C" fn(usize) -> usize, arg: usize) -> Context {
        // `thread_trampoline` re-aligns rsp itself before `call`, so
        // `stack_top` need not be pre-aligned here.
        let mut sp = stack_top as u64;

        sp -= 8;
        unsafe { *(sp as *mut u64) = thread_trampoline as usize as u64 }; // return addr, popped by `ret`
        sp -= 8;
        unsafe { *(sp as *mut u64) = 0 }; // rbp
        sp -= 8;
        unsafe { *(sp as *mut u64) = 0 }; // rbx
        sp -= 8;
        unsafe { *(sp as *mut u64) = entry as usize as u64 }; // r12 <- entry fn ptr
        sp -= 8;
        unsafe { *(sp as *mut u64) = arg as u64 }; // r13 <- arg
        sp -= 8;
        unsafe { *(sp as *mut u64) = 0 }; // r14
        sp -= 8;
        unsafe { *(sp as *mut u64) = 0 }; // r15
        sp -= 8;
        unsafe { *(sp as *mut u64) = 0x202 }; // rflags: IF set, bit 1 reserved-on

        Context { rsp: sp }
    }

    unsafe fn switch_to(outgoing: *mut Context, incoming: *const Context) {
        let new_rsp = unsafe { (*incoming).rsp };
        unsafe { context_switch(&mut (*outgoing).rsp as *mut u64, new_rsp) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_context_has_null_rsp() {
        assert_eq!(Context::zeroed().rsp, 0);
    }
}
