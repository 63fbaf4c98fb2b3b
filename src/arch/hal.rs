//! Hardware Abstraction Layer — platform-agnostic API over `arch::x86`.
//!
//! Cross-arch code (scheduler, memory, syscalls) should go through here
//! instead of reaching into `arch::x86` directly, in case a second
//! architecture is ever added.

/// Maximum number of CPUs supported. Only CPU 0 is brought up at boot;
/// a second CPU may be started later, but the scheduler treats this as
/// an optional bonus, not a requirement for correctness.
pub const MAX_CPUS: usize = 2;

/// Get the current CPU's ID.
#[inline]
pub fn cpu_id() -> usize {
    0
}

/// Number of online CPUs (at least 1).
#[inline]
pub fn cpu_count() -> usize {
    1
}

// The handful of functions below touch real x86 state (EFLAGS, CR3, HLT).
// Under `#[cfg(test)]` this crate is compiled for the host so pure-logic
// unit tests (IRQL ladder, semaphore bookkeeping, run queue ordering) can
// run without QEMU; host builds get software stand-ins that behave like a
// single-threaded CPU that always has interrupts enabled.

/// Enable interrupts on the current CPU.
#[inline]
#[cfg(all(target_arch = "x86", not(test)))]
pub fn enable_interrupts() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack)) };
}

/// Disable interrupts on the current CPU.
#[inline]
#[cfg(all(target_arch = "x86", not(test)))]
pub fn disable_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack)) };
}

/// Check if interrupts are enabled on the current CPU.
#[inline]
#[cfg(all(target_arch = "x86", not(test)))]
pub fn interrupts_enabled() -> bool {
    let eflags: u32;
    unsafe { core::arch::asm!("pushfd", "pop {0:e}", out(reg) eflags, options(nomem)) };
    eflags & 0x200 != 0
}

/// Save the current interrupt state and disable interrupts.
/// Returns an opaque value that must be passed to [`restore_interrupt_state`].
#[inline]
#[cfg(all(target_arch = "x86", not(test)))]
pub fn save_and_disable_interrupts() -> u32 {
    let eflags: u32;
    unsafe {
        core::arch::asm!("pushfd", "pop {0:e}", out(reg) eflags, options(nomem, preserves_flags));
        core::arch::asm!("cli", options(nomem, nostack, preserves_flags));
    }
    eflags
}

/// Restore interrupt state from a value returned by [`save_and_disable_interrupts`].
#[inline]
#[cfg(all(target_arch = "x86", not(test)))]
pub fn restore_interrupt_state(saved: u32) {
    if saved & 0x200 != 0 {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) };
    }
}

/// Halt the CPU until the next interrupt.
#[inline]
#[cfg(all(target_arch = "x86", not(test)))]
pub fn halt() {
    unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
}

#[cfg(any(not(target_arch = "x86"), test))]
mod host_stub {
    use core::sync::atomic::{AtomicBool, Ordering};
    static IF: AtomicBool = AtomicBool::new(true);

    pub fn enable_interrupts() {
        IF.store(true, Ordering::SeqCst);
    }
    pub fn disable_interrupts() {
        IF.store(false, Ordering::SeqCst);
    }
    pub fn interrupts_enabled() -> bool {
        IF.load(Ordering::SeqCst)
    }
    pub fn save_and_disable_interrupts() -> u32 {
        let prev = IF.swap(false, Ordering::SeqCst);
        if prev { 0x200 } else { 0 }
    }
    pub fn restore_interrupt_state(saved: u32) {
        IF.store(saved & 0x200 != 0, Ordering::SeqCst);
    }
    pub fn halt() {}
}
#[cfg(any(not(target_arch = "x86"), test))]
pub use host_stub::*;

/// Current PIT tick count (see [`crate::arch::x86::pit::TICK_HZ`]).
#[inline]
#[cfg(target_arch = "x86")]
pub fn timer_current_ticks() -> u32 {
    crate::arch::x86::pit::get_ticks()
}

/// PIT tick frequency in Hz.
#[inline]
#[cfg(target_arch = "x86")]
pub fn timer_frequency_hz() -> u64 {
    crate::arch::x86::pit::TICK_HZ as u64
}

/// Set the ring-0 stack pointer loaded by the CPU on a ring3->ring0 transition.
#[inline]
#[cfg(target_arch = "x86")]
pub fn set_kernel_stack(esp0: u32) {
    crate::arch::x86::tss::set_kernel_stack(esp0);
}

/// Send End-Of-Interrupt to the interrupt controller.
#[inline]
#[cfg(target_arch = "x86")]
pub fn irq_eoi(irq: u8) {
    crate::arch::x86::pic::send_eoi(irq);
}

/// Read CR3 (the current page directory base).
#[inline]
#[cfg(all(target_arch = "x86", not(test)))]
pub fn current_page_table() -> u32 {
    let cr3: u32;
    unsafe { core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nostack, nomem)) };
    cr3
}

/// Load CR3 with a new page directory base, flushing the TLB.
#[inline]
#[cfg(all(target_arch = "x86", not(test)))]
pub fn switch_page_table(phys_addr: u32) {
    unsafe { core::arch::asm!("mov cr3, {}", in(reg) phys_addr, options(nostack)) };
}

/// Invalidate a single TLB entry.
#[inline]
#[cfg(all(target_arch = "x86", not(test)))]
pub fn flush_tlb(vaddr: u32) {
    unsafe { core::arch::asm!("invlpg [{}]", in(reg) vaddr, options(nostack)) };
}

#[cfg(any(not(target_arch = "x86"), test))]
mod host_mem_stub {
    pub fn current_page_table() -> u32 {
        0
    }
    pub fn switch_page_table(_phys_addr: u32) {}
    pub fn flush_tlb(_vaddr: u32) {}
}
#[cfg(any(not(target_arch = "x86"), test))]
pub use host_mem_stub::*;

/// Architecture CPU context, re-exported for cross-module use.
pub use crate::task::context::{context_switch, CpuContext};
