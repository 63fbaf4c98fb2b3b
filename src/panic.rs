//! Kernel panic taxonomy and handlers.
//!
//! A Rust-level `panic!` and a CPU fault taken in kernel mode both funnel
//! through here: both are unrecoverable from the kernel's point of view,
//! so both raise IRQL to [`crate::irql::IRQL_HIGH`], disable interrupts,
//! dump state to serial, and halt.

use core::panic::PanicInfo;

/// Reason a kernel-mode CPU fault was fatal. Built from the interrupt
/// vector taken in `idt::isr_handler`.
#[derive(Debug, Clone, Copy)]
pub enum PanicReason {
    DivideError,
    InvalidOpcode,
    DoubleFault,
    GeneralProtection,
    PageFault,
    UnhandledException(u8),
}

impl PanicReason {
    fn name(&self) -> &'static str {
        match self {
            PanicReason::DivideError => "divide error",
            PanicReason::InvalidOpcode => "invalid opcode",
            PanicReason::DoubleFault => "double fault",
            PanicReason::GeneralProtection => "general protection fault",
            PanicReason::PageFault => "page fault",
            PanicReason::UnhandledException(_) => "unhandled exception",
        }
    }
}

fn enter_panic_mode() {
    crate::irql::raise_irql(crate::irql::IRQL_HIGH);
    crate::arch::hal::disable_interrupts();
    crate::drivers::serial::enter_panic_mode();
}

fn halt_forever() -> ! {
    loop {
        crate::arch::hal::halt();
    }
}

/// Fatal fault taken while executing kernel code: no thread to kill, no
/// user-mode boundary to blame. Prints the vector, faulting EIP, and an
/// extra diagnostic word (e.g. CR2 for a page fault) then halts.
pub fn kernel_fault(reason: PanicReason, eip: u32, extra: u32) -> ! {
    enter_panic_mode();
    crate::serial_println!("=== KERNEL FAULT ===");
    crate::serial_println!("reason: {} ({:?})", reason.name(), reason);
    crate::serial_println!("eip:    {:#010x}", eip);
    crate::serial_println!("extra:  {:#010x}", extra);
    if let Some(tid) = crate::task::scheduler::try_current_tid() {
        crate::serial_println!("thread: tid={}", tid);
    }
    halt_forever()
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    enter_panic_mode();
    crate::serial_println!("=== KERNEL PANIC ===");
    crate::serial_println!("{}", info);
    halt_forever()
}

#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    panic!("heap allocation failed: {:?}", layout);
}
