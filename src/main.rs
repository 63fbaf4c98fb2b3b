#![no_std]
#![no_main]
#![feature(alloc_error_handler)]
#![allow(dead_code, static_mut_refs)]

extern crate alloc;

mod arch;
mod boot_info;
mod drivers;
mod errno;
mod fs;
mod irql;
mod memory;
mod panic;
mod sync;
mod syscall;
mod task;

use boot_info::BootInfo;

/// Ordered boot sequence: diagnostics, CPU setup, memory, VFS,
/// scheduler, then a handoff to the first user process or — if none
/// loads — the idle loop alone.
#[no_mangle]
pub extern "C" fn kernel_main(boot_info_addr: u32) -> ! {
    drivers::serial::init();
    serial_println!("");
    serial_println!("==============================");
    serial_println!("  anyos kernel");
    serial_println!("==============================");

    let boot_info = unsafe { &*(boot_info_addr as *const BootInfo) };
    if !boot_info.validate() {
        serial_println!("WARNING: BootInfo magic mismatch");
    } else {
        serial_println!("BootInfo validated (magic OK)");
    }
    let kstart = unsafe { core::ptr::addr_of!((*boot_info).kernel_phys_start).read_unaligned() };
    let kend = unsafe { core::ptr::addr_of!((*boot_info).kernel_phys_end).read_unaligned() };
    serial_println!("Kernel image {:#010x} - {:#010x}", kstart, kend);

    arch::x86::gdt::init();
    serial_println!("[OK] GDT initialized");

    arch::x86::idt::init();
    serial_println!("[OK] IDT initialized (exceptions, IRQ 32-47, int 0x80)");

    arch::x86::tss::init();
    serial_println!("[OK] TSS initialized");

    arch::x86::pic::init();
    serial_println!("[OK] PIC remapped (IRQ 0-15 -> INT 32-47)");

    memory::physical::init(boot_info);
    memory::virtual_mem::init();
    memory::heap::init();
    serial_println!("[OK] Physical/virtual memory and heap initialized");

    fs::vfs::init();

    task::scheduler::init();
    task::cleaner::init();
    serial_println!("[OK] Scheduler initialized");

    syscall::init();

    arch::x86::irq::register_irq(0, arch::x86::pit::irq_handler);
    arch::x86::pit::init();
    arch::x86::pic::unmask(0);
    serial_println!("[OK] PIT configured at {} Hz", arch::x86::pit::TICK_HZ);

    arch::hal::enable_interrupts();
    serial_println!("[OK] Interrupts enabled");

    match task::process::spawn_init("ram:/init") {
        Ok(pid) => serial_println!("[OK] init process spawned (PID {})", pid),
        Err(e) => serial_println!("[WARN] no init program at ram:/init (errno {}); idling", e),
    }

    serial_println!("anyos: boot complete, entering idle loop");
    loop {
        arch::hal::enable_interrupts();
        arch::hal::halt();
    }
}
