//! Interrupt Descriptor Table (IDT) for 32-bit protected mode.
//!
//! 256 entries: CPU exceptions (ISR 0-31), legacy-PIC hardware IRQs
//! remapped to INT 32-47, and the `int 0x80` syscall trap gate (DPL 3).
//! Assembly stubs (`isrN`/`irqN`/`syscall_entry`) save the general-purpose
//! registers into an [`InterruptFrame`] and call into the handlers below.

use core::mem::size_of;

const IDT_ENTRIES: usize = 256;
const KERNEL_CODE_SEG: u16 = super::gdt::KERNEL_CODE_SEL;

/// 32-bit IDT entry (8 bytes).
#[repr(C, packed)]
#[derive(Copy, Clone)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

#[repr(C, packed)]
struct IdtDescriptor {
    limit: u16,
    base: u32,
}

const GATE_INTERRUPT: u8 = 0x8E;
const GATE_TRAP: u8 = 0x8F;
const GATE_TRAP_DPL3: u8 = 0xEF;

static mut IDT: [IdtEntry; IDT_ENTRIES] = [IdtEntry {
    offset_low: 0,
    selector: 0,
    zero: 0,
    type_attr: 0,
    offset_high: 0,
}; IDT_ENTRIES];

/// Register frame pushed by the assembly stubs before calling into Rust.
/// Matches the push order: general registers (via `pusha`-equivalent),
/// then `int_no`/`err_code`, then the CPU-pushed `eip/cs/eflags[/esp/ss]`.
#[repr(C)]
pub struct InterruptFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

fn set_gate(num: usize, handler: unsafe extern "C" fn(), selector: u16, type_attr: u8) {
    let handler = handler as *const () as u32;
    unsafe {
        IDT[num] = IdtEntry {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        };
    }
}

// Assembly stubs providing the raw entry points. Linked in from the
// assembly object referenced by the MERLON_ASM_OBJECTS build variable.
extern "C" {
    fn isr0();  fn isr1();  fn isr2();  fn isr3();
    fn isr4();  fn isr5();  fn isr6();  fn isr7();
    fn isr8();  fn isr9();  fn isr10(); fn isr11();
    fn isr12(); fn isr13(); fn isr14(); fn isr15();
    fn isr16(); fn isr17(); fn isr18(); fn isr19();
    fn isr20(); fn isr21(); fn isr22(); fn isr23();
    fn isr24(); fn isr25(); fn isr26(); fn isr27();
    fn isr28(); fn isr29(); fn isr30(); fn isr31();

    fn irq0();  fn irq1();  fn irq2();  fn irq3();
    fn irq4();  fn irq5();  fn irq6();  fn irq7();
    fn irq8();  fn irq9();  fn irq10(); fn irq11();
    fn irq12(); fn irq13(); fn irq14(); fn irq15();

    fn syscall_entry();
}

/// Populate the IDT with exception, IRQ, and syscall gates, then load via `lidt`.
pub fn init() {
    set_gate(0,  isr0 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(1,  isr1 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(2,  isr2 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(3,  isr3 , KERNEL_CODE_SEG, GATE_TRAP);
    set_gate(4,  isr4 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(5,  isr5 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(6,  isr6 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(7,  isr7 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(8,  isr8 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(9,  isr9 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(10, isr10, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(11, isr11, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(12, isr12, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(13, isr13, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(14, isr14, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(15, isr15, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(16, isr16, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(17, isr17, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(18, isr18, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(19, isr19, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(20, isr20, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(21, isr21, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(22, isr22, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(23, isr23, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(24, isr24, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(25, isr25, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(26, isr26, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(27, isr27, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(28, isr28, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(29, isr29, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(30, isr30, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(31, isr31, KERNEL_CODE_SEG, GATE_INTERRUPT);

    set_gate(32, irq0 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(33, irq1 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(34, irq2 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(35, irq3 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(36, irq4 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(37, irq5 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(38, irq6 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(39, irq7 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(40, irq8 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(41, irq9 , KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(42, irq10, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(43, irq11, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(44, irq12, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(45, irq13, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(46, irq14, KERNEL_CODE_SEG, GATE_INTERRUPT);
    set_gate(47, irq15, KERNEL_CODE_SEG, GATE_INTERRUPT);

    set_gate(0x80, syscall_entry, KERNEL_CODE_SEG, GATE_TRAP_DPL3);

    unsafe {
        let descriptor = IdtDescriptor {
            limit: (size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
            base: IDT.as_ptr() as u32,
        };
        core::arch::asm!("lidt [{0}]", in(reg) &descriptor, options(nostack));
    }

    crate::serial_println!("[OK] IDT initialized (256 entries, 32-bit)");
}

/// Page-fault error-code bits (Intel SDM vol 3, section 4.7).
const PF_PRESENT: u32 = 1 << 0;
const PF_WRITE: u32 = 1 << 1;
const PF_USER: u32 = 1 << 2;

/// CPU exception handler called from the assembly ISR stubs.
///
/// User-mode faults terminate the offending thread; kernel-mode faults
/// are unrecoverable and panic the kernel.
#[no_mangle]
pub extern "C" fn isr_handler(frame: &InterruptFrame) {
    let is_user_mode = frame.cs & 3 != 0;

    match frame.int_no {
        14 => {
            let cr2: u32;
            unsafe { core::arch::asm!("mov {}, cr2", out(reg) cr2) };
            let present = frame.err_code & PF_PRESENT != 0;
            let write = frame.err_code & PF_WRITE != 0;
            let user = frame.err_code & PF_USER != 0;

            if crate::memory::virtual_mem::handle_page_fault(cr2, present, write, user) {
                return;
            }

            if is_user_mode {
                crate::serial_println!(
                    "page fault: addr={:#010x} eip={:#010x} present={} write={} user={} — killing thread",
                    cr2, frame.eip, present, write, user
                );
                crate::task::scheduler::exit_current(crate::errno::SIGSEGV_EXIT);
                return;
            }

            crate::panic::kernel_fault(
                crate::panic::PanicReason::PageFault,
                frame.eip,
                cr2,
            );
        }
        0 => fatal_or_kill(frame, crate::panic::PanicReason::DivideError, 136),
        6 => fatal_or_kill(frame, crate::panic::PanicReason::InvalidOpcode, 132),
        8 => crate::panic::kernel_fault(crate::panic::PanicReason::DoubleFault, frame.eip, 0),
        13 => fatal_or_kill(frame, crate::panic::PanicReason::GeneralProtection, 139),
        _ => fatal_or_kill(frame, crate::panic::PanicReason::UnhandledException, 128 + frame.int_no as u8 as u32),
    }
}

fn fatal_or_kill(frame: &InterruptFrame, reason: crate::panic::PanicReason, exit_code: u32) {
    let is_user_mode = frame.cs & 3 != 0;
    if is_user_mode {
        crate::serial_println!("exception {:?} at eip={:#010x}: killing thread", reason, frame.eip);
        crate::task::scheduler::exit_current(exit_code);
        return;
    }
    crate::panic::kernel_fault(reason, frame.eip, 0);
}

/// Hardware IRQ dispatcher called from the assembly IRQ stubs.
/// Sends EOI before dispatching since a handler (the timer tick) may
/// invoke the scheduler and never return to this call site directly.
#[no_mangle]
pub extern "C" fn irq_handler(frame: &InterruptFrame) {
    let irq = (frame.int_no - 32) as u8;
    super::pic::send_eoi(irq);
    super::irq::dispatch_irq(irq);
}
