//! x86 (i386) architecture support.
//!
//! Provides GDT, IDT, TSS, the legacy 8259 PIC, the 8254 PIT, I/O port
//! access, and dynamic IRQ dispatch.

pub mod gdt;
pub mod idt;
pub mod irq;
pub mod pic;
pub mod pit;
pub mod port;
pub mod tss;
