//! Global Descriptor Table: flat 32-bit protected-mode segmentation.
//!
//! Five descriptors are enough for a flat memory model: null, kernel
//! code/data at ring 0, user code/data at ring 3, plus one TSS descriptor
//! used for ring3->ring0 stack switches on interrupt/syscall entry.

use core::mem::size_of;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

#[repr(C, packed)]
struct GdtDescriptor {
    limit: u16,
    base: u32,
}

pub const KERNEL_CODE_SEL: u16 = 0x08;
pub const KERNEL_DATA_SEL: u16 = 0x10;
pub const USER_CODE_SEL: u16 = 0x18 | 3;
pub const USER_DATA_SEL: u16 = 0x20 | 3;
pub const TSS_SEL: u16 = 0x28;

const NUM_ENTRIES: usize = 6;

static mut GDT: [GdtEntry; NUM_ENTRIES] = [GdtEntry {
    limit_low: 0,
    base_low: 0,
    base_mid: 0,
    access: 0,
    granularity: 0,
    base_high: 0,
}; NUM_ENTRIES];

fn make_entry(base: u32, limit: u32, access: u8, flags: u8) -> GdtEntry {
    GdtEntry {
        limit_low: (limit & 0xFFFF) as u16,
        base_low: (base & 0xFFFF) as u16,
        base_mid: ((base >> 16) & 0xFF) as u8,
        access,
        granularity: (((limit >> 16) & 0x0F) as u8) | (flags & 0xF0),
        base_high: ((base >> 24) & 0xFF) as u8,
    }
}

/// Install the TSS descriptor (entry 5, selector 0x28). `base`/`limit` point
/// at the single kernel TSS; called once from `tss::init`.
pub fn set_tss_entry(base: u32, limit: u32) {
    unsafe {
        // present, ring3-accessible, 32-bit available TSS (type 0x9)
        GDT[5] = make_entry(base, limit, 0xE9, 0x00);
    }
}

/// Clear the TSS descriptor's busy bit so `ltr` can reload it.
pub fn clear_tss_busy_bit() {
    unsafe {
        GDT[5].access &= !0x02;
    }
}

pub fn init() {
    unsafe {
        GDT[0] = make_entry(0, 0, 0, 0);
        // ring0 code: present, type 0x9A (code, readable), 4K granularity, 32-bit
        GDT[1] = make_entry(0, 0xFFFFF, 0x9A, 0xC0);
        // ring0 data: present, type 0x92 (data, writable)
        GDT[2] = make_entry(0, 0xFFFFF, 0x92, 0xC0);
        // ring3 code
        GDT[3] = make_entry(0, 0xFFFFF, 0xFA, 0xC0);
        // ring3 data
        GDT[4] = make_entry(0, 0xFFFFF, 0xF2, 0xC0);
        // TSS slot is filled in later by tss::init via set_tss_entry.
        GDT[5] = make_entry(0, 0, 0, 0);

        let descriptor = GdtDescriptor {
            limit: (size_of::<[GdtEntry; NUM_ENTRIES]>() - 1) as u16,
            base: GDT.as_ptr() as u32,
        };

        core::arch::asm!(
            "lgdt [{0}]",
            "mov ax, {1:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "push {2:e}",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            in(reg) &descriptor,
            in(reg) KERNEL_DATA_SEL,
            in(reg) KERNEL_CODE_SEL as u32,
            out("eax") _,
            options(nostack),
        );
    }

    crate::serial_println!("[OK] GDT initialized (flat 32-bit, 6 entries)");
}

/// Reload segment registers after the GDT base moves (unused on a single
/// static table but kept for symmetry with the reload-on-AP-bringup path).
pub fn reload() {
    init();
}
