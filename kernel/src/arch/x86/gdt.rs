//! Flat segmentation: one ring 0 code and one ring 0 data segment over 4 GiB.

use core::arch::asm;

use super::DescriptorTablePointer;
use crate::constants::gdt::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};

static GDT: [u64; 3] = [
    0,
    // base 0, limit 0xFFFFF pages, present, ring 0, code, readable, 32-bit
    0x00CF_9A00_0000_FFFF,
    // same, data, writable
    0x00CF_9200_0000_FFFF,
];

/// Loads the GDT and reloads every segment register.
pub fn init() {
    let pointer = DescriptorTablePointer {
        limit: (core::mem::size_of_val(&GDT) - 1) as u16,
        base: GDT.as_ptr() as u32,
    };

    unsafe {
        asm!(
            "lgdt [{pointer}]",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            // far return to reload CS
            "push {code}",
            "lea {scratch}, [2f]",
            "push {scratch}",
            "retf",
            "2:",
            pointer = in(reg) &pointer,
            code = in(reg) u32::from(KERNEL_CODE_SELECTOR),
            scratch = out(reg) _,
            in("ax") KERNEL_DATA_SELECTOR,
        );
    }
    log::debug!("GDT loaded");
}
