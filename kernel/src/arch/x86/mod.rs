//! 32-bit protected mode primitives.

use core::arch::asm;

#[cfg(target_os = "none")]
mod boot;
pub mod context;
pub mod control;
pub mod gdt;
pub mod isr;
pub mod port;

pub use context::switch_context;
pub use control::{enable_paging, invalidate_page, load_page_directory, read_fault_address};

const EFLAGS_INTERRUPT_ENABLE: u32 = 1 << 9;

/// Operand of `lgdt` / `lidt`.
#[repr(C, packed)]
pub struct DescriptorTablePointer {
    pub limit: u16,
    pub base: u32,
}

pub fn interrupts_enabled() -> bool {
    let eflags: u32;
    unsafe {
        asm!("pushfd", "pop {}", out(reg) eflags, options(nomem, preserves_flags));
    }
    eflags & EFLAGS_INTERRUPT_ENABLE != 0
}

pub fn enable_interrupts() {
    unsafe {
        asm!("sti", options(nomem, nostack));
    }
}

pub fn disable_interrupts() {
    unsafe {
        asm!("cli", options(nomem, nostack));
    }
}

pub fn halt() {
    unsafe {
        asm!("hlt", options(nomem, nostack, preserves_flags));
    }
}

/// # Safety
///
/// `pointer` must describe a valid IDT that outlives its use by the CPU.
pub unsafe fn load_idt(pointer: &DescriptorTablePointer) {
    asm!("lidt [{}]", in(reg) pointer, options(readonly, nostack, preserves_flags));
}
