//! Control register access: CR0, CR2, CR3 and TLB invalidation.

use core::arch::asm;

const CR0_PAGING: u32 = 1 << 31;

/// Point CR3 at a page directory.
///
/// # Safety
///
/// `physical_addr` must be the 4 KiB aligned physical address of a page
/// directory that keeps the running code and stack mapped.
pub unsafe fn load_page_directory(physical_addr: u32) {
    asm!("mov cr3, {}", in(reg) physical_addr, options(nostack, preserves_flags));
}

/// Set CR0.PG.
///
/// # Safety
///
/// CR3 must already hold a usable directory.
pub unsafe fn enable_paging() {
    let mut cr0: u32;
    asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
    cr0 |= CR0_PAGING;
    asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags));
}

/// Linear address of the most recent page fault.
pub fn read_fault_address() -> u32 {
    let cr2: u32;
    unsafe {
        asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
    }
    cr2
}

pub fn invalidate_page(vaddr: u32) {
    unsafe {
        asm!("invlpg [{}]", in(reg) vaddr, options(nostack, preserves_flags));
    }
}
