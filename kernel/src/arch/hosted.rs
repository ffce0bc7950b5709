use crate::processes::registers::ContextSwitch;

pub fn interrupts_enabled() -> bool {
    false
}

pub fn enable_interrupts() {}

pub fn disable_interrupts() {}

pub fn halt() {
    core::hint::spin_loop();
}

/// # Safety
///
/// No-op off x86.
pub unsafe fn load_page_directory(_physical_addr: u32) {}

/// # Safety
///
/// No-op off x86.
pub unsafe fn enable_paging() {}

pub fn read_fault_address() -> u32 {
    0
}

pub fn invalidate_page(_vaddr: u32) {}

/// # Safety
///
/// Never returns normally: there is no second stack to switch to.
pub unsafe fn switch_context(switch: &ContextSwitch) {
    panic!(
        "context switch to {:#x} needs x86 hardware",
        (*switch.load).stack_pointer
    );
}
