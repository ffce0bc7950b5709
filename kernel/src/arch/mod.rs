//! The privileged instructions the rest of the kernel relies on.
//!
//! On `target_arch = "x86"` these are the real instructions. Every other
//! target (in practice: the host running unit tests) gets inert stand-ins
//! so the memory and scheduling code can be exercised without hardware.

#[cfg(target_arch = "x86")]
pub mod x86;
#[cfg(target_arch = "x86")]
pub use x86::{
    disable_interrupts, enable_interrupts, enable_paging, halt, interrupts_enabled,
    invalidate_page, load_page_directory, read_fault_address, switch_context,
};

#[cfg(not(target_arch = "x86"))]
mod hosted;
#[cfg(not(target_arch = "x86"))]
pub use hosted::{
    disable_interrupts, enable_interrupts, enable_paging, halt, interrupts_enabled,
    invalidate_page, load_page_directory, read_fault_address, switch_context,
};

/// Executes a closure with interrupts disabled.
///
/// The previous interrupt flag is restored afterwards, so nested calls are fine.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let were_enabled = interrupts_enabled();
    if were_enabled {
        disable_interrupts();
    }

    let result = f();

    if were_enabled {
        enable_interrupts();
    }

    result
}
