//! System call numbers, passed in eax.

pub const SYSCALL_MMAP: u32 = 0x5a;

/// Generic failure; an unknown call returns its negation in eax.
pub const EGENERAL: u32 = 1;
