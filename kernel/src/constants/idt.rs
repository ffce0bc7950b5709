//! Interrupt vector assignments.

pub const PAGE_FAULT_VECTOR: u8 = 14;
/// Vectors below this are CPU exceptions.
pub const EXCEPTION_COUNT: u8 = 32;

/// The PICs are remapped so IRQ 0..15 land on vectors 32..47.
pub const IRQ_BASE: u8 = 32;
pub const IRQ_COUNT: u8 = 16;
pub const TIMER_VECTOR: u8 = IRQ_BASE;

/// `int 0x80` enters the kernel's system call dispatcher.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Size of the IDT. Only vectors with an entry stub get a present gate.
pub const IDT_GATES: usize = 256;
/// Vectors 0..48 have stubs in the contiguous stub table (exceptions, IRQs
/// and one spare).
pub const STUB_TABLE_LEN: usize = 49;
