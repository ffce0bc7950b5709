/// The boot context, adopted as the idle process.
pub const IDLE_PID: u32 = 0;

pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;
/// Smallest stack `create_process` accepts.
pub const MIN_STACK_SIZE: usize = 256;
/// Stacks are handed to new processes 16-byte aligned.
pub const STACK_ALIGN: usize = 16;

/// IF set, plus bit 1 which is always one.
pub const INITIAL_EFLAGS: usize = 0x202;
