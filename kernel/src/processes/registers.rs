use core::fmt;

use crate::constants::processes::INITIAL_EFLAGS;

/// What the context switch routine leaves on a suspended stack.
///
/// Lowest address first: the four callee-saved registers, EFLAGS, then the
/// address `ret` resumes at. A fresh process gets a synthetic frame whose
/// `eip` is its entry point and whose `return_address` is where the entry
/// function returns to when it finishes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SwitchFrame {
    pub edi: usize,
    pub esi: usize,
    pub ebx: usize,
    pub ebp: usize,
    pub eflags: usize,
    pub eip: usize,
    pub return_address: usize,
}

impl SwitchFrame {
    /// The frame a process starts from: registers zeroed, interrupts on.
    pub const fn bootstrap(entry: usize, exit: usize) -> Self {
        Self {
            edi: 0,
            esi: 0,
            ebx: 0,
            ebp: 0,
            eflags: INITIAL_EFLAGS,
            eip: entry,
            return_address: exit,
        }
    }
}

/// Saved execution state of a process that is not running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Context {
    pub stack_pointer: usize,
}

/// A switch decided by the scheduler and carried out by the architecture
/// code once the scheduler lock has been released.
#[derive(Debug)]
pub struct ContextSwitch {
    pub save: *mut Context,
    pub load: *const Context,
}

/// Register image pushed by the interrupt entry stubs, lowest address first.
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct InterruptFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

impl InterruptFrame {
    pub fn new(vector: u8, error_code: u32) -> Self {
        Self {
            vector: u32::from(vector),
            error_code,
            ..Self::default()
        }
    }
}

impl fmt::Debug for InterruptFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut ds = f.debug_struct("InterruptFrame");

        ds.field("vector", &self.vector)
            .field("error_code", &format_args!("{:#x}", self.error_code))
            .field("eip", &format_args!("{:#010x}", self.eip))
            .field("cs", &format_args!("{:#06x}", self.cs))
            .field("eflags", &format_args!("{:#010x}", self.eflags))
            .field("eax", &format_args!("{:#010x}", self.eax))
            .field("ebx", &format_args!("{:#010x}", self.ebx))
            .field("ecx", &format_args!("{:#010x}", self.ecx))
            .field("edx", &format_args!("{:#010x}", self.edx))
            .field("esi", &format_args!("{:#010x}", self.esi))
            .field("edi", &format_args!("{:#010x}", self.edi))
            .field("ebp", &format_args!("{:#010x}", self.ebp))
            .field("esp", &format_args!("{:#010x}", self.esp));

        ds.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn switch_frame_matches_pop_order() {
        let word = size_of::<usize>();
        assert_eq!(offset_of!(SwitchFrame, edi), 0);
        assert_eq!(offset_of!(SwitchFrame, esi), word);
        assert_eq!(offset_of!(SwitchFrame, ebx), 2 * word);
        assert_eq!(offset_of!(SwitchFrame, ebp), 3 * word);
        assert_eq!(offset_of!(SwitchFrame, eflags), 4 * word);
        assert_eq!(offset_of!(SwitchFrame, eip), 5 * word);
        assert_eq!(offset_of!(SwitchFrame, return_address), 6 * word);
    }

    #[test]
    fn interrupt_frame_matches_stub_layout() {
        assert_eq!(offset_of!(InterruptFrame, edi), 0);
        assert_eq!(offset_of!(InterruptFrame, eax), 28);
        assert_eq!(offset_of!(InterruptFrame, vector), 32);
        assert_eq!(offset_of!(InterruptFrame, error_code), 36);
        assert_eq!(offset_of!(InterruptFrame, eip), 40);
        assert_eq!(size_of::<InterruptFrame>(), 52);
    }

    #[test]
    fn bootstrap_frame_enables_interrupts() {
        let frame = SwitchFrame::bootstrap(0x1000, 0x2000);
        assert_eq!(frame.eflags, 0x202);
        assert_eq!(frame.eip, 0x1000);
        assert_eq!(frame.return_address, 0x2000);
        assert_eq!((frame.edi, frame.esi, frame.ebx, frame.ebp), (0, 0, 0, 0));
    }
}
