//! System calls through `int 0x80`.
//!
//! The call number travels in eax and the arguments in ebx, ecx and edx. The
//! result is written back to eax, which the entry stub restores on return.

use core::fmt;

use crate::{
    constants::{
        idt::SYSCALL_VECTOR,
        syscalls::{EGENERAL, SYSCALL_MMAP},
    },
    interrupts,
    processes::registers::InterruptFrame,
};

pub mod mmap;

use self::mmap::{sys_mmap, MmapError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    Unknown(u32),
    Mmap(MmapError),
}

impl SyscallError {
    /// What the caller finds in eax: a null address for a failed mapping,
    /// `-EGENERAL` for anything else.
    pub fn return_value(&self) -> u32 {
        match self {
            SyscallError::Unknown(_) => EGENERAL.wrapping_neg(),
            SyscallError::Mmap(_) => 0,
        }
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyscallError::Unknown(number) => write!(f, "invalid syscall number {:#x}", number),
            SyscallError::Mmap(error) => write!(f, "mmap: {}", error),
        }
    }
}

pub fn dispatch_syscall(frame: &InterruptFrame) -> Result<u32, SyscallError> {
    match frame.eax {
        SYSCALL_MMAP => sys_mmap(frame.ebx, frame.ecx, frame.edx).map_err(SyscallError::Mmap),
        number => Err(SyscallError::Unknown(number)),
    }
}

fn syscall_handler(frame: &mut InterruptFrame) {
    frame.eax = match dispatch_syscall(frame) {
        Ok(value) => value,
        Err(error) => {
            log::warn!("{}", error);
            error.return_value()
        }
    };
}

pub fn init() {
    interrupts::register_handler(SYSCALL_VECTOR, syscall_handler);
    log::info!("System calls on vector {:#x}", SYSCALL_VECTOR);
}

/// Maps `length` bytes at `addr` with the given protection bits through
/// `int 0x80`. Returns `addr`, or null on failure.
#[cfg(target_arch = "x86")]
pub fn mmap(addr: u32, length: u32, prot: mmap::ProtFlags) -> *mut u8 {
    let result: u32;
    unsafe {
        // ebx may be reserved by the compiler, so it is swapped in by hand
        core::arch::asm!(
            "xchg ebx, {addr}",
            "int 0x80",
            "xchg ebx, {addr}",
            addr = inout(reg) addr => _,
            inlateout("eax") SYSCALL_MMAP => result,
            in("ecx") length,
            in("edx") prot.bits(),
        );
    }
    result as *mut u8
}
