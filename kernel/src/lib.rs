#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "strict", deny(warnings))]
extern crate alloc;

pub mod arch;
pub mod boot;
pub mod constants;
pub mod devices;
pub mod interrupts;
pub mod logging;
pub mod memory;
pub mod processes;
pub mod sync;
pub mod syscalls;
pub mod timer;

pub use devices::serial;

pub mod prelude {
    pub use crate::debug_print;
    pub use crate::debug_println;
    pub use crate::serial_print;
    pub use crate::serial_println;
}

#[macro_export]
macro_rules! debug_print {
    ($($arg:tt)*) => {
        #[cfg(debug_assertions)]
        $crate::serial_print!($($arg)*);
    }
}

#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {
        #[cfg(debug_assertions)]
        $crate::serial_println!($($arg)*);
    }
}

/// What the idle process does once boot is over.
pub fn idle_loop() -> ! {
    arch::enable_interrupts();
    loop {
        arch::halt();
    }
}
