//! Device drivers.
//!
//! Only the serial console is needed to bring the kernel up; drivers get their
//! memory from `memory::heap::kalloc`.

pub mod serial;

pub fn init() {
    serial::init();
}
