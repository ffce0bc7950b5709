pub mod process;
pub mod registers;
pub mod scheduler;

pub use process::{Process, ProcessEntry, ProcessState};
pub use scheduler::{schedule, spawn, thread_exit, SchedulerError};

/// Adopts the boot context as the idle process.
pub fn init() {
    scheduler::init();
}
