use alloc::{boxed::Box, vec::Vec};
use core::{
    fmt,
    mem::size_of,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::{
    constants::processes::{IDLE_PID, MIN_STACK_SIZE, STACK_ALIGN},
    processes::{
        registers::{Context, SwitchFrame},
        scheduler::{self, SchedulerError},
    },
};

// process counter must be thread-safe
static NEXT_PID: AtomicU32 = AtomicU32::new(IDLE_PID + 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    New,
    Ready,
    Running,
    Blocked,
    Zombie,
}

/// Entry point of a kernel process. Returning from it exits the process.
pub type ProcessEntry = extern "C" fn();

pub struct Process {
    pid: u32,
    pub(crate) state: ProcessState,
    pub(crate) context: Context,
    /// Empty for the idle process, which runs on the boot stack.
    stack: Box<[usize]>,
    entry: Option<ProcessEntry>,
}

impl Process {
    /// Builds a process whose first switch-in lands on `entry`.
    ///
    /// The stack is seeded with a [`SwitchFrame`] so the ordinary restore path
    /// starts the process; when `entry` returns it falls into
    /// [`process_exit_trampoline`].
    pub fn new(entry: ProcessEntry, stack_size: usize) -> Result<Box<Process>, SchedulerError> {
        if stack_size < MIN_STACK_SIZE {
            return Err(SchedulerError::StackTooSmall(stack_size));
        }

        let words = stack_size.div_ceil(size_of::<usize>());
        let mut stack = Vec::new();
        stack
            .try_reserve_exact(words)
            .map_err(|_| SchedulerError::OutOfMemory)?;
        stack.resize(words, 0);
        let mut stack = stack.into_boxed_slice();

        let frame = SwitchFrame::bootstrap(entry as usize, process_exit_trampoline as usize);
        let stack_pointer = unsafe {
            let base = stack.as_mut_ptr().cast::<u8>();
            let top = (base as usize + words * size_of::<usize>()) & !(STACK_ALIGN - 1);
            let frame_ptr = base
                .add(top - size_of::<SwitchFrame>() - base as usize)
                .cast::<SwitchFrame>();
            frame_ptr.write(frame);
            frame_ptr as usize
        };

        Ok(Box::new(Process {
            pid: NEXT_PID.fetch_add(1, Ordering::SeqCst),
            state: ProcessState::New,
            context: Context { stack_pointer },
            stack,
            entry: Some(entry),
        }))
    }

    /// The context that is already running when the scheduler starts.
    pub(crate) fn idle() -> Box<Process> {
        Box::new(Process {
            pid: IDLE_PID,
            state: ProcessState::Running,
            context: Context::default(),
            stack: Box::new([]),
            entry: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn is_idle(&self) -> bool {
        self.pid == IDLE_PID
    }

    /// `[bottom, top)` of the process stack; empty for the idle process.
    pub fn stack_bounds(&self) -> (usize, usize) {
        let bottom = self.stack.as_ptr() as usize;
        (bottom, bottom + self.stack.len() * size_of::<usize>())
    }

    /// The frame a switch-in would pop, if the saved stack pointer is on this stack.
    pub fn saved_frame(&self) -> Option<SwitchFrame> {
        let (bottom, top) = self.stack_bounds();
        let sp = self.context.stack_pointer;
        if sp < bottom || sp + size_of::<SwitchFrame>() > top {
            return None;
        }
        Some(unsafe { (sp as *const SwitchFrame).read() })
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("sp", &format_args!("{:#x}", self.context.stack_pointer))
            .field("entry", &self.entry.map(|entry| entry as usize))
            .field("stack_size", &(self.stack.len() * size_of::<usize>()))
            .finish()
    }
}

/// Where a process entry function returns to.
pub extern "C" fn process_exit_trampoline() -> ! {
    scheduler::thread_exit()
}
