//! Round-robin scheduling of kernel processes.
//!
//! The [`Scheduler`] only does bookkeeping: it decides who runs next and
//! hands back a [`ContextSwitch`]. The global wrappers release the scheduler
//! lock before the stack switch happens, so the incoming process never
//! starts life holding it.

use alloc::{boxed::Box, collections::BTreeMap, collections::VecDeque, vec::Vec};
use core::fmt;

use spin::Mutex;

use crate::{
    arch::{self, without_interrupts},
    constants::processes::IDLE_PID,
    processes::{
        process::{Process, ProcessEntry, ProcessState},
        registers::ContextSwitch,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    OutOfMemory,
    StackTooSmall(usize),
    AlreadyQueued(u32),
    Zombie(u32),
    NoSuchProcess(u32),
    IdleNotQueueable,
    NotInitialized,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::OutOfMemory => write!(f, "out of memory for process"),
            SchedulerError::StackTooSmall(size) => write!(f, "stack of {} bytes is too small", size),
            SchedulerError::AlreadyQueued(pid) => write!(f, "process {} is already queued", pid),
            SchedulerError::Zombie(pid) => write!(f, "process {} has exited", pid),
            SchedulerError::NoSuchProcess(pid) => write!(f, "no process with pid {}", pid),
            SchedulerError::IdleNotQueueable => write!(f, "the idle process is never queued"),
            SchedulerError::NotInitialized => write!(f, "scheduler is not initialized"),
        }
    }
}

pub struct Scheduler {
    processes: BTreeMap<u32, Box<Process>>,
    ready: VecDeque<u32>,
    zombies: VecDeque<u32>,
    current: u32,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Adopts the caller's context as the idle process.
    pub fn new() -> Self {
        let mut processes = BTreeMap::new();
        processes.insert(IDLE_PID, Process::idle());
        Self {
            processes,
            ready: VecDeque::new(),
            zombies: VecDeque::new(),
            current: IDLE_PID,
        }
    }

    /// Takes ownership of a new process. It does not run until queued.
    pub fn insert(&mut self, process: Box<Process>) -> u32 {
        let pid = process.pid();
        self.processes.insert(pid, process);
        pid
    }

    pub fn process(&self, pid: u32) -> Option<&Process> {
        self.processes.get(&pid).map(|process| &**process)
    }

    pub fn add_to_ready_queue(&mut self, pid: u32) -> Result<(), SchedulerError> {
        if pid == IDLE_PID {
            return Err(SchedulerError::IdleNotQueueable);
        }
        let current = self.current;
        let process = self
            .processes
            .get_mut(&pid)
            .ok_or(SchedulerError::NoSuchProcess(pid))?;

        match process.state {
            ProcessState::Zombie => return Err(SchedulerError::Zombie(pid)),
            ProcessState::Ready => return Err(SchedulerError::AlreadyQueued(pid)),
            _ if pid == current => return Err(SchedulerError::AlreadyQueued(pid)),
            _ => {}
        }

        process.state = ProcessState::Ready;
        self.ready.push_back(pid);
        Ok(())
    }

    /// Head of the ready queue, or the idle process when nothing is ready.
    pub fn get_next_process(&mut self) -> u32 {
        self.ready.pop_front().unwrap_or(IDLE_PID)
    }

    /// Picks the next process to run.
    ///
    /// The successor is dequeued before the outgoing process is requeued, so
    /// a lone process yields to idle once its slice ends. Returns `None` when
    /// the running process keeps the CPU.
    pub fn schedule(&mut self) -> Option<ContextSwitch> {
        self.reap_zombies();

        let previous = self.current;
        let next = self.get_next_process();
        if next == previous {
            return None;
        }

        if previous != IDLE_PID {
            self.set_state(previous, ProcessState::Ready);
            self.ready.push_back(previous);
        }
        self.switch_to(previous, next)
    }

    /// Retires the running process and picks its successor.
    ///
    /// The zombie keeps its stack until a later [`Scheduler::schedule`]
    /// runs on some other stack.
    pub fn exit_current(&mut self) -> ContextSwitch {
        let exiting = self.current;
        if exiting == IDLE_PID {
            panic!("idle process attempted to exit");
        }

        self.set_state(exiting, ProcessState::Zombie);
        self.zombies.push_back(exiting);

        let next = self.get_next_process();
        self.switch_to(exiting, next)
            .expect("an exiting process is never its own successor")
    }

    /// Frees every zombie except the running process.
    pub fn reap_zombies(&mut self) -> usize {
        let current = self.current;
        let mut reaped = 0;
        let mut kept = VecDeque::new();

        while let Some(pid) = self.zombies.pop_front() {
            if pid == current {
                kept.push_back(pid);
                continue;
            }
            if self.processes.remove(&pid).is_some() {
                log::trace!("Reaped process {}", pid);
                reaped += 1;
            }
        }

        self.zombies = kept;
        reaped
    }

    pub fn current_pid(&self) -> u32 {
        self.current
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn zombie_count(&self) -> usize {
        self.zombies.len()
    }

    pub fn ready_pids(&self) -> Vec<u32> {
        self.ready.iter().copied().collect()
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn log_process_table(&self) {
        log::info!(
            "Process table: {} processes, current {}, ready {:?}, zombies {}",
            self.processes.len(),
            self.current,
            self.ready,
            self.zombies.len()
        );
        for process in self.processes.values() {
            log::info!("  {:?}", process);
        }
    }

    fn set_state(&mut self, pid: u32, state: ProcessState) {
        if let Some(process) = self.processes.get_mut(&pid) {
            process.state = state;
        }
    }

    fn switch_to(&mut self, previous: u32, next: u32) -> Option<ContextSwitch> {
        if next == previous {
            return None;
        }

        let load = {
            let incoming = self.processes.get_mut(&next)?;
            incoming.state = ProcessState::Running;
            &incoming.context as *const _
        };
        let save = &mut self.processes.get_mut(&previous)?.context as *mut _;
        self.current = next;

        log::trace!("Switching from process {} to {}", previous, next);
        Some(ContextSwitch { save, load })
    }
}

/// Global scheduler; `None` until [`init`] adopts the boot context.
pub static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

pub fn init() {
    without_interrupts(|| {
        *SCHEDULER.lock() = Some(Scheduler::new());
    });
    log::info!("Scheduler initialized, boot context is process {}", IDLE_PID);
}

fn with_scheduler<F, R>(f: F) -> Result<R, SchedulerError>
where
    F: FnOnce(&mut Scheduler) -> R,
{
    without_interrupts(|| {
        SCHEDULER
            .lock()
            .as_mut()
            .map(f)
            .ok_or(SchedulerError::NotInitialized)
    })
}

/// Creates a process and places it at the tail of the ready queue.
pub fn spawn(entry: ProcessEntry, stack_size: usize) -> Result<u32, SchedulerError> {
    let process = Process::new(entry, stack_size)?;
    let pid = with_scheduler(|scheduler| {
        let pid = scheduler.insert(process);
        scheduler.add_to_ready_queue(pid).map(|()| pid)
    })??;
    log::debug!("Spawned process {} ({} byte stack)", pid, stack_size);
    Ok(pid)
}

pub fn add_to_ready_queue(pid: u32) -> Result<(), SchedulerError> {
    with_scheduler(|scheduler| scheduler.add_to_ready_queue(pid))?
}

pub fn current_pid() -> Option<u32> {
    with_scheduler(|scheduler| scheduler.current_pid()).ok()
}

/// Gives the CPU to the next ready process, if any.
///
/// Called from the timer interrupt and safe to call from thread context.
pub fn schedule() {
    without_interrupts(|| {
        let switch = match SCHEDULER.lock().as_mut() {
            Some(scheduler) => scheduler.schedule(),
            None => return,
        };
        if let Some(switch) = switch {
            unsafe { arch::switch_context(&switch) };
        }
    });
}

/// Ends the running process. Never returns.
pub fn thread_exit() -> ! {
    arch::disable_interrupts();
    let switch = SCHEDULER
        .lock()
        .as_mut()
        .expect("thread_exit before scheduler init")
        .exit_current();
    unsafe { arch::switch_context(&switch) };
    unreachable!("zombie process was resumed");
}

pub fn log_process_table() {
    let _ = with_scheduler(|scheduler| scheduler.log_process_table());
}
