//! Interrupt routing.
//!
//! The entry stubs hand every vector to [`dispatch`], which looks the vector
//! up in a table of registered handlers. Subsystems register their own
//! handlers (paging takes the page fault, the timer takes IRQ 0), so this
//! module never needs to know about them.

use core::fmt;

use spin::Mutex;

use crate::{
    arch::without_interrupts,
    constants::idt::{EXCEPTION_COUNT, PAGE_FAULT_VECTOR},
    processes::registers::InterruptFrame,
};

pub mod idt;
pub mod pic;

pub type InterruptHandler = fn(&mut InterruptFrame);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptError {
    Unhandled(u8),
}

impl fmt::Display for InterruptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptError::Unhandled(vector) => {
                write!(f, "no handler registered for vector {}", vector)
            }
        }
    }
}

pub struct HandlerTable {
    handlers: [Option<InterruptHandler>; 256],
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerTable {
    pub const fn new() -> Self {
        Self {
            handlers: [None; 256],
        }
    }

    /// Returns the handler previously registered for `vector`.
    pub fn register(
        &mut self,
        vector: u8,
        handler: InterruptHandler,
    ) -> Option<InterruptHandler> {
        self.handlers[usize::from(vector)].replace(handler)
    }

    pub fn unregister(&mut self, vector: u8) -> Option<InterruptHandler> {
        self.handlers[usize::from(vector)].take()
    }

    pub fn get(&self, vector: u8) -> Option<InterruptHandler> {
        self.handlers[usize::from(vector)]
    }
}

static HANDLERS: Mutex<HandlerTable> = Mutex::new(HandlerTable::new());

pub fn register_handler(vector: u8, handler: InterruptHandler) -> Option<InterruptHandler> {
    without_interrupts(|| HANDLERS.lock().register(vector, handler))
}

pub fn unregister_handler(vector: u8) -> Option<InterruptHandler> {
    without_interrupts(|| HANDLERS.lock().unregister(vector))
}

/// Runs the handler registered for the frame's vector.
///
/// The handler is called with the table unlocked, so it may register
/// handlers itself or never return (context switch, panic).
pub fn dispatch(frame: &mut InterruptFrame) -> Result<(), InterruptError> {
    let vector = frame.vector as u8;
    let handler = without_interrupts(|| HANDLERS.lock().get(vector));

    match handler {
        Some(handler) => {
            handler(frame);
            Ok(())
        }
        None => {
            log::warn!("Unhandled interrupt {} at eip {:#010x}", vector, frame.eip);
            Err(InterruptError::Unhandled(vector))
        }
    }
}

const EXCEPTION_NAMES: [&str; EXCEPTION_COUNT as usize] = [
    "DIVIDE ERROR",
    "DEBUG",
    "NON-MASKABLE INTERRUPT",
    "BREAKPOINT",
    "OVERFLOW",
    "BOUND RANGE EXCEEDED",
    "INVALID OPCODE",
    "DEVICE NOT AVAILABLE",
    "DOUBLE FAULT",
    "COPROCESSOR SEGMENT OVERRUN",
    "INVALID TSS",
    "SEGMENT NOT PRESENT",
    "STACK-SEGMENT FAULT",
    "GENERAL PROTECTION FAULT",
    "PAGE FAULT",
    "RESERVED",
    "x87 FLOATING-POINT EXCEPTION",
    "ALIGNMENT CHECK",
    "MACHINE CHECK",
    "SIMD FLOATING-POINT EXCEPTION",
    "VIRTUALIZATION EXCEPTION",
    "CONTROL PROTECTION EXCEPTION",
    "RESERVED",
    "RESERVED",
    "RESERVED",
    "RESERVED",
    "RESERVED",
    "RESERVED",
    "HYPERVISOR INJECTION EXCEPTION",
    "VMM COMMUNICATION EXCEPTION",
    "SECURITY EXCEPTION",
    "RESERVED",
];

pub fn exception_name(vector: u8) -> Option<&'static str> {
    EXCEPTION_NAMES.get(usize::from(vector)).copied()
}

fn breakpoint_handler(frame: &mut InterruptFrame) {
    log::info!("EXCEPTION: BREAKPOINT\n{:#?}", frame);
}

fn fatal_exception_handler(frame: &mut InterruptFrame) {
    let name = exception_name(frame.vector as u8).unwrap_or("UNKNOWN");
    log::error!("EXCEPTION: {}\n{:#?}", name, frame);
    panic!("EXCEPTION: {} (error code {:#x})", name, frame.error_code);
}

/// Installs the exception handlers, then (on x86) remaps the PIC and loads
/// the IDT. The page fault vector is left to paging.
pub fn init() {
    for vector in 0..EXCEPTION_COUNT {
        match vector {
            PAGE_FAULT_VECTOR => {}
            3 => {
                register_handler(vector, breakpoint_handler);
            }
            _ => {
                register_handler(vector, fatal_exception_handler);
            }
        }
    }

    #[cfg(target_arch = "x86")]
    {
        pic::remap();
        idt::init_idt();
    }
    log::info!("Interrupts initialized");
}

/// Common entry from the assembly stubs.
///
/// IRQs are acknowledged before their handler runs, since the timer handler
/// may switch to another process and not come back for a while.
#[cfg(target_arch = "x86")]
#[no_mangle]
extern "C" fn isr_dispatch(frame: *mut InterruptFrame) {
    let frame = unsafe { &mut *frame };
    let vector = frame.vector as u8;

    if pic::irq_line(vector).is_some() {
        pic::end_of_interrupt(vector);
    }
    // unhandled vectors are already logged
    let _ = dispatch(frame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static HITS: AtomicU32 = AtomicU32::new(0);

    fn counting_handler(frame: &mut InterruptFrame) {
        HITS.fetch_add(1, Ordering::SeqCst);
        frame.eax = 0xCAFE;
    }

    #[test]
    fn registered_handler_runs() {
        // vector not used by any other test
        let vector = 200;
        assert!(register_handler(vector, counting_handler).is_none());

        let mut frame = InterruptFrame::new(vector, 0);
        assert_eq!(dispatch(&mut frame), Ok(()));
        assert_eq!(frame.eax, 0xCAFE);
        assert!(HITS.load(Ordering::SeqCst) >= 1);

        assert!(unregister_handler(vector).is_some());
        assert_eq!(
            dispatch(&mut frame),
            Err(InterruptError::Unhandled(vector))
        );
    }

    #[test]
    fn missing_handler_is_reported() {
        let mut frame = InterruptFrame::new(201, 0);
        assert_eq!(dispatch(&mut frame), Err(InterruptError::Unhandled(201)));
        assert_eq!(
            InterruptError::Unhandled(201).to_string(),
            "no handler registered for vector 201"
        );
    }

    #[test]
    fn table_replaces_handlers() {
        fn other(_: &mut InterruptFrame) {}

        let mut table = HandlerTable::new();
        assert!(table.register(5, counting_handler).is_none());
        assert!(table.register(5, other).is_some());
        assert!(table.get(5).is_some());
        assert!(table.unregister(5).is_some());
        assert!(table.get(5).is_none());
    }

    #[test]
    #[should_panic(expected = "EXCEPTION: GENERAL PROTECTION FAULT")]
    fn fatal_exceptions_panic() {
        let mut frame = InterruptFrame::new(13, 0x10);
        fatal_exception_handler(&mut frame);
    }

    #[test]
    fn exception_names() {
        assert_eq!(exception_name(0), Some("DIVIDE ERROR"));
        assert_eq!(exception_name(14), Some("PAGE FAULT"));
        assert_eq!(exception_name(32), None);
    }
}
