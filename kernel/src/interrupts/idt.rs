//! Interrupt Descriptor Table
//!
//! Every gate points at an assembly entry stub that funnels into
//! [`super::dispatch`], so the table itself never changes after boot.

use core::mem::size_of;

use crate::constants::{gdt::KERNEL_CODE_SELECTOR, idt::IDT_GATES};

/// Present, ring 0, 32-bit interrupt gate.
pub const INTERRUPT_GATE: u8 = 0x8E;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attributes: u8,
    offset_high: u16,
}

impl IdtEntry {
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attributes: 0,
            offset_high: 0,
        }
    }

    pub const fn interrupt_gate(handler: u32) -> Self {
        Self {
            offset_low: handler as u16,
            selector: KERNEL_CODE_SELECTOR,
            zero: 0,
            type_attributes: INTERRUPT_GATE,
            offset_high: (handler >> 16) as u16,
        }
    }

    pub fn handler_address(&self) -> u32 {
        u32::from(self.offset_low) | (u32::from(self.offset_high) << 16)
    }

    pub fn is_present(&self) -> bool {
        self.type_attributes & 0x80 != 0
    }

    pub fn selector(&self) -> u16 {
        self.selector
    }
}

#[repr(C, align(8))]
pub struct Idt {
    entries: [IdtEntry; IDT_GATES],
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

impl Idt {
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::missing(); IDT_GATES],
        }
    }

    /// Points `vector` at `handler`. Vectors past the table are ignored.
    pub fn set_handler(&mut self, vector: usize, handler: u32) {
        if let Some(entry) = self.entries.get_mut(vector) {
            *entry = IdtEntry::interrupt_gate(handler);
        }
    }

    pub fn entry(&self, vector: usize) -> Option<&IdtEntry> {
        self.entries.get(vector)
    }

    /// Value for the `limit` field of the `lidt` operand.
    pub const fn limit() -> u16 {
        (IDT_GATES * size_of::<IdtEntry>() - 1) as u16
    }
}

#[cfg(target_arch = "x86")]
mod load {
    use lazy_static::lazy_static;

    use super::Idt;
    use crate::{
        arch::x86::{isr, load_idt, DescriptorTablePointer},
        constants::idt::IDT_GATES,
    };

    lazy_static! {
        static ref IDT: Idt = {
            let mut idt = Idt::new();
            for vector in 0..IDT_GATES {
                if let Some(stub) = isr::stub_address(vector) {
                    idt.set_handler(vector, stub);
                }
            }
            idt
        };
    }

    pub fn init_idt() {
        let pointer = DescriptorTablePointer {
            limit: Idt::limit(),
            base: &*IDT as *const Idt as u32,
        };
        unsafe { load_idt(&pointer) };
        let present = (0..IDT_GATES)
            .filter(|&vector| IDT.entry(vector).is_some_and(|entry| entry.is_present()))
            .count();
        log::debug!("IDT loaded, {} of {} gates present", present, IDT_GATES);
    }
}

#[cfg(target_arch = "x86")]
pub use load::init_idt;
