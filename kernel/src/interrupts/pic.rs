//! The pair of cascaded 8259 interrupt controllers.

use crate::constants::idt::{IRQ_BASE, IRQ_COUNT};

/// Vector offsets after remapping: IRQ 0..7 and IRQ 8..15.
pub const PIC1_OFFSET: u8 = IRQ_BASE;
pub const PIC2_OFFSET: u8 = IRQ_BASE + 8;

/// The IRQ line a vector came from, if it came from a PIC at all.
pub fn irq_line(vector: u8) -> Option<u8> {
    (IRQ_BASE..IRQ_BASE + IRQ_COUNT)
        .contains(&vector)
        .then(|| vector - IRQ_BASE)
}

/// Whether acknowledging `vector` also needs the secondary controller.
pub fn is_secondary(vector: u8) -> bool {
    vector >= PIC2_OFFSET && vector < IRQ_BASE + IRQ_COUNT
}

#[cfg(target_arch = "x86")]
mod hw {
    use super::*;
    use crate::{
        arch::x86::port::{inb, io_wait, outb},
        constants::ports::{PIC1_COMMAND, PIC1_DATA, PIC2_COMMAND, PIC2_DATA},
    };

    const ICW1_INIT: u8 = 0x10;
    const ICW1_ICW4: u8 = 0x01;
    const ICW4_8086: u8 = 0x01;
    const END_OF_INTERRUPT: u8 = 0x20;

    /// Moves the IRQs off the CPU exception vectors, keeping the current masks.
    pub fn remap() {
        unsafe {
            let mask1 = inb(PIC1_DATA);
            let mask2 = inb(PIC2_DATA);

            outb(PIC1_COMMAND, ICW1_INIT | ICW1_ICW4);
            io_wait();
            outb(PIC2_COMMAND, ICW1_INIT | ICW1_ICW4);
            io_wait();
            outb(PIC1_DATA, PIC1_OFFSET);
            io_wait();
            outb(PIC2_DATA, PIC2_OFFSET);
            io_wait();
            // primary has the secondary on IRQ 2
            outb(PIC1_DATA, 4);
            io_wait();
            outb(PIC2_DATA, 2);
            io_wait();
            outb(PIC1_DATA, ICW4_8086);
            io_wait();
            outb(PIC2_DATA, ICW4_8086);
            io_wait();

            outb(PIC1_DATA, mask1);
            outb(PIC2_DATA, mask2);
        }
        log::debug!("PIC remapped to {:#x}/{:#x}", PIC1_OFFSET, PIC2_OFFSET);
    }

    pub fn end_of_interrupt(vector: u8) {
        if irq_line(vector).is_none() {
            return;
        }
        unsafe {
            if is_secondary(vector) {
                outb(PIC2_COMMAND, END_OF_INTERRUPT);
            }
            outb(PIC1_COMMAND, END_OF_INTERRUPT);
        }
    }
}

#[cfg(target_arch = "x86")]
pub use hw::{end_of_interrupt, remap};
