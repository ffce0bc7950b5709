//! Legacy port I/O.

use core::arch::asm;

/// # Safety
///
/// Writing to an I/O port can have arbitrary side effects on the device behind it.
#[inline]
pub unsafe fn outb(port: u16, value: u8) {
    asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
}

/// # Safety
///
/// Reading some ports acknowledges or consumes device state.
#[inline]
pub unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
    value
}

/// Gives slow devices such as the 8259 PIC time to settle between writes.
#[inline]
pub fn io_wait() {
    // port 0x80 is the POST diagnostic port; nothing listens
    unsafe { outb(0x80, 0) };
}
