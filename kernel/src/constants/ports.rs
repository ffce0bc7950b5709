pub const SERIAL_PORT: u16 = 0x3F8;

pub const PIC1_COMMAND: u16 = 0x20;
pub const PIC1_DATA: u16 = 0x21;
pub const PIC2_COMMAND: u16 = 0xA0;
pub const PIC2_DATA: u16 = 0xA1;

pub const PIT_CHANNEL0_DATA: u16 = 0x40;
pub const PIT_COMMAND: u16 = 0x43;
