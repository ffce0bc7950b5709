/// Input clock of the 8253/8254 PIT.
pub const PIT_BASE_FREQUENCY: u32 = 1_193_180;
pub const TIMER_FREQUENCY: u32 = 100;
pub const NSEC_PER_SEC: u32 = 1_000_000_000;

// Command byte fields.
pub const PIT_CHANNEL_0: u8 = 0b0000_0000;
pub const PIT_ACCESS_LOHI: u8 = 0b0011_0000;
pub const PIT_RATE_GENERATOR_MODE: u8 = 0b0000_0100;
pub const PIT_BINARY_MODE: u8 = 0b0000_0000;
