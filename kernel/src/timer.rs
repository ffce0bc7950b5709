//! Programmable interval timer and uptime.
//!
//! Uptime is kept as whole seconds plus nanoseconds. The part of a tick that
//! does not fit in whole nanoseconds is carried in `remainder` (in units of
//! 1/hz ns), so the clock does not drift when `hz` does not divide 10^9.

use spin::Mutex;

use crate::{
    arch::without_interrupts,
    constants::timer::{NSEC_PER_SEC, PIT_BASE_FREQUENCY, TIMER_FREQUENCY},
    interrupts,
    processes::{registers::InterruptFrame, scheduler},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    hz: u32,
    ticks: u64,
    seconds: u64,
    nanoseconds: u32,
    ns_per_tick: u32,
    remainder_per_tick: u32,
    remainder: u32,
    ticks_per_slice: u64,
}

impl Timer {
    /// A timer firing `hz` times a second that asks for a reschedule once
    /// every second's worth of ticks.
    pub const fn new(hz: u32) -> Self {
        let hz = if hz == 0 { 1 } else { hz };
        Self {
            hz,
            ticks: 0,
            seconds: 0,
            nanoseconds: 0,
            ns_per_tick: NSEC_PER_SEC / hz,
            remainder_per_tick: NSEC_PER_SEC % hz,
            remainder: 0,
            ticks_per_slice: hz as u64,
        }
    }

    pub fn with_slice(mut self, ticks_per_slice: u64) -> Self {
        self.ticks_per_slice = ticks_per_slice.max(1);
        self
    }

    /// Advances the clock by one tick. Returns whether the current time
    /// slice has run out.
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;
        self.nanoseconds += self.ns_per_tick;
        self.remainder += self.remainder_per_tick;
        if self.remainder >= self.hz {
            self.remainder -= self.hz;
            self.nanoseconds += 1;
        }
        while self.nanoseconds >= NSEC_PER_SEC {
            self.nanoseconds -= NSEC_PER_SEC;
            self.seconds += 1;
        }
        self.ticks % self.ticks_per_slice == 0
    }

    pub fn hz(&self) -> u32 {
        self.hz
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn time_ms(&self) -> u64 {
        self.seconds * 1000 + u64::from(self.nanoseconds / 1_000_000)
    }

    pub fn time_seconds(&self) -> u64 {
        self.seconds
    }
}

/// PIT reload value for `hz`, clamped to what the 16-bit counter can hold.
pub fn pit_divisor(hz: u32) -> u16 {
    let divisor = PIT_BASE_FREQUENCY / hz.max(1);
    divisor.clamp(1, u32::from(u16::MAX)) as u16
}

pub static TIMER: Mutex<Timer> = Mutex::new(Timer::new(TIMER_FREQUENCY));

pub fn time_ms() -> u64 {
    without_interrupts(|| TIMER.lock().time_ms())
}

pub fn time_seconds() -> u64 {
    without_interrupts(|| TIMER.lock().time_seconds())
}

pub fn ticks() -> u64 {
    without_interrupts(|| TIMER.lock().ticks())
}

fn timer_handler(_frame: &mut InterruptFrame) {
    // the lock must be gone before a context switch
    let slice_over = TIMER.lock().tick();
    if slice_over {
        scheduler::schedule();
    }
}

/// Starts the tick at `hz` and hooks it to the scheduler.
pub fn init(hz: u32) {
    without_interrupts(|| *TIMER.lock() = Timer::new(hz));
    interrupts::register_handler(crate::constants::idt::TIMER_VECTOR, timer_handler);

    #[cfg(target_arch = "x86")]
    program_pit(pit_divisor(hz));

    log::info!("Timer running at {} Hz (PIT divisor {})", hz, pit_divisor(hz));
}

#[cfg(target_arch = "x86")]
fn program_pit(divisor: u16) {
    use crate::{
        arch::x86::port::outb,
        constants::{
            ports::{PIT_CHANNEL0_DATA, PIT_COMMAND},
            timer::{PIT_ACCESS_LOHI, PIT_BINARY_MODE, PIT_CHANNEL_0, PIT_RATE_GENERATOR_MODE},
        },
    };

    let [low, high] = divisor.to_le_bytes();
    unsafe {
        outb(
            PIT_COMMAND,
            PIT_CHANNEL_0 | PIT_ACCESS_LOHI | PIT_RATE_GENERATOR_MODE | PIT_BINARY_MODE,
        );
        outb(PIT_CHANNEL0_DATA, low);
        outb(PIT_CHANNEL0_DATA, high);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_for_common_rates() {
        assert_eq!(pit_divisor(100), 11931);
        assert_eq!(pit_divisor(1000), 1193);
        assert_eq!(pit_divisor(18), u16::MAX);
        assert_eq!(pit_divisor(0), u16::MAX);
        assert_eq!(pit_divisor(2_000_000), 1);
    }

    #[test]
    fn one_second_of_ticks() {
        let mut timer = Timer::new(100);
        let mut slices = 0;
        for _ in 0..100 {
            if timer.tick() {
                slices += 1;
            }
        }
        assert_eq!(timer.ticks(), 100);
        assert_eq!(timer.time_seconds(), 1);
        assert_eq!(timer.time_ms(), 1000);
        assert_eq!(slices, 1);
    }

    #[test]
    fn milliseconds_between_seconds() {
        let mut timer = Timer::new(100);
        for _ in 0..25 {
            timer.tick();
        }
        assert_eq!(timer.time_seconds(), 0);
        assert_eq!(timer.time_ms(), 250);
    }

    #[test]
    fn uneven_period_does_not_drift() {
        // 1e9 / 3 leaves a remainder every tick
        let mut timer = Timer::new(3);
        for _ in 0..3 * 60 {
            timer.tick();
        }
        assert_eq!(timer.time_seconds(), 60);
        assert_eq!(timer.time_ms(), 60_000);

        let mut timer = Timer::new(7);
        for _ in 0..7 * 3600 {
            timer.tick();
        }
        assert_eq!(timer.time_seconds(), 3600);
        assert_eq!(timer.time_ms(), 3_600_000);
    }

    #[test]
    fn remainder_is_carried_within_a_second() {
        // 142_857_142 ns per tick at 7 Hz, with 6/7 ns left over
        let mut timer = Timer::new(7);
        timer.tick();
        assert_eq!(timer.time_ms(), 142);
        for _ in 0..6 {
            timer.tick();
        }
        assert_eq!(timer.time_seconds(), 1);
        assert_eq!(timer.time_ms(), 1000);
    }

    #[test]
    fn custom_slice_length() {
        let mut timer = Timer::new(100).with_slice(10);
        let slices = (0..100).filter(|_| timer.tick()).count();
        assert_eq!(slices, 10);
    }
}
