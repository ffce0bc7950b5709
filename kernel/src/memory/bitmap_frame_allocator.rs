//! Bitmap physical frame allocator.
//!
//! One bit per 4 KiB frame across the whole 32-bit physical address space:
//! bit **1** = used, bit **0** = free. The allocator knows nothing about
//! virtual addresses.

use core::fmt;

use crate::constants::memory::{
    BITMAP_ENTRY_SIZE, BITMAP_LEN, FRAME_ADDRESS_MASK, FRAME_COUNT, FRAME_SIZE, FULL_BITMAP_ENTRY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The frame was already free when it was released.
    DoubleFree(u32),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::DoubleFree(addr) => write!(f, "double free of frame {:#010x}", addr),
        }
    }
}

/// Rounds an address down to the start of its frame.
#[inline]
pub const fn frame_align(addr: u32) -> u32 {
    addr & FRAME_ADDRESS_MASK
}

#[inline]
const fn frame_index(addr: u32) -> usize {
    (addr / FRAME_SIZE) as usize
}

pub struct BitmapFrameAllocator {
    used_frames: usize,
    bitmap: [u64; BITMAP_LEN],
}

impl Default for BitmapFrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BitmapFrameAllocator {
    /// Creates an allocator with every frame free.
    pub const fn new() -> Self {
        Self {
            used_frames: 0,
            bitmap: [0; BITMAP_LEN],
        }
    }

    /// Clears all bitmap state. Every frame becomes free.
    pub fn init(&mut self) {
        self.bitmap.fill(0);
        self.used_frames = 0;
    }

    /// Marks the frame containing `addr` as used.
    ///
    /// Returns the frame-aligned address, or `None` if the frame is already in use.
    pub fn alloc_frame_at(&mut self, addr: u32) -> Option<u32> {
        let addr = frame_align(addr);
        let index = frame_index(addr);
        if self.is_bit_set(index) {
            return None;
        }
        self.set_bit(index);
        Some(addr)
    }

    /// Allocates the lowest free frame.
    pub fn alloc_frame(&mut self) -> Option<u32> {
        let index = self.first_free_frame()?;
        self.alloc_frame_at(index as u32 * FRAME_SIZE)
    }

    /// Reserves `count` consecutive frames starting at `addr`.
    ///
    /// Nothing is marked unless every frame in the run is free.
    pub fn alloc_frames_at(&mut self, addr: u32, count: usize) -> Option<u32> {
        let addr = frame_align(addr);
        let first = frame_index(addr);
        let end = first.checked_add(count)?;
        if end > FRAME_COUNT || (first..end).any(|index| self.is_bit_set(index)) {
            return None;
        }
        for index in first..end {
            self.set_bit(index);
        }
        Some(addr)
    }

    /// Allocates the lowest run of `count` consecutive free frames.
    pub fn alloc_frames(&mut self, count: usize) -> Option<u32> {
        if count == 0 {
            return None;
        }

        let mut run = 0;
        let mut index = self.first_free_frame()?;
        while index < FRAME_COUNT {
            let word = self.bitmap[index / BITMAP_ENTRY_SIZE];
            if index % BITMAP_ENTRY_SIZE == 0 && word == FULL_BITMAP_ENTRY {
                run = 0;
                index += BITMAP_ENTRY_SIZE;
                continue;
            }

            if self.is_bit_set(index) {
                run = 0;
            } else {
                run += 1;
                if run == count {
                    let first = index + 1 - count;
                    return self.alloc_frames_at(first as u32 * FRAME_SIZE, count);
                }
            }
            index += 1;
        }
        None
    }

    /// Releases the frame containing `addr`.
    ///
    /// Releasing a frame that was already free leaves the bitmap untouched
    /// and reports the double free.
    pub fn free_frame(&mut self, addr: u32) -> Result<(), FrameError> {
        let addr = frame_align(addr);
        let index = frame_index(addr);
        if !self.is_bit_set(index) {
            log::warn!("free_frame: frame {:#010x} was already free", addr);
            return Err(FrameError::DoubleFree(addr));
        }
        self.clear_bit(index);
        Ok(())
    }

    /// Releases `count` consecutive frames starting at `addr`.
    pub fn free_frames(&mut self, addr: u32, count: usize) {
        let first = frame_index(frame_align(addr));
        let end = first.saturating_add(count).min(FRAME_COUNT);
        for index in first..end {
            if self.is_bit_set(index) {
                self.clear_bit(index);
            }
        }
    }

    /// Mark every frame as used.
    pub fn mark_all_used(&mut self) {
        self.bitmap.fill(FULL_BITMAP_ENTRY);
        self.used_frames = FRAME_COUNT;
    }

    /// Mark every frame overlapping [base, base + length) as used.
    pub fn reserve_region(&mut self, base: u64, length: u64) {
        let Some((first, end)) = Self::covering_frames(base, length) else {
            return;
        };
        for index in first..end {
            if !self.is_bit_set(index) {
                self.set_bit(index);
            }
        }
    }

    /// Mark every frame fully inside [base, base + length) as free.
    pub fn free_region(&mut self, base: u64, length: u64) {
        let start = base.div_ceil(FRAME_SIZE as u64);
        let end = (base.saturating_add(length) / FRAME_SIZE as u64).min(FRAME_COUNT as u64);
        for index in start..end {
            let index = index as usize;
            if self.is_bit_set(index) {
                self.clear_bit(index);
            }
        }
    }

    /// Check if the frame containing `addr` is used.
    pub fn is_frame_used(&self, addr: u32) -> bool {
        self.is_bit_set(frame_index(addr))
    }

    pub fn used_frame_count(&self) -> usize {
        self.used_frames
    }

    pub fn free_frame_count(&self) -> usize {
        FRAME_COUNT - self.used_frames
    }

    /// Frame index range touched by [base, base + length), clipped to 4 GiB.
    fn covering_frames(base: u64, length: u64) -> Option<(usize, usize)> {
        if length == 0 || base >= (FRAME_COUNT as u64) * FRAME_SIZE as u64 {
            return None;
        }
        let first = (base / FRAME_SIZE as u64) as usize;
        let end = base
            .saturating_add(length)
            .div_ceil(FRAME_SIZE as u64)
            .min(FRAME_COUNT as u64) as usize;
        Some((first, end))
    }

    fn first_free_frame(&self) -> Option<usize> {
        self.bitmap
            .iter()
            .enumerate()
            .find(|(_, entry)| **entry != FULL_BITMAP_ENTRY)
            .map(|(word, entry)| word * BITMAP_ENTRY_SIZE + entry.trailing_ones() as usize)
    }

    /// set a particular bit (1), taking in frame_index (usize)
    fn set_bit(&mut self, frame_index: usize) {
        let mask = 1 << (frame_index % BITMAP_ENTRY_SIZE);
        self.bitmap[frame_index / BITMAP_ENTRY_SIZE] |= mask;
        self.used_frames += 1;
    }

    /// clear a particular bit (0), taking in frame_index (usize)
    fn clear_bit(&mut self, frame_index: usize) {
        let mask = 1 << (frame_index % BITMAP_ENTRY_SIZE);
        self.bitmap[frame_index / BITMAP_ENTRY_SIZE] &= !mask;
        self.used_frames -= 1;
    }

    /// check if bit is set at frame_index. returns true if bit == 1, false otherwise
    fn is_bit_set(&self, frame_index: usize) -> bool {
        let mask = 1 << (frame_index % BITMAP_ENTRY_SIZE);
        (self.bitmap[frame_index / BITMAP_ENTRY_SIZE] & mask) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn allocator() -> Box<BitmapFrameAllocator> {
        Box::new(BitmapFrameAllocator::new())
    }

    #[test]
    fn alloc_then_free_restores_bit() {
        let mut frames = allocator();
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for _ in 0..256 {
            let addr: u32 = rng.gen();
            assert!(!frames.is_frame_used(addr));
            assert_eq!(frames.alloc_frame_at(addr), Some(addr & !0xFFF));
            assert!(frames.is_frame_used(addr));
            assert_eq!(frames.free_frame(addr), Ok(()));
            assert!(!frames.is_frame_used(addr));
        }
        assert_eq!(frames.used_frame_count(), 0);
    }

    #[test]
    fn second_alloc_at_same_frame_fails() {
        let mut frames = allocator();
        assert_eq!(frames.alloc_frame_at(0x0020_1234), Some(0x0020_1000));
        assert_eq!(frames.alloc_frame_at(0x0020_1FFF), None);
        assert_eq!(frames.alloc_frame_at(0x0020_1000), None);
        frames.free_frame(0x0020_1000).unwrap();
        assert_eq!(frames.alloc_frame_at(0x0020_1000), Some(0x0020_1000));
    }

    #[test]
    fn alloc_frame_is_lowest_first() {
        let mut frames = allocator();
        assert_eq!(frames.alloc_frame(), Some(0));
        assert_eq!(frames.alloc_frame(), Some(0x1000));
        frames.alloc_frame_at(0x2000).unwrap();
        assert_eq!(frames.alloc_frame(), Some(0x3000));
        frames.free_frame(0x1000).unwrap();
        assert_eq!(frames.alloc_frame(), Some(0x1000));
    }

    #[test]
    fn alloc_frame_crosses_bitmap_words() {
        let mut frames = allocator();
        frames.reserve_region(0, 64 * FRAME_SIZE as u64 + FRAME_SIZE as u64);
        assert_eq!(frames.alloc_frame(), Some(65 * FRAME_SIZE));
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut frames = allocator();
        frames.mark_all_used();
        assert_eq!(frames.alloc_frame(), None);
        assert_eq!(frames.free_frame_count(), 0);

        frames.free_frame(0xFFFF_F000).unwrap();
        assert_eq!(frames.alloc_frame(), Some(0xFFFF_F000));
        assert_eq!(frames.alloc_frame(), None);
    }

    #[test]
    fn double_free_is_reported_and_harmless() {
        let mut frames = allocator();
        frames.alloc_frame_at(0x5000).unwrap();
        frames.free_frame(0x5000).unwrap();
        assert_eq!(frames.free_frame(0x5000), Err(FrameError::DoubleFree(0x5000)));
        assert!(!frames.is_frame_used(0x5000));
        assert_eq!(frames.used_frame_count(), 0);
    }

    #[test]
    fn contiguous_run_is_all_or_nothing() {
        let mut frames = allocator();
        frames.alloc_frame_at(0x3000).unwrap();

        assert_eq!(frames.alloc_frames_at(0x1000, 4), None);
        assert!(!frames.is_frame_used(0x1000));
        assert!(!frames.is_frame_used(0x2000));

        assert_eq!(frames.alloc_frames_at(0x4000, 4), Some(0x4000));
        assert_eq!(frames.used_frame_count(), 5);

        frames.free_frames(0x4000, 4);
        assert_eq!(frames.used_frame_count(), 1);
    }

    #[test]
    fn alloc_frames_takes_lowest_fitting_run() {
        let mut frames = allocator();
        // holes of 1 and 2 frames, then a full word, then free space
        frames.alloc_frame_at(0x1000).unwrap();
        frames.alloc_frame_at(0x4000).unwrap();
        frames.reserve_region(0x5000, 64 * FRAME_SIZE as u64);

        assert_eq!(frames.alloc_frames(1), Some(0));
        assert_eq!(frames.alloc_frames(2), Some(0x2000));
        assert_eq!(frames.alloc_frames(3), Some(0x45000));
        for addr in (0x45000..0x48000).step_by(FRAME_SIZE as usize) {
            assert!(frames.is_frame_used(addr));
        }
        assert!(!frames.is_frame_used(0x48000));
    }

    #[test]
    fn alloc_frames_without_room_marks_nothing() {
        let mut frames = allocator();
        assert_eq!(frames.alloc_frames(0), None);

        frames.mark_all_used();
        frames.free_frames(0x10_0000, 3);
        let used = frames.used_frame_count();
        assert_eq!(frames.alloc_frames(4), None);
        assert_eq!(frames.used_frame_count(), used);
        assert_eq!(frames.alloc_frames(3), Some(0x10_0000));
        assert_eq!(frames.free_frame_count(), 0);
    }

    #[test]
    fn run_past_end_of_memory_is_rejected() {
        let mut frames = allocator();
        assert_eq!(frames.alloc_frames_at(0xFFFF_E000, 3), None);
        assert_eq!(frames.used_frame_count(), 0);
    }

    #[test]
    fn regions_round_outwards_when_reserving_and_inwards_when_freeing() {
        let mut frames = allocator();
        frames.reserve_region(0x1800, 0x1000);
        assert!(frames.is_frame_used(0x1000));
        assert!(frames.is_frame_used(0x2000));
        assert_eq!(frames.used_frame_count(), 2);

        frames.mark_all_used();
        frames.free_region(0x1800, 0x2000);
        assert!(frames.is_frame_used(0x1000));
        assert!(!frames.is_frame_used(0x2000));
        assert!(frames.is_frame_used(0x3000));
        assert_eq!(frames.free_frame_count(), 1);
    }

    #[test]
    fn regions_above_four_gib_are_clipped() {
        let mut frames = allocator();
        frames.reserve_region(0xFFFF_F000, 0x10_0000);
        assert_eq!(frames.used_frame_count(), 1);
        frames.reserve_region(0x1_0000_0000, 0x1000);
        assert_eq!(frames.used_frame_count(), 1);
    }

    #[test]
    fn init_clears_everything() {
        let mut frames = allocator();
        frames.mark_all_used();
        frames.init();
        assert_eq!(frames.used_frame_count(), 0);
        assert_eq!(frames.alloc_frame(), Some(0));
    }
}
