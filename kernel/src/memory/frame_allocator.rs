use spin::Mutex;

use crate::{arch::without_interrupts, memory::bitmap_frame_allocator::BitmapFrameAllocator};

use super::bitmap_frame_allocator::FrameError;

/// The one physical frame allocator, seeded from the boot memory map.
pub static FRAME_ALLOCATOR: Mutex<BitmapFrameAllocator> = Mutex::new(BitmapFrameAllocator::new());

/// Exposed function to allocate the lowest free frame from the global allocator
pub fn alloc_frame() -> Option<u32> {
    with_frame_allocator(|allocator| allocator.alloc_frame())
}

/// Exposed function to release a frame back to the global allocator
pub fn dealloc_frame(addr: u32) -> Result<(), FrameError> {
    with_frame_allocator(|allocator| allocator.free_frame(addr))
}

/// Runs `f` against the global allocator with interrupts masked, so the
/// timer cannot preempt a holder of the lock.
pub fn with_frame_allocator<F, R>(f: F) -> R
where
    F: FnOnce(&mut BitmapFrameAllocator) -> R,
{
    without_interrupts(|| f(&mut FRAME_ALLOCATOR.lock()))
}
