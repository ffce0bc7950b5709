pub mod bitmap_frame_allocator;
pub mod frame_allocator;
pub mod heap;
pub mod paging;

use crate::{boot::BootInfo, constants::memory::KERNEL_VIRTUAL_BASE};
use frame_allocator::with_frame_allocator;

/// Virtual bounds of the loaded kernel image, bss included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelImage {
    pub start: u32,
    pub end: u32,
}

impl KernelImage {
    #[cfg(target_os = "none")]
    pub fn from_linker() -> Self {
        extern "C" {
            static __kernel_start: u8;
            static __kernel_end: u8;
        }
        unsafe {
            Self {
                start: core::ptr::addr_of!(__kernel_start) as u32,
                end: core::ptr::addr_of!(__kernel_end) as u32,
            }
        }
    }

    pub fn physical_start(&self) -> u32 {
        self.start - KERNEL_VIRTUAL_BASE
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Brings up physical memory, the kernel address space and the heap.
///
/// Boot-time failures here are fatal.
pub fn init(boot_info: &BootInfo, image: KernelImage) {
    with_frame_allocator(|frames| {
        frames.init();
        boot_info
            .apply_memory_map(frames)
            .expect("Failed to read the memory map");
        frames.reserve_region(u64::from(image.physical_start()), u64::from(image.len()));

        unsafe { paging::init(frames, image) }.expect("Failed to set up kernel paging");
    });

    heap::init_heap().expect("Failed to initialize heap");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_bounds() {
        let image = KernelImage {
            start: 0xC010_0000,
            end: 0xC012_3000,
        };
        assert_eq!(image.physical_start(), 0x10_0000);
        assert_eq!(image.len(), 0x2_3000);
        assert!(!image.is_empty());
    }
}
