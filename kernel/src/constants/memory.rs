pub const PAGE_SIZE: u32 = 4096;
pub const FRAME_SIZE: u32 = 4096;

/// Low 12 bits of an address: the offset inside a page or frame.
pub const PAGE_OFFSET_MASK: u32 = 0xFFF;
/// Everything above the page offset.
pub const FRAME_ADDRESS_MASK: u32 = !PAGE_OFFSET_MASK;

// The bitmap covers the whole 32-bit physical address space.
pub const FRAME_COUNT: usize = 1 << 20;
pub const BITMAP_ENTRY_SIZE: usize = 64;
pub const BITMAP_LEN: usize = FRAME_COUNT / BITMAP_ENTRY_SIZE;
pub const FULL_BITMAP_ENTRY: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Entries per page table and per page directory.
pub const PAGING_ENTRIES: usize = 1024;

pub const KERNEL_VIRTUAL_BASE: u32 = 0xC000_0000;
/// Physical memory below this limit is reachable at `KERNEL_VIRTUAL_BASE + phys`.
pub const LOW_MEMORY_LIMIT: u32 = 16 * 1024 * 1024;
/// BIOS data, real-mode IVT, VGA memory and option ROMs.
pub const BIOS_AREA_END: u32 = 0x10_0000;

pub const KHEAP_START: u32 = 0xD000_0000;
pub const KHEAP_SIZE: u32 = 1024 * 1024; // 1 MiB

pub const VGA_BUFFER_PHYS: u32 = 0xB8000;
/// The VGA text buffer is mapped into the last virtual page.
pub const VGA_BUFFER_VIRT: u32 = 0xFFFF_F000;
