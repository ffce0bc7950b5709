//! Anonymous memory mappings backed by fresh physical frames.

use core::fmt;

use bitflags::bitflags;

use crate::{
    arch::without_interrupts,
    constants::memory::{PAGE_OFFSET_MASK, PAGE_SIZE},
    memory::{
        bitmap_frame_allocator::BitmapFrameAllocator,
        frame_allocator::with_frame_allocator,
        paging::{PageFlags, Paging, PagingError, KERNEL_PAGING},
    },
};

bitflags! {
    /// Protection bits passed in edx.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtFlags: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const EXEC = 0x4;
        const USER = 0x8;
        const KERNEL = 0x10;
    }
}

impl ProtFlags {
    /// Page flags for a mapping with this protection. Pages are always
    /// present and readable; 32-bit paging has no execute-disable bit.
    pub fn page_flags(self) -> PageFlags {
        let mut flags = PageFlags::PRESENT;
        if self.contains(ProtFlags::WRITE) {
            flags |= PageFlags::WRITABLE;
        }
        if self.contains(ProtFlags::USER) {
            flags |= PageFlags::USER;
        }
        flags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapError {
    ZeroLength,
    Unaligned(u32),
    /// `addr + length` wraps past 4 GiB.
    Overflow,
    AlreadyMapped(u32),
    OutOfFrames(usize),
    Paging(PagingError),
    /// Paging has not been set up yet.
    NoAddressSpace,
}

impl fmt::Display for MmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmapError::ZeroLength => write!(f, "zero-length mapping"),
            MmapError::Unaligned(addr) => write!(f, "address {:#010x} is not page aligned", addr),
            MmapError::Overflow => write!(f, "mapping runs past the end of the address space"),
            MmapError::AlreadyMapped(addr) => write!(f, "page {:#010x} is already mapped", addr),
            MmapError::OutOfFrames(count) => write!(f, "no run of {} free frames", count),
            MmapError::Paging(error) => write!(f, "{}", error),
            MmapError::NoAddressSpace => write!(f, "paging is not initialized"),
        }
    }
}

impl From<PagingError> for MmapError {
    fn from(error: PagingError) -> Self {
        MmapError::Paging(error)
    }
}

/// Maps `[addr, addr + length)` onto newly allocated, physically contiguous
/// frames and returns `addr`.
///
/// Nothing stays mapped or allocated when it fails, apart from page tables
/// created along the way.
pub fn mmap(
    paging: &mut Paging,
    frames: &mut BitmapFrameAllocator,
    addr: u32,
    length: u32,
    prot: ProtFlags,
) -> Result<u32, MmapError> {
    if length == 0 {
        return Err(MmapError::ZeroLength);
    }
    if addr & PAGE_OFFSET_MASK != 0 {
        return Err(MmapError::Unaligned(addr));
    }
    let count = length.div_ceil(PAGE_SIZE);
    addr.checked_add((count - 1) * PAGE_SIZE).ok_or(MmapError::Overflow)?;

    let pages = (0..count).map(move |page| addr + page * PAGE_SIZE);
    if let Some(mapped) = pages.clone().find(|&vaddr| paging.translate(vaddr).is_some()) {
        return Err(MmapError::AlreadyMapped(mapped));
    }

    let count = count as usize;
    let paddr = frames
        .alloc_frames(count)
        .ok_or(MmapError::OutOfFrames(count))?;

    if let Err(error) = paging.map_range(frames, addr, paddr, length, prot.page_flags()) {
        for vaddr in pages {
            paging.unmap_page(vaddr);
        }
        frames.free_frames(paddr, count);
        return Err(error.into());
    }

    log::debug!(
        "mmap: {:#010x}..{:#010x} -> {:#010x} ({:?})",
        addr,
        addr as u64 + count as u64 * PAGE_SIZE as u64,
        paddr,
        prot
    );
    Ok(addr)
}

/// [`mmap`] against the kernel address space and the global frame allocator.
pub fn sys_mmap(addr: u32, length: u32, prot: u32) -> Result<u32, MmapError> {
    let prot = ProtFlags::from_bits_truncate(prot);
    without_interrupts(|| {
        let mut guard = KERNEL_PAGING.lock();
        let paging = guard.as_mut().ok_or(MmapError::NoAddressSpace)?;
        with_frame_allocator(|frames| mmap(paging, frames, addr, length, prot))
    })
}
