//! What the Multiboot loader hands over: the magic value in EAX and the
//! information structure in EBX.

use core::fmt;

use crate::{
    constants::memory::BIOS_AREA_END,
    memory::{bitmap_frame_allocator::BitmapFrameAllocator, paging::PhysicalWindow},
};

/// Value a compliant loader leaves in EAX.
pub const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// `mem_lower` / `mem_upper` are valid.
pub const INFO_MEMORY: u32 = 1 << 0;
/// `mmap_length` / `mmap_addr` are valid.
pub const INFO_MEMORY_MAP: u32 = 1 << 6;

/// Smallest memory map entry, not counting its own size field.
const MIN_ENTRY_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    BadMagic(u32),
    MissingMemoryMap,
    Unreachable(u32),
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::BadMagic(magic) => write!(f, "multiboot magic number unknown: {:#x}", magic),
            BootError::MissingMemoryMap => write!(f, "loader provided no memory information"),
            BootError::Unreachable(addr) => {
                write!(f, "boot structure at {:#010x} is outside the kernel window", addr)
            }
        }
    }
}

/// The fixed part of the Multiboot information structure.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct MultibootInfo {
    pub flags: u32,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    pub syms: [u32; 4],
    pub mmap_length: u32,
    pub mmap_addr: u32,
}

impl MultibootInfo {
    pub fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Available,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    Unknown(u32),
}

impl From<u32> for RegionKind {
    fn from(kind: u32) -> Self {
        match kind {
            1 => RegionKind::Available,
            2 => RegionKind::Reserved,
            3 => RegionKind::AcpiReclaimable,
            4 => RegionKind::AcpiNvs,
            5 => RegionKind::BadMemory,
            other => RegionKind::Unknown(other),
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::Available => write!(f, "Usable RAM"),
            RegionKind::Reserved => write!(f, "Reserved"),
            RegionKind::AcpiReclaimable => write!(f, "ACPI Reclaimable"),
            RegionKind::AcpiNvs => write!(f, "ACPI NVS"),
            RegionKind::BadMemory => write!(f, "Bad memory"),
            RegionKind::Unknown(kind) => write!(f, "Unknown ({})", kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: RegionKind,
}

/// The loader's memory map: variable-sized entries, each prefixed by its
/// size not counting the prefix itself.
#[derive(Debug, Clone, Copy)]
pub struct MemoryMap<'a> {
    bytes: &'a [u8],
}

impl<'a> MemoryMap<'a> {
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Stops at the first entry that is truncated or too small to be one.
    pub fn regions(&self) -> MemoryRegions<'a> {
        MemoryRegions {
            bytes: self.bytes,
            offset: 0,
        }
    }
}

pub struct MemoryRegions<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Iterator for MemoryRegions<'_> {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<MemoryRegion> {
        let entry = self.bytes.get(self.offset..)?;
        let size = u32::from_le_bytes(entry.get(..4)?.try_into().ok()?) as usize;
        if size < MIN_ENTRY_SIZE {
            return None;
        }
        let body = entry.get(4..4 + size)?;

        let field = |range: core::ops::Range<usize>| -> [u8; 8] {
            let mut raw = [0; 8];
            raw[..range.len()].copy_from_slice(&body[range]);
            raw
        };
        let region = MemoryRegion {
            base: u64::from_le_bytes(field(0..8)),
            length: u64::from_le_bytes(field(8..16)),
            kind: RegionKind::from(u64::from_le_bytes(field(16..20)) as u32),
        };

        self.offset += 4 + size;
        Some(region)
    }
}

/// Boot information copied out of loader memory.
#[derive(Debug, Clone, Copy)]
pub struct BootInfo<'a> {
    pub info: MultibootInfo,
    pub memory_map: Option<MemoryMap<'a>>,
}

impl<'a> BootInfo<'a> {
    pub fn validate(magic: u32, info_phys: u32) -> Result<(), BootError> {
        if magic != MULTIBOOT_BOOTLOADER_MAGIC {
            return Err(BootError::BadMagic(magic));
        }
        if info_phys == 0 {
            return Err(BootError::Unreachable(info_phys));
        }
        Ok(())
    }

    /// Reads the structure at physical `info_phys` through `window`.
    ///
    /// # Safety
    ///
    /// `window` must map the loader's structures, and the memory map must stay
    /// untouched for `'a`.
    pub unsafe fn from_multiboot(
        magic: u32,
        info_phys: u32,
        window: PhysicalWindow,
    ) -> Result<BootInfo<'a>, BootError> {
        Self::validate(magic, info_phys)?;

        let info_ptr = window
            .to_virt(info_phys)
            .ok_or(BootError::Unreachable(info_phys))?;
        let info = (info_ptr as *const MultibootInfo).read_unaligned();

        let memory_map = if info.has(INFO_MEMORY_MAP) {
            let map_ptr = window
                .to_virt(info.mmap_addr)
                .ok_or(BootError::Unreachable(info.mmap_addr))?;
            window
                .to_virt(info.mmap_addr.saturating_add(info.mmap_length.saturating_sub(1)))
                .ok_or(BootError::Unreachable(info.mmap_addr))?;
            Some(MemoryMap::from_bytes(core::slice::from_raw_parts(
                map_ptr,
                info.mmap_length as usize,
            )))
        } else {
            None
        };

        Ok(BootInfo { info, memory_map })
    }

    /// Seeds `frames` from the loader's view of memory.
    ///
    /// Everything starts used; available regions are freed, then every other
    /// region is reserved again so overlapping entries err on the safe side.
    /// The first megabyte is always kept.
    pub fn apply_memory_map(&self, frames: &mut BitmapFrameAllocator) -> Result<(), BootError> {
        frames.mark_all_used();

        if let Some(map) = self.memory_map {
            for region in map.regions().filter(|r| r.kind == RegionKind::Available) {
                frames.free_region(region.base, region.length);
            }
            for region in map.regions().filter(|r| r.kind != RegionKind::Available) {
                frames.reserve_region(region.base, region.length);
            }
        } else if self.info.has(INFO_MEMORY) {
            // mem_upper is KiB above 1 MiB
            frames.free_region(
                u64::from(BIOS_AREA_END),
                u64::from(self.info.mem_upper) * 1024,
            );
        } else {
            return Err(BootError::MissingMemoryMap);
        }

        frames.reserve_region(0, u64::from(BIOS_AREA_END));
        log::info!(
            "Physical memory: {} frames free, {} used",
            frames.free_frame_count(),
            frames.used_frame_count()
        );
        Ok(())
    }

    pub fn log_memory_map(&self) {
        let Some(map) = self.memory_map else {
            log::info!(
                "No memory map, {} KiB lower / {} KiB upper",
                self.info.mem_lower,
                self.info.mem_upper
            );
            return;
        };
        for region in map.regions() {
            log::info!(
                "  {:#012x} - {:#012x} {}",
                region.base,
                region.base.saturating_add(region.length),
                region.kind
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::memory::FRAME_SIZE;
    use alloc::vec::Vec;

    fn push_entry(map: &mut Vec<u8>, base: u64, length: u64, kind: u32) {
        map.extend_from_slice(&20u32.to_le_bytes());
        map.extend_from_slice(&base.to_le_bytes());
        map.extend_from_slice(&length.to_le_bytes());
        map.extend_from_slice(&kind.to_le_bytes());
    }

    fn qemu_like_map() -> Vec<u8> {
        let mut map = Vec::new();
        push_entry(&mut map, 0, 0x9_FC00, 1);
        push_entry(&mut map, 0x9_FC00, 0x400, 2);
        push_entry(&mut map, 0xF_0000, 0x1_0000, 2);
        push_entry(&mut map, 0x10_0000, 0x7EE_0000, 1);
        push_entry(&mut map, 0x7FE_0000, 0x2_0000, 2);
        push_entry(&mut map, 0xFFFC_0000, 0x4_0000, 2);
        map
    }

    fn boot_info(map: &[u8]) -> BootInfo<'_> {
        BootInfo {
            info: MultibootInfo {
                flags: INFO_MEMORY | INFO_MEMORY_MAP,
                ..Default::default()
            },
            memory_map: Some(MemoryMap::from_bytes(map)),
        }
    }

    #[test]
    fn magic_is_checked() {
        assert_eq!(BootInfo::validate(0x2BAD_B002, 0x9500), Ok(()));
        assert_eq!(
            BootInfo::validate(0x1234, 0x9500),
            Err(BootError::BadMagic(0x1234))
        );
        assert_eq!(
            BootInfo::validate(0x2BAD_B002, 0),
            Err(BootError::Unreachable(0))
        );
    }

    #[test]
    fn walks_every_entry() {
        let map = qemu_like_map();
        let regions: Vec<_> = MemoryMap::from_bytes(&map).regions().collect();

        assert_eq!(regions.len(), 6);
        assert_eq!(
            regions[3],
            MemoryRegion {
                base: 0x10_0000,
                length: 0x7EE_0000,
                kind: RegionKind::Available,
            }
        );
        assert_eq!(regions[5].kind, RegionKind::Reserved);
    }

    #[test]
    fn honours_entry_size_prefix() {
        // a 24-byte entry (extra padding) followed by a normal one
        let mut map = Vec::new();
        map.extend_from_slice(&24u32.to_le_bytes());
        map.extend_from_slice(&0x1000u64.to_le_bytes());
        map.extend_from_slice(&0x2000u64.to_le_bytes());
        map.extend_from_slice(&3u32.to_le_bytes());
        map.extend_from_slice(&[0xFF; 4]);
        push_entry(&mut map, 0x5000, 0x1000, 7);

        let regions: Vec<_> = MemoryMap::from_bytes(&map).regions().collect();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].kind, RegionKind::AcpiReclaimable);
        assert_eq!(regions[1].base, 0x5000);
        assert_eq!(regions[1].kind, RegionKind::Unknown(7));
    }

    #[test]
    fn stops_at_truncated_entry() {
        let mut map = qemu_like_map();
        map.truncate(map.len() - 3);
        assert_eq!(MemoryMap::from_bytes(&map).regions().count(), 5);

        let mut bogus = Vec::new();
        bogus.extend_from_slice(&4u32.to_le_bytes());
        bogus.extend_from_slice(&[0; 4]);
        assert_eq!(MemoryMap::from_bytes(&bogus).regions().count(), 0);
    }

    #[test]
    fn memory_map_seeds_frame_allocator() {
        let map = qemu_like_map();
        let mut frames = alloc::boxed::Box::new(BitmapFrameAllocator::new());
        boot_info(&map).apply_memory_map(&mut frames).unwrap();

        // low memory is always reserved, even the usable part
        assert!(frames.is_frame_used(0));
        assert!(frames.is_frame_used(0x5_0000));
        assert!(frames.is_frame_used(0xF_F000));

        assert!(!frames.is_frame_used(0x10_0000));
        assert!(!frames.is_frame_used(0x7FD_F000));
        assert!(frames.is_frame_used(0x7FE_0000));
        assert!(frames.is_frame_used(0xFFFC_0000));

        let usable = 0x7EE_0000 / FRAME_SIZE as usize;
        assert_eq!(frames.free_frame_count(), usable);
    }

    #[test]
    fn reserved_entries_win_over_available_ones() {
        let mut map = Vec::new();
        push_entry(&mut map, 0x10_0000, 0x10_0000, 1);
        push_entry(&mut map, 0x18_0000, 0x1000, 5);

        let mut frames = alloc::boxed::Box::new(BitmapFrameAllocator::new());
        boot_info(&map).apply_memory_map(&mut frames).unwrap();
        assert!(frames.is_frame_used(0x18_0000));
        assert_eq!(frames.free_frame_count(), 0x100 - 1);
    }

    #[test]
    fn falls_back_to_mem_upper() {
        let info = BootInfo {
            info: MultibootInfo {
                flags: INFO_MEMORY,
                mem_upper: 1024,
                ..Default::default()
            },
            memory_map: None,
        };
        let mut frames = alloc::boxed::Box::new(BitmapFrameAllocator::new());
        info.apply_memory_map(&mut frames).unwrap();
        assert_eq!(frames.free_frame_count(), 256);
        assert!(!frames.is_frame_used(0x10_0000));
        assert!(frames.is_frame_used(0x20_0000));

        let nothing = BootInfo {
            info: MultibootInfo::default(),
            memory_map: None,
        };
        assert_eq!(
            nothing.apply_memory_map(&mut frames),
            Err(BootError::MissingMemoryMap)
        );
    }
}
