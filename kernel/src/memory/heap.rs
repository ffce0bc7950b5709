//! The Kernel Heap
//!
//! A first-fit allocator over one contiguous arena. The arena is carved into
//! chunks, each a header followed by its payload, linked in address order so
//! the list always tiles the whole arena. Allocations are split off the
//! *tail* of the first free chunk that is big enough; frees coalesce with
//! both neighbours immediately, so two free chunks are never adjacent.

use core::{
    alloc::{GlobalAlloc, Layout},
    fmt,
    mem::size_of,
    ptr::{self, NonNull},
};

use spin::{Mutex, MutexGuard};

use crate::{
    arch::without_interrupts,
    constants::memory::{KHEAP_SIZE, KHEAP_START, PAGE_SIZE},
    memory::{
        bitmap_frame_allocator::BitmapFrameAllocator,
        frame_allocator::with_frame_allocator,
        paging::{with_kernel_paging, PageFlags, Paging, PagingError},
    },
};

const CHUNK_FREE: u32 = 0x4652_4545;
const CHUNK_USED: u32 = 0x5553_4544;
/// Written over headers swallowed by a merge, so stale pointers are caught.
const CHUNK_RETIRED: u32 = 0;
const NIL: u32 = u32::MAX;

/// Payloads start and end on this boundary.
pub const CHUNK_ALIGN: usize = 8;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct ChunkHeader {
    previous: u32,
    next: u32,
    size: u32,
    state: u32,
}

pub const HEADER_SIZE: usize = size_of::<ChunkHeader>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// No free chunk can hold the request.
    OutOfMemory,
    /// The pointer is not the payload of any chunk in this heap.
    InvalidPointer(usize),
    /// The chunk is already free.
    DoubleFree(usize),
    /// Backing the arena ran out of physical frames.
    OutOfFrames,
    Paging(PagingError),
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::OutOfMemory => write!(f, "heap exhausted"),
            HeapError::InvalidPointer(addr) => write!(f, "{:#x} is not a heap allocation", addr),
            HeapError::DoubleFree(addr) => write!(f, "double free of {:#x}", addr),
            HeapError::OutOfFrames => write!(f, "no frames left to back the heap"),
            HeapError::Paging(err) => write!(f, "mapping the heap failed: {}", err),
        }
    }
}

impl From<PagingError> for HeapError {
    fn from(err: PagingError) -> Self {
        HeapError::Paging(err)
    }
}

/// One chunk as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Address of the payload.
    pub address: usize,
    /// Usable bytes, header excluded.
    pub size: usize,
    pub used: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub arena_size: usize,
    pub chunks: usize,
    pub used_chunks: usize,
    pub free_chunks: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
}

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

pub struct Heap {
    base: usize,
    size: usize,
    first: Option<u32>,
}

// The heap owns its arena; all access goes through `&mut self`.
unsafe impl Send for Heap {}

impl Heap {
    pub const fn empty() -> Self {
        Self {
            base: 0,
            size: 0,
            first: None,
        }
    }

    /// Takes over `[base, base + size)` as one free chunk.
    ///
    /// # Safety
    ///
    /// The range must be mapped, writable, unused by anything else and live
    /// for as long as the heap does.
    pub unsafe fn init(&mut self, base: *mut u8, size: usize) {
        let start = align_up(base as usize, CHUNK_ALIGN);
        let size = align_down(size.saturating_sub(start - base as usize), CHUNK_ALIGN)
            .min(u32::MAX as usize);
        assert!(size > HEADER_SIZE, "heap arena of {} bytes is too small", size);

        self.base = start;
        self.size = size;
        self.write_chunk(
            0,
            ChunkHeader {
                previous: NIL,
                next: NIL,
                size: (size - HEADER_SIZE) as u32,
                state: CHUNK_FREE,
            },
        );
        self.first = Some(0);
    }

    pub fn arena(&self) -> (usize, usize) {
        (self.base, self.size)
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + self.size
    }

    fn read_chunk(&self, offset: u32) -> ChunkHeader {
        unsafe { ptr::read((self.base + offset as usize) as *const ChunkHeader) }
    }

    fn write_chunk(&mut self, offset: u32, header: ChunkHeader) {
        unsafe { ptr::write((self.base + offset as usize) as *mut ChunkHeader, header) }
    }

    fn set_previous(&mut self, offset: u32, previous: u32) {
        let mut header = self.read_chunk(offset);
        header.previous = previous;
        self.write_chunk(offset, header);
    }

    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.alloc_aligned(size, CHUNK_ALIGN)
    }

    /// First fit, split at the tail of the chunk.
    ///
    /// A chunk qualifies only if something is left in front of the split, so
    /// the first chunk of the arena is never handed out. Alignment slack
    /// stays inside the allocated chunk.
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, HeapError> {
        let align = align.max(CHUNK_ALIGN);
        if !align.is_power_of_two() || size > self.size {
            return Err(HeapError::OutOfMemory);
        }
        let size = align_up(size.max(1), CHUNK_ALIGN);

        let mut cursor = self.first;
        while let Some(offset) = cursor {
            let mut chunk = self.read_chunk(offset);
            cursor = (chunk.next != NIL).then_some(chunk.next);

            if chunk.state != CHUNK_FREE || chunk.size as usize <= size + HEADER_SIZE {
                continue;
            }

            let chunk_start = self.base + offset as usize;
            let payload_start = chunk_start + HEADER_SIZE;
            let chunk_end = payload_start + chunk.size as usize;
            let user = align_down(chunk_end - size, align);
            let Some(split) = user.checked_sub(HEADER_SIZE) else {
                continue;
            };
            if split <= payload_start {
                continue;
            }

            let new_offset = (split - self.base) as u32;
            self.write_chunk(
                new_offset,
                ChunkHeader {
                    previous: offset,
                    next: chunk.next,
                    size: (chunk_end - user) as u32,
                    state: CHUNK_USED,
                },
            );
            if chunk.next != NIL {
                self.set_previous(chunk.next, new_offset);
            }
            chunk.next = new_offset;
            chunk.size = (split - payload_start) as u32;
            self.write_chunk(offset, chunk);

            return NonNull::new(user as *mut u8).ok_or(HeapError::OutOfMemory);
        }

        Err(HeapError::OutOfMemory)
    }

    /// Finds the chunk whose payload starts at `addr`, checking that the
    /// header really belongs to the list.
    fn chunk_of(&self, addr: usize) -> Result<u32, HeapError> {
        let invalid = HeapError::InvalidPointer(addr);
        if self.first.is_none() || addr < self.base + HEADER_SIZE || addr >= self.base + self.size
        {
            return Err(invalid);
        }
        let offset = addr - HEADER_SIZE - self.base;
        if offset % CHUNK_ALIGN != 0 {
            return Err(invalid);
        }

        let offset = offset as u32;
        let header = self.read_chunk(offset);
        let end = offset as usize + HEADER_SIZE + header.size as usize;
        if (header.state != CHUNK_USED && header.state != CHUNK_FREE) || end > self.size {
            return Err(invalid);
        }
        // chunks tile the arena, so a genuine header links to its exact neighbours
        let next_in_place = if header.next == NIL {
            end == self.size
        } else {
            header.next as usize == end
        };
        // chunk 0 is never allocated, so a real chunk always has a predecessor
        if !next_in_place
            || header.previous == NIL
            || header.previous >= offset
            || header.previous as usize % CHUNK_ALIGN != 0
        {
            return Err(invalid);
        }
        if self.read_chunk(header.previous).next != offset {
            return Err(invalid);
        }
        if header.state == CHUNK_FREE {
            return Err(HeapError::DoubleFree(addr));
        }
        Ok(offset)
    }

    /// Folds `absorbed` (the chunk right after `into`) into `into`.
    fn merge(&mut self, into: u32, absorbed: u32) {
        let mut front = self.read_chunk(into);
        let mut back = self.read_chunk(absorbed);

        front.size += (HEADER_SIZE as u32) + back.size;
        front.next = back.next;
        self.write_chunk(into, front);
        if back.next != NIL {
            self.set_previous(back.next, into);
        }

        back.state = CHUNK_RETIRED;
        self.write_chunk(absorbed, back);
    }

    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        let mut offset = self.chunk_of(ptr.as_ptr() as usize)?;

        let mut chunk = self.read_chunk(offset);
        chunk.state = CHUNK_FREE;
        self.write_chunk(offset, chunk);

        if chunk.next != NIL && self.read_chunk(chunk.next).state == CHUNK_FREE {
            self.merge(offset, chunk.next);
        }

        let chunk = self.read_chunk(offset);
        if chunk.previous != NIL && self.read_chunk(chunk.previous).state == CHUNK_FREE {
            self.merge(chunk.previous, offset);
            offset = chunk.previous;
        }

        log::trace!(
            "heap: {:#x} bytes free at {:#x}",
            self.read_chunk(offset).size,
            self.base + offset as usize
        );
        Ok(())
    }

    /// Walks the chunk list in address order.
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks {
            heap: self,
            cursor: self.first,
        }
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            arena_size: self.size,
            ..HeapStats::default()
        };
        for chunk in self.chunks() {
            stats.chunks += 1;
            if chunk.used {
                stats.used_chunks += 1;
                stats.used_bytes += chunk.size;
            } else {
                stats.free_chunks += 1;
                stats.free_bytes += chunk.size;
                stats.largest_free = stats.largest_free.max(chunk.size);
            }
        }
        stats
    }

    pub fn log_status(&self) {
        log::info!("--- Kernel Heap Status ---");
        if self.first.is_none() {
            log::info!("Heap is empty or uninitialized");
            return;
        }

        for (i, chunk) in self.chunks().enumerate() {
            log::info!(
                "Chunk #{} at {:#010x}: {} {:#x} bytes",
                i + 1,
                chunk.address - HEADER_SIZE,
                if chunk.used { "USED" } else { "FREE" },
                chunk.size
            );
        }

        let stats = self.stats();
        log::info!(
            "--- End of Heap Status (chunks: {}, free: {:#x}, largest free: {:#x}) ---",
            stats.chunks,
            stats.free_bytes,
            stats.largest_free
        );
    }
}

pub struct Chunks<'a> {
    heap: &'a Heap,
    cursor: Option<u32>,
}

impl Iterator for Chunks<'_> {
    type Item = ChunkInfo;

    fn next(&mut self) -> Option<ChunkInfo> {
        let offset = self.cursor?;
        let header = self.heap.read_chunk(offset);
        self.cursor = (header.next != NIL).then_some(header.next);
        Some(ChunkInfo {
            address: self.heap.base + offset as usize + HEADER_SIZE,
            size: header.size as usize,
            used: header.state == CHUNK_USED,
        })
    }
}

/// The kernel heap behind a spinlock, usable as the global allocator.
pub struct LockedHeap(Mutex<Heap>);

impl LockedHeap {
    pub const fn empty() -> Self {
        Self(Mutex::new(Heap::empty()))
    }

    /// # Safety
    ///
    /// See [`Heap::init`].
    pub unsafe fn init(&self, base: *mut u8, size: usize) {
        self.0.lock().init(base, size);
    }

    pub fn lock(&self) -> MutexGuard<'_, Heap> {
        self.0.lock()
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        without_interrupts(|| {
            self.0
                .lock()
                .alloc_aligned(layout.size(), layout.align())
                .map_or(ptr::null_mut(), NonNull::as_ptr)
        })
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else { return };
        without_interrupts(|| {
            if let Err(err) = self.0.lock().free(ptr) {
                log::error!("heap: {}", err);
            }
        })
    }
}

#[cfg_attr(target_os = "none", global_allocator)]
pub static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Allocates `size` bytes from the kernel heap.
pub fn kalloc(size: usize) -> Result<NonNull<u8>, HeapError> {
    without_interrupts(|| ALLOCATOR.lock().alloc(size))
}

/// Returns memory obtained from [`kalloc`]. A null pointer is ignored.
pub fn kfree(ptr: *mut u8) -> Result<(), HeapError> {
    let Some(ptr) = NonNull::new(ptr) else {
        return Ok(());
    };
    without_interrupts(|| ALLOCATOR.lock().free(ptr))
}

/// Maps every page of `[start, start + size)` to a freshly allocated frame.
pub fn back_arena(
    paging: &mut Paging,
    frames: &mut BitmapFrameAllocator,
    start: u32,
    size: u32,
) -> Result<(), HeapError> {
    let flags = PageFlags::PRESENT | PageFlags::WRITABLE;
    for page in 0..size.div_ceil(PAGE_SIZE) {
        let frame = frames.alloc_frame().ok_or(HeapError::OutOfFrames)?;
        paging.map_page(frames, start + page * PAGE_SIZE, frame, flags)?;
    }
    Ok(())
}

/// Backs the kernel heap arena and hands it to the global allocator.
///
/// Fails if the arena cannot be fully mapped.
pub fn init_heap() -> Result<(), HeapError> {
    with_kernel_paging(|paging| {
        with_frame_allocator(|frames| back_arena(paging, frames, KHEAP_START, KHEAP_SIZE))
    })?;

    unsafe { ALLOCATOR.init(KHEAP_START as *mut u8, KHEAP_SIZE as usize) };
    log::info!(
        "Kernel heap at {:#010x}, {} KiB",
        KHEAP_START,
        KHEAP_SIZE / 1024
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::paging::{tests::FakeMemory, PageDirectory};
    use alloc::{boxed::Box, vec, vec::Vec};
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    const MIB: usize = 1024 * 1024;

    struct TestHeap {
        _arena: Vec<u64>,
        heap: Heap,
    }

    impl TestHeap {
        fn new(size: usize) -> Self {
            let mut arena = vec![0u64; size / 8];
            let mut heap = Heap::empty();
            unsafe { heap.init(arena.as_mut_ptr().cast(), size) };
            Self {
                _arena: arena,
                heap,
            }
        }
    }

    /// Chunk sizes plus headers tile the arena, and no two free chunks touch.
    fn assert_well_formed(heap: &Heap) {
        let chunks: Vec<ChunkInfo> = heap.chunks().collect();
        let total: usize = chunks.iter().map(|c| c.size + HEADER_SIZE).sum();
        assert_eq!(total, heap.arena().1);

        let mut expected = heap.arena().0 + HEADER_SIZE;
        for pair in chunks.windows(2) {
            assert!(pair[0].used || pair[1].used, "adjacent free chunks");
        }
        for chunk in &chunks {
            assert_eq!(chunk.address, expected);
            expected += chunk.size + HEADER_SIZE;
        }
    }

    #[test]
    fn init_creates_single_free_chunk() {
        let t = TestHeap::new(MIB);
        let chunks: Vec<ChunkInfo> = t.heap.chunks().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].size, MIB - HEADER_SIZE);
        assert!(!chunks[0].used);
    }

    #[test]
    fn tail_split_places_second_allocation_below_first() {
        let mut t = TestHeap::new(MIB);
        let (base, size) = t.heap.arena();

        let p1 = t.heap.alloc(64).unwrap().as_ptr() as usize;
        let p2 = t.heap.alloc(128).unwrap().as_ptr() as usize;
        assert_eq!(p1, base + size - 64);
        assert_ne!(p1, p2);
        assert_eq!(p1 - p2, 128 + HEADER_SIZE);
        assert_well_formed(&t.heap);

        let free_before = t.heap.stats().free_bytes;
        t.heap.free(NonNull::new(p1 as *mut u8).unwrap()).unwrap();
        assert_eq!(t.heap.stats().free_bytes, free_before + 64);

        let p3 = t.heap.alloc(64).unwrap().as_ptr() as usize;
        assert_eq!(p3, p2 - HEADER_SIZE - 64);
        assert_eq!(t.heap.stats().free_bytes, free_before - HEADER_SIZE);
        assert_well_formed(&t.heap);
    }

    #[test]
    fn coalescing_is_order_independent() {
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut t = TestHeap::new(64 * 1024);
            let ptrs: Vec<NonNull<u8>> = (0..3).map(|_| t.heap.alloc(256).unwrap()).collect();
            // contiguous, each directly below the previous
            assert_eq!(
                ptrs[0].as_ptr() as usize - ptrs[1].as_ptr() as usize,
                256 + HEADER_SIZE
            );
            assert_eq!(
                ptrs[1].as_ptr() as usize - ptrs[2].as_ptr() as usize,
                256 + HEADER_SIZE
            );

            for index in order {
                t.heap.free(ptrs[index]).unwrap();
                assert_well_formed(&t.heap);
            }

            let chunks: Vec<ChunkInfo> = t.heap.chunks().collect();
            assert_eq!(chunks.len(), 1, "order {:?}", order);
            assert_eq!(chunks[0].size, 64 * 1024 - HEADER_SIZE);
        }
    }

    #[test]
    fn random_alloc_free_conserves_arena() {
        let mut t = TestHeap::new(256 * 1024);
        let mut rng = SmallRng::seed_from_u64(0xC0FFEE);
        let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

        for step in 0..4000 {
            if live.is_empty() || rng.gen_bool(0.55) {
                let size = rng.gen_range(1..2048);
                match t.heap.alloc(size) {
                    Ok(ptr) => {
                        let fill = step as u8;
                        unsafe { ptr.as_ptr().write_bytes(fill, size) };
                        live.push((ptr, size, fill));
                    }
                    Err(HeapError::OutOfMemory) => {}
                    Err(err) => panic!("unexpected {:?}", err),
                }
            } else {
                let (ptr, size, fill) = live.swap_remove(rng.gen_range(0..live.len()));
                let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), size) };
                assert!(bytes.iter().all(|b| *b == fill), "payload clobbered");
                t.heap.free(ptr).unwrap();
            }
            assert_well_formed(&t.heap);
        }

        for (ptr, _, _) in live.drain(..) {
            t.heap.free(ptr).unwrap();
        }
        assert_eq!(t.heap.stats().chunks, 1);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut t = TestHeap::new(4096);
        let whole = 4096 - HEADER_SIZE;

        assert_eq!(t.heap.alloc(whole), Err(HeapError::OutOfMemory));
        // the request plus its header must leave something in front
        assert_eq!(t.heap.alloc(whole - HEADER_SIZE), Err(HeapError::OutOfMemory));
        assert!(t.heap.alloc(whole - HEADER_SIZE - CHUNK_ALIGN).is_ok());
        assert_eq!(t.heap.alloc(1), Err(HeapError::OutOfMemory));
        assert_eq!(Heap::empty().alloc(8), Err(HeapError::OutOfMemory));
    }

    #[test]
    fn sizes_round_up_to_chunk_alignment() {
        let mut t = TestHeap::new(4096);
        let a = t.heap.alloc(1).unwrap().as_ptr() as usize;
        let b = t.heap.alloc(0).unwrap().as_ptr() as usize;
        assert_eq!(a % CHUNK_ALIGN, 0);
        assert_eq!(a - b, CHUNK_ALIGN + HEADER_SIZE);
    }

    #[test]
    fn aligned_allocation_keeps_slack_in_chunk() {
        let mut t = TestHeap::new(64 * 1024);
        let p = t.heap.alloc_aligned(100, 4096).unwrap().as_ptr() as usize;
        assert_eq!(p % 4096, 0);
        assert_well_formed(&t.heap);

        let chunk = t.heap.chunks().find(|c| c.address == p).unwrap();
        assert!(chunk.used);
        assert!(chunk.size >= 100);
        t.heap.free(NonNull::new(p as *mut u8).unwrap()).unwrap();
        assert_eq!(t.heap.stats().chunks, 1);
    }

    #[test]
    fn bad_frees_are_rejected() {
        let mut t = TestHeap::new(4096);
        let p = t.heap.alloc(64).unwrap();
        let addr = p.as_ptr() as usize;

        let inside = NonNull::new((addr + 8) as *mut u8).unwrap();
        assert_eq!(t.heap.free(inside), Err(HeapError::InvalidPointer(addr + 8)));

        let mut outside = 0u64;
        let outside = NonNull::from(&mut outside).cast::<u8>();
        assert!(matches!(t.heap.free(outside), Err(HeapError::InvalidPointer(_))));

        // the first chunk is never an allocation
        let first = NonNull::new((t.heap.arena().0 + HEADER_SIZE) as *mut u8).unwrap();
        assert_eq!(
            t.heap.free(first),
            Err(HeapError::InvalidPointer(first.as_ptr() as usize))
        );

        t.heap.free(p).unwrap();
        // merged away into the first chunk
        assert_eq!(t.heap.free(p), Err(HeapError::InvalidPointer(addr)));
        assert_well_formed(&t.heap);
    }

    #[test]
    fn header_shaped_payload_is_not_followed() {
        let mut t = TestHeap::new(4096);
        let p = t.heap.alloc(256).unwrap();
        let offset = p.as_ptr() as usize - t.heap.arena().0;
        // next is consistent, previous points far outside the arena
        let forged = ChunkHeader {
            previous: 0x4000_0000,
            next: (offset + HEADER_SIZE + 8) as u32,
            size: 8,
            state: CHUNK_USED,
        };
        unsafe { ptr::write(p.as_ptr().cast::<ChunkHeader>(), forged) };

        let interior = (p.as_ptr() as usize) + HEADER_SIZE;
        let interior_ptr = NonNull::new(interior as *mut u8).unwrap();
        assert_eq!(
            t.heap.free(interior_ptr),
            Err(HeapError::InvalidPointer(interior))
        );

        // a plausible predecessor, but it claims to be the last chunk
        let forged = ChunkHeader {
            previous: 0,
            next: NIL,
            size: 8,
            state: CHUNK_USED,
        };
        unsafe { ptr::write(p.as_ptr().cast::<ChunkHeader>(), forged) };
        assert_eq!(
            t.heap.free(interior_ptr),
            Err(HeapError::InvalidPointer(interior))
        );

        t.heap.free(p).unwrap();
        assert_well_formed(&t.heap);
    }

    #[test]
    fn double_free_of_unmerged_chunk_is_detected() {
        let mut t = TestHeap::new(4096);
        let a = t.heap.alloc(64).unwrap();
        let _b = t.heap.alloc(64).unwrap();
        // a is last in the arena; its previous neighbour b stays used
        t.heap.free(a).unwrap();
        assert_eq!(
            t.heap.free(a),
            Err(HeapError::DoubleFree(a.as_ptr() as usize))
        );
    }

    #[test]
    fn locked_heap_serves_global_alloc() {
        let mut arena = vec![0u64; 8192 / 8];
        let heap = LockedHeap::empty();
        unsafe { heap.init(arena.as_mut_ptr().cast(), 8192) };

        let layout = Layout::from_size_align(200, 64).unwrap();
        let ptr = unsafe { heap.alloc(layout) };
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % 64, 0);

        let too_big = Layout::from_size_align(16 * 1024, 8).unwrap();
        assert!(unsafe { heap.alloc(too_big) }.is_null());

        unsafe { heap.dealloc(ptr, layout) };
        assert_eq!(heap.lock().stats().chunks, 1);
    }

    #[test]
    fn back_arena_maps_distinct_frames() {
        let mut memory = FakeMemory::new(8);
        let mut frames = memory.allocator();
        let mut directory = Box::new(PageDirectory::new());
        let mut paging = unsafe { Paging::new(NonNull::from(&mut *directory), memory.window()) };

        back_arena(&mut paging, &mut frames, 0x0040_0000, 3 * PAGE_SIZE).unwrap();

        let mut seen = Vec::new();
        for page in 0..3 {
            let frame = paging.translate(0x0040_0000 + page * PAGE_SIZE).unwrap();
            assert!(frames.is_frame_used(frame));
            assert!(!seen.contains(&frame));
            seen.push(frame);
        }
        assert_eq!(paging.translate(0x0040_3000), None);
    }

    #[test]
    fn back_arena_reports_exhaustion() {
        let mut memory = FakeMemory::new(2);
        let mut frames = memory.allocator();
        let mut directory = Box::new(PageDirectory::new());
        let mut paging = unsafe { Paging::new(NonNull::from(&mut *directory), memory.window()) };

        // one frame for the table, one for the first page, then nothing
        assert_eq!(
            back_arena(&mut paging, &mut frames, 0x0040_0000, 2 * PAGE_SIZE),
            Err(HeapError::OutOfFrames)
        );
    }
}
