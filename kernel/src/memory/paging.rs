//! Two-level 32-bit paging: page directories, page tables and the fault handler.
//!
//! A linear address splits into `| directory (10) | table (10) | offset (12) |`.
//! Directories keep two views of their tables: the hardware entries CR3 walks
//! (physical address | flags) and kernel pointers used to edit them.

use core::{
    fmt,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use arrayvec::ArrayVec;
use bitflags::bitflags;
use spin::Mutex;
use x86_64::structures::idt::PageFaultErrorCode;

use crate::{
    arch::{self, without_interrupts},
    constants::{
        idt::PAGE_FAULT_VECTOR,
        memory::{
            FRAME_ADDRESS_MASK, KERNEL_VIRTUAL_BASE, LOW_MEMORY_LIMIT, PAGE_OFFSET_MASK,
            PAGE_SIZE, PAGING_ENTRIES, VGA_BUFFER_PHYS, VGA_BUFFER_VIRT,
        },
    },
    interrupts,
    memory::{bitmap_frame_allocator::BitmapFrameAllocator, KernelImage},
    processes::registers::InterruptFrame,
};

bitflags! {
    /// Low twelve bits of a directory or table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        /// 4 MiB page; only meaningful in a directory entry with CR4.PSE set.
        const HUGE = 1 << 7;
        const GLOBAL = 1 << 8;
    }
}

#[inline]
pub const fn directory_index(addr: u32) -> usize {
    (addr >> 22) as usize
}

#[inline]
pub const fn table_index(addr: u32) -> usize {
    ((addr >> 12) & 0x3FF) as usize
}

#[inline]
pub const fn page_offset(addr: u32) -> u32 {
    addr & PAGE_OFFSET_MASK
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// A page table was needed and the frame allocator had nothing left.
    OutOfFrames,
    /// A table frame landed outside the physical window, so it cannot be zeroed.
    OutsideWindow(u32),
}

impl fmt::Display for PagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PagingError::OutOfFrames => write!(f, "no free frame for a page table"),
            PagingError::OutsideWindow(addr) => {
                write!(f, "frame {:#010x} is outside the physical window", addr)
            }
        }
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn new(paddr: u32, flags: PageFlags) -> Self {
        Self((paddr & FRAME_ADDRESS_MASK) | (flags.bits() & PAGE_OFFSET_MASK))
    }

    pub fn set(&mut self, paddr: u32, flags: PageFlags) {
        *self = Self::new(paddr, flags);
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn frame(self) -> u32 {
        self.0 & FRAME_ADDRESS_MASK
    }

    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0)
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(PageFlags::PRESENT)
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("frame", &format_args!("{:#010x}", self.frame()))
            .field("flags", &self.flags())
            .finish()
    }
}

/// 1024 entries covering 4 MiB.
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [PageTableEntry; PAGING_ENTRIES],
}

impl PageTable {
    pub const fn new() -> Self {
        Self {
            entries: [PageTableEntry::empty(); PAGING_ENTRIES],
        }
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A span of physical memory the kernel can always reach at a fixed virtual offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalWindow {
    offset: usize,
    limit: u32,
}

impl PhysicalWindow {
    /// Physical `[0, limit)` appears at virtual `[offset, offset + limit)`.
    pub const fn new(offset: usize, limit: u32) -> Self {
        Self { offset, limit }
    }

    pub const fn offset(&self) -> usize {
        self.offset
    }

    pub const fn limit(&self) -> u32 {
        self.limit
    }

    pub fn to_virt(&self, paddr: u32) -> Option<*mut u8> {
        (paddr < self.limit).then(|| (self.offset + paddr as usize) as *mut u8)
    }

    pub fn to_phys(&self, vaddr: usize) -> Option<u32> {
        vaddr
            .checked_sub(self.offset)
            .filter(|paddr| *paddr < self.limit as usize)
            .map(|paddr| paddr as u32)
    }
}

#[repr(C, align(4096))]
pub struct PageDirectory {
    /// Hardware view: table physical address | flags. Must stay first so
    /// `physical_addr` is the address of this array.
    tables_physical: [u32; PAGING_ENTRIES],
    /// Kernel view of the same tables.
    tables: [Option<NonNull<PageTable>>; PAGING_ENTRIES],
    physical_addr: u32,
}

// Table pointers are only dereferenced under the owner's lock.
unsafe impl Send for PageDirectory {}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PageDirectory {
    pub const fn new() -> Self {
        Self {
            tables_physical: [0; PAGING_ENTRIES],
            tables: [None; PAGING_ENTRIES],
            physical_addr: 0,
        }
    }

    /// Physical address loaded into CR3.
    pub fn physical_addr(&self) -> u32 {
        self.physical_addr
    }

    pub fn set_physical_address(&mut self, physical_addr: u32) {
        self.physical_addr = physical_addr;
    }

    /// Raw hardware entry for directory slot `index`.
    pub fn table_entry(&self, index: usize) -> u32 {
        self.tables_physical[index]
    }

    pub fn has_table(&self, index: usize) -> bool {
        self.tables[index].is_some()
    }

    /// Installs `table` in slot `index`.
    ///
    /// # Safety
    ///
    /// `table` must point to a live page table whose physical address is
    /// `table_phys`, and must outlive this directory.
    pub unsafe fn set_table(
        &mut self,
        index: usize,
        table: NonNull<PageTable>,
        table_phys: u32,
        flags: PageFlags,
    ) {
        self.tables[index] = Some(table);
        self.tables_physical[index] = PageTableEntry::new(table_phys, flags).raw();
    }

    fn table(&self, vaddr: u32) -> Option<&PageTable> {
        self.tables[directory_index(vaddr)].map(|table| unsafe { &*table.as_ptr() })
    }

    fn table_mut(&mut self, vaddr: u32) -> Option<&mut PageTable> {
        self.tables[directory_index(vaddr)].map(|table| unsafe { &mut *table.as_ptr() })
    }

    /// The table for `vaddr`, allocating and zeroing a new one if the slot is empty.
    fn table_or_create(
        &mut self,
        vaddr: u32,
        frames: &mut BitmapFrameAllocator,
        window: &PhysicalWindow,
    ) -> Result<&mut PageTable, PagingError> {
        let index = directory_index(vaddr);
        if self.tables[index].is_none() {
            let table_phys = frames.alloc_frame().ok_or(PagingError::OutOfFrames)?;
            let Some(table_virt) = window.to_virt(table_phys) else {
                let _ = frames.free_frame(table_phys);
                return Err(PagingError::OutsideWindow(table_phys));
            };

            let table = table_virt.cast::<PageTable>();
            unsafe {
                table.write(PageTable::new());
                self.set_table(
                    index,
                    NonNull::new_unchecked(table),
                    table_phys,
                    PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
                );
            }
            log::debug!(
                "paging: new table for slot {} at {:#010x}",
                index,
                table_phys
            );
        }

        self.table_mut(vaddr).ok_or(PagingError::OutOfFrames)
    }

    /// Maps the page containing `vaddr` to the frame containing `paddr`.
    ///
    /// The frame is marked used in `frames`; a frame that is already in use
    /// is mapped all the same.
    pub fn map_page(
        &mut self,
        vaddr: u32,
        paddr: u32,
        flags: PageFlags,
        frames: &mut BitmapFrameAllocator,
        window: &PhysicalWindow,
    ) -> Result<(), PagingError> {
        let _ = frames.alloc_frame_at(paddr);
        let table = self.table_or_create(vaddr, frames, window)?;
        table.entries[table_index(vaddr)].set(paddr, flags);
        Ok(())
    }

    /// Zeroes the entry for `vaddr` and returns the frame it pointed to.
    ///
    /// Tables are never reclaimed, even when they become empty.
    pub fn unmap_page(&mut self, vaddr: u32) -> Option<u32> {
        let entry = &mut self.table_mut(vaddr)?.entries[table_index(vaddr)];
        let previous = *entry;
        entry.clear();
        previous.is_present().then(|| previous.frame())
    }

    pub fn entry(&self, vaddr: u32) -> Option<PageTableEntry> {
        self.table(vaddr).map(|table| table.entries[table_index(vaddr)])
    }

    /// Physical address `vaddr` currently resolves to.
    pub fn translate(&self, vaddr: u32) -> Option<u32> {
        self.entry(vaddr)
            .filter(|entry| entry.is_present())
            .map(|entry| entry.frame() | page_offset(vaddr))
    }

    /// Logs every present mapping.
    pub fn log_mappings(&self) {
        log::info!("Page directory at {:#010x}", self.physical_addr);
        for (dir_index, table) in self.tables.iter().enumerate() {
            let Some(table) = table else { continue };
            let table = unsafe { table.as_ref() };
            let present = table.entries.iter().filter(|e| e.is_present()).count();
            if present == 0 {
                continue;
            }
            log::info!(
                "  slot {:4}: {:#010x}, {} pages present",
                dir_index,
                self.tables_physical[dir_index] & FRAME_ADDRESS_MASK,
                present
            );
        }
    }
}

/// Address of the directory CR3 points at, or 0 before paging is on.
static CURRENT_DIRECTORY: AtomicUsize = AtomicUsize::new(0);

/// The directory the CPU is translating through.
pub fn current_directory() -> Option<NonNull<PageDirectory>> {
    NonNull::new(CURRENT_DIRECTORY.load(Ordering::Acquire) as *mut PageDirectory)
}

fn is_current(directory: &PageDirectory) -> bool {
    CURRENT_DIRECTORY.load(Ordering::Acquire) == directory as *const PageDirectory as usize
}

/// Load CR3 with `directory` and turn paging on.
///
/// # Safety
///
/// The directory must map the running code, its stack and everything the
/// kernel touches afterwards.
pub unsafe fn switch_page_directory(directory: &PageDirectory) {
    CURRENT_DIRECTORY.store(directory as *const PageDirectory as usize, Ordering::Release);
    arch::load_page_directory(directory.physical_addr());
    arch::enable_paging();
}

/// A page directory together with the window used to reach its tables.
pub struct Paging {
    directory: NonNull<PageDirectory>,
    window: PhysicalWindow,
}

unsafe impl Send for Paging {}

impl Paging {
    /// # Safety
    ///
    /// `directory` must be valid for as long as the returned value is used,
    /// and nothing else may mutate it meanwhile.
    pub unsafe fn new(directory: NonNull<PageDirectory>, window: PhysicalWindow) -> Self {
        Self { directory, window }
    }

    pub fn directory(&self) -> &PageDirectory {
        unsafe { self.directory.as_ref() }
    }

    fn directory_mut(&mut self) -> &mut PageDirectory {
        unsafe { self.directory.as_mut() }
    }

    pub fn window(&self) -> PhysicalWindow {
        self.window
    }

    pub fn map_page(
        &mut self,
        frames: &mut BitmapFrameAllocator,
        vaddr: u32,
        paddr: u32,
        flags: PageFlags,
    ) -> Result<(), PagingError> {
        let window = self.window;
        self.directory_mut()
            .map_page(vaddr, paddr, flags, frames, &window)?;
        if is_current(self.directory()) {
            arch::invalidate_page(vaddr);
        }
        Ok(())
    }

    /// Maps `[vstart, vstart + len)` onto consecutive frames starting at `pstart`.
    pub fn map_range(
        &mut self,
        frames: &mut BitmapFrameAllocator,
        vstart: u32,
        pstart: u32,
        len: u32,
        flags: PageFlags,
    ) -> Result<(), PagingError> {
        let pages = len.div_ceil(PAGE_SIZE);
        for page in 0..pages {
            let offset = page * PAGE_SIZE;
            self.map_page(frames, vstart + offset, pstart + offset, flags)?;
        }
        Ok(())
    }

    /// Maps the whole physical window at its offset.
    ///
    /// The frames are not reserved: the window is an alias through which the
    /// kernel reaches memory, not an allocation.
    pub fn map_window(
        &mut self,
        frames: &mut BitmapFrameAllocator,
        flags: PageFlags,
    ) -> Result<(), PagingError> {
        let window = self.window;
        let base = window.offset() as u32;
        for paddr in (0..window.limit()).step_by(PAGE_SIZE as usize) {
            let vaddr = base.wrapping_add(paddr);
            let table = self.directory_mut().table_or_create(vaddr, frames, &window)?;
            table.entries[table_index(vaddr)].set(paddr, flags);
        }
        Ok(())
    }

    pub fn unmap_page(&mut self, vaddr: u32) -> Option<u32> {
        let frame = self.directory_mut().unmap_page(vaddr);
        if is_current(self.directory()) {
            arch::invalidate_page(vaddr);
        }
        frame
    }

    pub fn translate(&self, vaddr: u32) -> Option<u32> {
        self.directory().translate(vaddr)
    }

    pub fn entry(&self, vaddr: u32) -> Option<PageTableEntry> {
        self.directory().entry(vaddr)
    }

    /// Makes this directory the one the CPU uses.
    ///
    /// # Safety
    ///
    /// See [`switch_page_directory`].
    pub unsafe fn activate(&self) {
        switch_page_directory(self.directory());
    }
}

/// Decoded page fault, from CR2 and the CPU error code.
#[derive(Debug, Clone, Copy)]
pub struct PageFault {
    pub address: u32,
    pub error: PageFaultErrorCode,
    pub eip: u32,
}

impl PageFault {
    pub fn new(address: u32, error_code: u32, eip: u32) -> Self {
        Self {
            address,
            error: PageFaultErrorCode::from_bits_truncate(u64::from(error_code)),
            eip,
        }
    }

    pub fn causes(&self) -> ArrayVec<&'static str, 5> {
        let mut causes = ArrayVec::new();
        if !self.error.contains(PageFaultErrorCode::PROTECTION_VIOLATION) {
            causes.push("not-present");
        }
        if self.error.contains(PageFaultErrorCode::CAUSED_BY_WRITE) {
            causes.push("write");
        }
        if self.error.contains(PageFaultErrorCode::USER_MODE) {
            causes.push("user-mode");
        }
        if self.error.contains(PageFaultErrorCode::MALFORMED_TABLE) {
            causes.push("reserved");
        }
        if self.error.contains(PageFaultErrorCode::INSTRUCTION_FETCH) {
            causes.push("instruction-fetch");
        }
        causes
    }
}

impl fmt::Display for PageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page fault at {:#010x} (", self.address)?;
        for (i, cause) in self.causes().iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(cause)?;
        }
        write!(f, "), eip {:#010x}", self.eip)
    }
}

/// No demand paging: every fault is fatal.
fn page_fault_handler(frame: &mut InterruptFrame) {
    let fault = PageFault::new(arch::read_fault_address(), frame.error_code, frame.eip);
    log::error!("EXCEPTION: PAGE FAULT\n{:#?}", frame);
    panic!("{}", fault);
}

/// Kernel address space, set up once by [`init`].
pub static KERNEL_PAGING: Mutex<Option<Paging>> = Mutex::new(None);

pub fn with_kernel_paging<F, R>(f: F) -> R
where
    F: FnOnce(&mut Paging) -> R,
{
    without_interrupts(|| {
        let mut guard = KERNEL_PAGING.lock();
        let paging = guard.as_mut().expect("paging is not initialized");
        f(paging)
    })
}

#[repr(C, align(4096))]
struct KernelTables([PageTable; PAGING_ENTRIES]);

static mut KERNEL_DIRECTORY: PageDirectory = PageDirectory::new();
static mut KERNEL_TABLES: KernelTables = KernelTables([const { PageTable::new() }; PAGING_ENTRIES]);

/// Builds the kernel address space and switches to it.
///
/// Every directory slot gets one of the statically allocated tables, so the
/// kernel directory never allocates tables at run time. The first
/// `LOW_MEMORY_LIMIT` bytes of physical memory are reachable at
/// `KERNEL_VIRTUAL_BASE`, which also covers the kernel image.
///
/// # Safety
///
/// Must run once, on the boot stack, with the kernel loaded at
/// `KERNEL_VIRTUAL_BASE + physical`.
pub unsafe fn init(
    frames: &mut BitmapFrameAllocator,
    image: KernelImage,
) -> Result<(), PagingError> {
    // first, so a mistake below is reported rather than triple-faulting
    interrupts::register_handler(PAGE_FAULT_VECTOR, page_fault_handler);

    let window = PhysicalWindow::new(KERNEL_VIRTUAL_BASE as usize, LOW_MEMORY_LIMIT);
    let directory_ptr = core::ptr::addr_of_mut!(KERNEL_DIRECTORY);
    let tables_ptr = core::ptr::addr_of_mut!(KERNEL_TABLES);

    let directory_phys = window
        .to_phys(directory_ptr as usize)
        .ok_or(PagingError::OutsideWindow(directory_ptr as u32))?;
    let directory = &mut *directory_ptr;
    directory.set_physical_address(directory_phys);

    for (index, table) in (*tables_ptr).0.iter_mut().enumerate() {
        let table_virt = NonNull::from(table);
        let table_phys = window
            .to_phys(table_virt.as_ptr() as usize)
            .ok_or(PagingError::OutsideWindow(table_virt.as_ptr() as u32))?;
        directory.set_table(
            index,
            table_virt,
            table_phys,
            PageFlags::PRESENT | PageFlags::WRITABLE,
        );
    }

    let mut paging = Paging::new(NonNull::from(directory), window);
    let kernel_flags = PageFlags::PRESENT | PageFlags::WRITABLE;

    paging.map_window(frames, kernel_flags)?;

    let mut vaddr = image.start & FRAME_ADDRESS_MASK;
    while vaddr < image.end {
        paging.map_page(frames, vaddr, vaddr - KERNEL_VIRTUAL_BASE, kernel_flags)?;
        vaddr += PAGE_SIZE;
    }

    paging.map_page(frames, VGA_BUFFER_VIRT, VGA_BUFFER_PHYS, kernel_flags)?;

    paging.activate();
    log::info!(
        "Paging enabled, kernel directory at {:#010x}",
        paging.directory().physical_addr()
    );

    *KERNEL_PAGING.lock() = Some(paging);
    Ok(())
}
