//! Memory management: paging setup, frame allocation, and the per-process
//! address space windows the scheduler and loader remap on every switch.
//!
//! x86_64 long mode has no 4 MiB page size, so the fixed-physical-address,
//! one-huge-page-per-program scheme doesn't translate directly; the same
//! determinism (every program always loads at the same virtual address, and
//! keeps the same backing frames for its whole lifetime) is instead achieved
//! with a small bump-allocated run of ordinary 4 KiB frames per pid, cached
//! for as long as that pid is alive.

use alloc::vec::Vec;

use bootloader::bootinfo::{MemoryMap, MemoryRegionType};
use spin::Mutex;
use x86_64::{
    registers::control::Cr3,
    structures::paging::{
        FrameAllocator, Mapper, OffsetPageTable, Page, PageTable, PageTableFlags, PhysFrame,
        Size4KiB,
    },
    PhysAddr, VirtAddr,
};

use crate::process::MAX_PID;

/// Fixed virtual address every program is linked and loaded at.
pub const USER_CODE_VIRT_BASE: u64 = 0x0040_0000;
/// Number of 4 KiB pages reserved for a single program's code, data, and bss.
pub const PROGRAM_WINDOW_PAGES: u64 = 256;
/// Virtual address of the single page a program maps with `vidmap`.
pub const USER_VIDMAP_VIRT: u64 = 0x0080_0000;
/// Physical address of the real VGA text buffer.
const VGA_PHYS_ADDR: u64 = 0xB8000;

/// Initialize a new `OffsetPageTable`.
///
/// # Safety
/// Unsafe because the caller must guarantee that the physical memory is mapped
/// to virtual memory at the passed `physical_memory_offset`.
/// This function must be only called once to avoid aliasing `&mut` references.
#[must_use]
pub unsafe fn init(physical_memory_offset: VirtAddr) -> OffsetPageTable<'static> {
    let level_4_table = active_level_4_table(physical_memory_offset);
    OffsetPageTable::new(level_4_table, physical_memory_offset)
}

/// Returns a mutable reference to the active level 4 table.
///
/// # Safety
/// Unsafe because the caller must guarantee that the physical memory is mapped
/// to virtual memory at the passed `physical_memory_offset`.
/// This function must be only called once to avoid aliasing `&mut` references.
#[must_use]
unsafe fn active_level_4_table(physical_memory_offset: VirtAddr) -> &'static mut PageTable {
    // Cr3 register holds the physical address of the level 4 page table.
    let (level_4_table_frame, _) = Cr3::read();

    let phys = level_4_table_frame.start_address();
    let virt = physical_memory_offset + phys.as_u64();
    let page_table_ptr: *mut PageTable = virt.as_mut_ptr();

    &mut *page_table_ptr
}

/// A frame allocator that returns usable frames from the bootloader's memory map.
pub struct BootInfoFrameAllocator {
    memory_map: &'static MemoryMap,
    next: usize,
}

impl BootInfoFrameAllocator {
    /// Create a `BootInfoFrameAllocator` from the passed memory map.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the passed memory map is valid.
    #[must_use]
    pub const unsafe fn new(memory_map: &'static MemoryMap) -> Self {
        Self {
            memory_map,
            next: 0,
        }
    }

    fn usable_frames(&self) -> impl Iterator<Item = PhysFrame> {
        let regions = self.memory_map.iter();
        let usable_regions = regions.filter(|r| r.region_type == MemoryRegionType::Usable);
        let addr_ranges = usable_regions.map(|r| r.range.start_addr()..r.range.end_addr());
        let frame_addresses = addr_ranges.flat_map(|r| r.step_by(4096));
        frame_addresses.map(|addr| PhysFrame::containing_address(PhysAddr::new(addr)))
    }
}

/// Implement the `FrameAllocator` trait for `BootInfoFrameAllocator`.
///
/// SAFETY:
///
/// Unsafe because the caller must guarantee that the memory map is valid.
unsafe impl FrameAllocator<Size4KiB> for BootInfoFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        let frame = self.usable_frames().nth(self.next);
        self.next += 1;
        frame
    }
}

static MAPPER: Mutex<Option<OffsetPageTable<'static>>> = Mutex::new(None);
static FRAME_ALLOCATOR: Mutex<Option<BootInfoFrameAllocator>> = Mutex::new(None);

/// Per-pid program frames, allocated once on first `execute` and kept for
/// the process's whole lifetime so a scheduler switch back to it doesn't
/// need to reload anything.
static PROGRAM_FRAMES: Mutex<[Option<Vec<PhysFrame>>; MAX_PID]> = Mutex::new([const { None }; MAX_PID]);

/// Which pid (if any) the user code/vidmap windows are currently mapped for.
static CURRENTLY_MAPPED_PID: Mutex<Option<usize>> = Mutex::new(None);

/// Hands ownership of the mapper and frame allocator built at boot to this
/// module, so later calls (from the scheduler and syscall layer) don't need
/// them threaded through every function signature.
pub fn init_global(mapper: OffsetPageTable<'static>, frame_allocator: BootInfoFrameAllocator) {
    *MAPPER.lock() = Some(mapper);
    *FRAME_ALLOCATOR.lock() = Some(frame_allocator);
}

/// Allocates [`PROGRAM_WINDOW_PAGES`] fresh physical frames for `pid` and
/// maps them at [`USER_CODE_VIRT_BASE`], replacing whatever program window
/// is currently mapped.
///
/// # Errors
///
/// Returns an error if the global mapper/allocator haven't been
/// initialized yet, or if a frame can't be allocated.
pub fn load_program_window(pid: usize) -> Result<(), &'static str> {
    let mut mapper_guard = MAPPER.lock();
    let mapper = mapper_guard.as_mut().ok_or("memory: not initialized")?;
    let mut allocator_guard = FRAME_ALLOCATOR.lock();
    let allocator = allocator_guard.as_mut().ok_or("memory: not initialized")?;

    let mut frames = Vec::with_capacity(PROGRAM_WINDOW_PAGES as usize);
    for _ in 0..PROGRAM_WINDOW_PAGES {
        frames.push(allocator.allocate_frame().ok_or("memory: out of frames")?);
    }

    map_window(mapper, allocator, USER_CODE_VIRT_BASE, &frames, true)?;
    PROGRAM_FRAMES.lock()[pid] = Some(frames);
    *CURRENTLY_MAPPED_PID.lock() = Some(pid);
    Ok(())
}

/// Remaps the fixed program window to `pid`'s already-allocated frames, as
/// the scheduler does on every context switch. A no-op if `pid` is already
/// the one currently mapped.
///
/// # Panics
///
/// Panics if `pid` has never had [`load_program_window`] called for it.
pub fn switch_user_address_space(pid: usize) {
    if *CURRENTLY_MAPPED_PID.lock() == Some(pid) {
        return;
    }

    let frames = PROGRAM_FRAMES.lock()[pid]
        .clone()
        .expect("switch_user_address_space: pid has no program window");

    let mut mapper_guard = MAPPER.lock();
    let mapper = mapper_guard.as_mut().expect("memory: not initialized");
    let mut allocator_guard = FRAME_ALLOCATOR.lock();
    let allocator = allocator_guard.as_mut().expect("memory: not initialized");

    let _ = map_window(mapper, allocator, USER_CODE_VIRT_BASE, &frames, true);
    *CURRENTLY_MAPPED_PID.lock() = Some(pid);
}

/// Frees the program frames belonging to `pid` once it has exited.
pub fn teardown_program_window(pid: usize) {
    PROGRAM_FRAMES.lock()[pid] = None;
    let mut current = CURRENTLY_MAPPED_PID.lock();
    if *current == Some(pid) {
        *current = None;
    }
}

/// Keeps the `vidmap` window coherent with the scheduler: if `pid` called
/// `vidmap` and its group is the one currently shown on screen, the window
/// points at the real VGA buffer; otherwise it is left unmapped, since a
/// background group's console output lives in software shadow state rather
/// than a physical page a program could be handed a pointer into.
pub fn sync_vidmap_mapping(pid: usize, group: usize) {
    let wants_vidmap = crate::process::get(pid).vid_map_called;
    let mut mapper_guard = MAPPER.lock();
    let Some(mapper) = mapper_guard.as_mut() else {
        return;
    };
    let mut allocator_guard = FRAME_ALLOCATOR.lock();
    let Some(allocator) = allocator_guard.as_mut() else {
        return;
    };

    let page: Page<Size4KiB> = Page::containing_address(VirtAddr::new(USER_VIDMAP_VIRT));
    let _ = mapper.unmap(page);

    if wants_vidmap && group == crate::console::visible_group() {
        let frame = PhysFrame::containing_address(PhysAddr::new(VGA_PHYS_ADDR));
        let flags =
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE;
        // SAFETY: the VGA frame is a fixed hardware region, always valid to
        // map; mapping it twice (once per group that asks) is harmless
        // since text-mode video memory has no ownership semantics.
        if let Ok(flush) = unsafe { mapper.map_to(page, frame, flags, allocator) } {
            flush.flush();
        }
    }
}

fn map_window(
    mapper: &mut OffsetPageTable<'static>,
    allocator: &mut BootInfoFrameAllocator,
    virt_base: u64,
    frames: &[PhysFrame],
    writable: bool,
) -> Result<(), &'static str> {
    let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
    if writable {
        flags |= PageTableFlags::WRITABLE;
    }

    for (i, &frame) in frames.iter().enumerate() {
        let page: Page<Size4KiB> = Page::containing_address(VirtAddr::new(virt_base + i as u64 * 4096));
        // Unmap first in case a previous process's frame is still resident
        // at this virtual page.
        let _ = mapper.unmap(page);
        // SAFETY: `frame` was freshly allocated (or previously owned by
        // this same pid) and `page` lies in the dedicated user window.
        unsafe {
            mapper
                .map_to(page, frame, flags, allocator)
                .map_err(|_| "memory: failed to map program window")?
                .flush();
        }
    }
    Ok(())
}
