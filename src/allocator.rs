//! Kernel heap allocator using the `linked_list_allocator` crate.
//!
//! The heap backs everything the fixed process pool needs to allocate at
//! runtime: the boot-time filesystem image, the scheduler's per-group
//! bookkeeping `Vec`s, and every `alloc`-using data structure in between.
//! There is no per-process heap quota; all [`process::MAX_PID`] slots share
//! this single region.

use linked_list_allocator::LockedHeap;
use x86_64::{
    structures::paging::{
        mapper::MapToError, FrameAllocator, Mapper, Page, PageTableFlags, Size4KiB,
    },
    VirtAddr,
};

use crate::process;

/// Start address of the heap.
pub const HEAP_START: usize = 0x_4444_4444_0000;

/// Size of the heap in bytes: a fixed 128 KiB share per process slot, scaled
/// from [`process::MAX_PID`] rather than a flat constant, since the dominant
/// heap consumer is the per-pid bookkeeping the scheduler and loader keep
/// alive for as long as a pid is running.
pub const HEAP_SIZE: usize = process::MAX_PID * 128 * 1024;

/// Initialize the heap.
///
/// # Errors
/// Might fail if the physical memory frame allocator runs out of memory.
#[expect(clippy::impl_trait_in_params)]
pub fn init_heap(
    mapper: &mut impl Mapper<Size4KiB>,
    frame_allocator: &mut impl FrameAllocator<Size4KiB>,
) -> Result<(), MapToError<Size4KiB>> {
    let page_range = {
        let heap_start = VirtAddr::new(HEAP_START as u64);
        let heap_end = heap_start + HEAP_SIZE - 1_u64;
        let heap_start_page = Page::containing_address(heap_start);
        let heap_end_page = Page::containing_address(heap_end);
        Page::range_inclusive(heap_start_page, heap_end_page)
    };

    for page in page_range {
        let frame = frame_allocator
            .allocate_frame()
            .ok_or(MapToError::FrameAllocationFailed)?;
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        // SAFETY:
        //
        // The caller must guarantee that the `page` is not already mapped.
        // As we just allocated a new frame, it is guaranteed that the frame is unused.
        // Also, we have to call init_heap only once.
        unsafe { mapper.map_to(page, frame, flags, frame_allocator)?.flush() }
    }

    // SAFETY:
    //
    // Init the allocator is unsafe because the caller must guarantee that the
    // heap memory is not used for other purposes.
    unsafe {
        ALLOCATOR.lock().init(HEAP_START, HEAP_SIZE);
    }

    Ok(())
}

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_heap_size_scales_with_process_pool() {
        assert_eq!(HEAP_SIZE, process::MAX_PID * 128 * 1024);
    }
}
