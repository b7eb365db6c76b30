//! Guest virtual address-space layout and physical memory geometry.

/// Page size of the emulated MMU.
pub const PAGE_SIZE: u32 = 0x1000;

/// Mask selecting the offset-within-page bits.
pub const PAGE_MASK: u32 = PAGE_SIZE - 1;

/// End of the user-mode virtual address space; every VMA lies below this.
pub const USER_SPACE_END: u32 = 0x4000_0000;

/// Start of the process image (text/rodata/data).
pub const PROCESS_IMAGE_VADDR: u32 = 0x0010_0000;

/// Regular (paged) heap range.
pub const HEAP_VADDR: u32 = 0x0800_0000;
pub const HEAP_VADDR_END: u32 = 0x1000_0000;

/// Shared-memory mapping range.
pub const SHARED_MEMORY_VADDR: u32 = 0x1000_0000;
pub const SHARED_MEMORY_VADDR_END: u32 = 0x1400_0000;

/// Linear heap: a flat window onto physically-contiguous FCRAM.
pub const LINEAR_HEAP_VADDR: u32 = 0x1400_0000;
pub const LINEAR_HEAP_VADDR_END: u32 = 0x1C00_0000;

/// Per-thread TLS pages are carved from this area; the IPC command buffer
/// sits at the start of each thread's TLS page.
pub const TLS_AREA_VADDR: u32 = 0x1FF8_2000;

/// Physical address FCRAM is visible at through the linear window.
pub const FCRAM_PADDR: u32 = 0x2000_0000;

/// Default FCRAM size (128 MiB).
pub const FCRAM_SIZE: u32 = 0x0800_0000;

/// Default region split of FCRAM: application, system, base.
pub const REGION_APPLICATION_SIZE: u32 = 0x0400_0000;
pub const REGION_SYSTEM_SIZE: u32 = 0x0180_0000;
pub const REGION_BASE_SIZE: u32 =
    FCRAM_SIZE - REGION_APPLICATION_SIZE - REGION_SYSTEM_SIZE;

/// Round `size` up to the next page boundary.
pub const fn page_round_up(size: u32) -> u32 {
    (size + PAGE_MASK) & !PAGE_MASK
}

/// Whether `value` sits on a page boundary.
pub const fn is_page_aligned(value: u32) -> bool {
    value & PAGE_MASK == 0
}
