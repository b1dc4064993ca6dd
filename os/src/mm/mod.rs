//! 基于RISC-V的SV39分页机制的内存管理实现。
//! 物理页帧分配器、页表和地址空间，都在这里实现。
//!
//! 每个进程都有一个地址空间（MemorySet），MMIO和内核区与内核页表共享。

mod address;
mod frame_allocator;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub mod heap_allocator;
mod memory_set;
mod page_table;

pub use address::{
    index_of, PhysAddr, PhysPageNum, StepByOne, VPNRange, VirtAddr, VirtPageNum,
};
pub use frame_allocator::{frame_alloc, FrameAllocator, StackFrameAllocator};
pub use memory_set::{user_l2_range, MapPermission, MemorySet};
pub use page_table::{satp_with_root, PTEFlags, PageTable, PageTableEntry, PteKind};
