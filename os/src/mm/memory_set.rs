//! 虚拟地址空间的数据结构表示。每个进程都有自己的地址空间。

use core::ops::Range;

use bitflags::bitflags;
use log::info;

use super::{
    address::{index_of, PhysAddr, PhysPageNum, VPNRange, VirtAddr, VirtPageNum},
    frame_allocator::{frame_alloc, FrameAllocator},
    page_table::{PTEFlags, PageTable, PageTableEntry},
};
use crate::config::{
    GIGAPAGE_SIZE, KERNEL_SPACE_BASE, KERNEL_SPACE_END, MMIO_BASE, MMIO_END, USER_SPACE_BASE,
    USER_SPACE_END,
};
use crate::error::OutOfMemory;

bitflags! {
    // 映射权限。这是页表项标志位PTEFlags的子集。
    pub struct MapPermission: u8 {
        const R = 1 << 1;  // 可读
        const W = 1 << 2;  // 可写
        const X = 1 << 3;  // 可执行
        const U = 1 << 4;  // 用户态（CPU处于U特权级时）可访问
    }
}

impl From<MapPermission> for PTEFlags {
    fn from(perm: MapPermission) -> Self {
        PTEFlags::from_bits_truncate(perm.bits())
    }
}

// 用户地址空间在根页表中占的页表项范围
pub fn user_l2_range() -> Range<usize> {
    index_of(USER_SPACE_BASE, 2)..index_of(USER_SPACE_END - 1, 2) + 1
}

// 表示内核或进程的地址空间。
// 它拥有根页表，以及用户区里所有的L1/L0页表和叶子物理页；
// 与内核共享的MMIO和内核区的子页表属于内核页表，不归它管理。
pub struct MemorySet {
    page_table: PageTable,
}

impl MemorySet {
    // 创建空的地址空间
    // 这将分配一个物理页，作为根页表
    pub fn new_bare<A: FrameAllocator + ?Sized>(frames: &mut A) -> Result<Self, OutOfMemory> {
        Ok(Self {
            page_table: PageTable::new(frames)?,
        })
    }

    // 新建内核的地址空间，把给定的各段[start, end)恒等映射进来
    pub fn new_kernel<A: FrameAllocator + ?Sized>(
        frames: &mut A,
        sections: &[(&str, usize, usize, MapPermission)],
    ) -> Result<Self, OutOfMemory> {
        let mut memory_set = Self::new_bare(frames)?;
        for &(name, start, end, perm) in sections {
            info!("{:<15} [{:#010x}, {:#010x})", name, start, end);
            let range = VPNRange::new(VirtAddr::from(start).floor(), VirtAddr::from(end).ceil());
            for vpn in range {
                memory_set.map_page(PhysPageNum(vpn.0), vpn, perm, frames)?;
            }
        }
        Ok(memory_set)
    }

    // 新建进程的地址空间。
    // MMIO和内核区以1GB为粒度，直接拷贝内核根页表的页表项：新地址空间与内核共享同一批L1子页表，
    // 内核之后在这些区域的修改，对所有进程都可见。其它根页表项都是非法的，等ELF加载器按需填充。
    pub fn new_user<A: FrameAllocator + ?Sized>(
        kernel: &PageTable,
        frames: &mut A,
    ) -> Result<Self, OutOfMemory> {
        let memory_set = Self::new_bare(frames)?;
        for (start, end) in [(MMIO_BASE, MMIO_END), (KERNEL_SPACE_BASE, KERNEL_SPACE_END)] {
            for addr in (start..end).step_by(GIGAPAGE_SIZE) {
                *memory_set.page_table.root_entry(addr) = *kernel.root_entry(addr);
            }
        }
        Ok(memory_set)
    }

    // 已有的根页表，接管其所有权
    pub fn from_root(root_ppn: PhysPageNum) -> Self {
        Self {
            page_table: PageTable::from_root(root_ppn),
        }
    }

    // 将物理页映射到虚拟页，缺少的中间页表会被分配
    pub fn map_page<A: FrameAllocator + ?Sized>(
        &mut self,
        ppn: PhysPageNum,
        vpn: VirtPageNum,
        perm: MapPermission,
        frames: &mut A,
    ) -> Result<(), OutOfMemory> {
        self.page_table.map(vpn, ppn, perm.into(), frames)
    }

    // 逐页拷贝parent的用户区到本地址空间：每个叶子页都分配新的物理页，复制4KB内容，
    // 并以相同的权限映射到相同的虚拟地址。没有写时复制。
    // 中途分配失败时，已经拷贝的页不会撤销。
    pub fn copy_user_space_from<A: FrameAllocator + ?Sized>(
        &mut self,
        parent: &PageTable,
        frames: &mut A,
    ) -> Result<usize, OutOfMemory> {
        let mut copied = 0;
        parent.for_each_leaf(user_l2_range(), |vpn, parent_ppn, flags| {
            let ppn = frame_alloc(frames).ok_or(OutOfMemory)?;
            // 方向：父进程的页 -> 子进程的新页
            ppn.get_bytes_array()
                .copy_from_slice(parent_ppn.get_bytes_array());
            if let Err(e) = self.page_table.map(vpn, ppn, flags, frames) {
                frames.dealloc_frame(ppn);
                return Err(e);
            }
            copied += 1;
            Ok(())
        })?;
        Ok(copied)
    }

    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.page_table.translate(vpn)
    }

    pub fn translate_va(&self, va: VirtAddr) -> Option<PhysAddr> {
        self.page_table.translate_va(va)
    }

    // 统计用户区里已映射的页数
    pub fn user_page_count(&self) -> usize {
        let mut count = 0;
        let _ = self.page_table.for_each_leaf::<()>(user_l2_range(), |_, _, _| {
            count += 1;
            Ok(())
        });
        count
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn root_ppn(&self) -> PhysPageNum {
        self.page_table.root_ppn()
    }

    pub fn token(&self) -> usize {
        self.page_table.token()
    }

    // 回收该地址空间：用户区的叶子页、L1/L0页表，最后是根页表。
    // 共享的内核子页表不会被释放。
    pub fn recycle<A: FrameAllocator + ?Sized>(mut self, frames: &mut A) {
        self.page_table.free_range(user_l2_range(), frames);
        frames.dealloc_frame(self.page_table.root_ppn());
    }

    // 设置CSR寄存器satp的值，激活该地址空间（只有内核空间才调用）
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    pub fn activate(&self) {
        use core::arch::asm;
        let satp = self.page_table.token();
        unsafe {
            riscv::register::satp::write(satp);
            // sfence.vma指令是内存屏障，可清空快表（TLB, Translation Lookaside Buffer）
            asm!("sfence.vma");
        }
    }
}
