//! 页表的数据结构表示，以及多级页表的实现。

use core::ops::Range;

use bitflags::bitflags;
use log::trace;

use super::address::{PhysAddr, PhysPageNum, VirtAddr, VirtPageNum};
use super::frame_allocator::{frame_alloc, FrameAllocator};
use crate::config::{PTE_PER_TABLE, SATP_MODE_ASID_MASK};
use crate::error::OutOfMemory;

// bitflags!能生成表示标志位的结构体
bitflags! {
    // 页表项的标志位
    pub struct PTEFlags: u8 {
        const V = 1 << 0;  // Valid：页表是否合法
        const R = 1 << 1;  // Read：可读
        const W = 1 << 2;  // Write：可写
        const X = 1 << 3;  // eXecute：可执行
        const U = 1 << 4;  // User：用户态（CPU处于U特权级时）可访问
        const G = 1 << 5;
        const A = 1 << 6;  // Access：已被访问。CPU在访问页表项时，会将此位1。但CPU不会清除此位，这由操作系统负责。
        const D = 1 << 7;  // Dirty：已被修改。CPU在写入页表项时，会将此位1。但CPU不会清除此位，这由操作系统负责。
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(C)]
// 页表项（Page Table Entry）是页表中的一个元素，用于存储虚拟页号到物理页号的映射关系。
// 页表项为64位，结构如下：
//   - 高10位：保留位
//   - 接下来44位：物理页号（PPN）
//   - 接下来2位：保留位
//   - 低8位：标志位
pub struct PageTableEntry {
    pub bits: usize,
}

// 页表项的三种形态。MMU只认识bits，遍历页表时统一用这个视图来判断。
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PteKind {
    // V位为0，没有映射
    Invalid,
    // V位为1且R/W/X都为0：指向下一级页表
    Branch(PhysPageNum),
    // 叶子页表项，指向一个物理页
    Leaf(PhysPageNum, PTEFlags),
}

impl PageTableEntry {
    pub fn new(ppn: PhysPageNum, flags: PTEFlags) -> Self {
        PageTableEntry {
            bits: ppn.0 << 10 | flags.bits as usize,
        }
    }

    pub fn empty() -> Self {
        PageTableEntry { bits: 0 }
    }

    pub fn ppn(&self) -> PhysPageNum {
        // 取bits[53:10]作为物理页号，共44位
        (self.bits >> 10 & ((1usize << 44) - 1)).into()
    }

    pub fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits as u8)
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(PTEFlags::V)
    }

    pub fn readable(&self) -> bool {
        self.flags().contains(PTEFlags::R)
    }

    pub fn writable(&self) -> bool {
        self.flags().contains(PTEFlags::W)
    }

    pub fn executable(&self) -> bool {
        self.flags().contains(PTEFlags::X)
    }

    pub fn kind(&self) -> PteKind {
        let flags = self.flags();
        if !flags.contains(PTEFlags::V) {
            PteKind::Invalid
        } else if flags.intersects(PTEFlags::R | PTEFlags::W | PTEFlags::X) {
            PteKind::Leaf(self.ppn(), flags)
        } else {
            PteKind::Branch(self.ppn())
        }
    }
}

// 三级页表的句柄，只记录根页表（L2）所在的物理页。
// 页表页和叶子物理页的归属由上层（MemorySet）负责，这里不追踪。
pub struct PageTable {
    root_ppn: PhysPageNum,
}

impl PageTable {
    // 分配一个清零的物理页，作为根页表
    pub fn new<A: FrameAllocator + ?Sized>(frames: &mut A) -> Result<Self, OutOfMemory> {
        let root_ppn = frame_alloc(frames).ok_or(OutOfMemory)?;
        Ok(PageTable { root_ppn })
    }

    // 已有的根页表。多个句柄可以指向同一个根页表，只用于读取或由唯一的所有者修改。
    pub fn from_root(root_ppn: PhysPageNum) -> Self {
        Self { root_ppn }
    }

    // 根据satp寄存器的值，创建页表
    // CSR寄存器satp的值其最低位44位表示根页表的物理页号
    pub fn from_token(satp: usize) -> Self {
        Self {
            root_ppn: PhysPageNum::from(satp & ((1usize << 44) - 1)),
        }
    }

    pub fn root_ppn(&self) -> PhysPageNum {
        self.root_ppn
    }

    // 根页表中覆盖va的那个页表项
    pub fn root_entry(&self, va: usize) -> &'static mut PageTableEntry {
        let idx = VirtAddr::from(va).floor().indexes()[0];
        &mut self.root_ppn.get_pte_array()[idx]
    }

    // 找到虚拟页号对应的页表项，返回其拷贝。
    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.find_pte(vpn).map(|pte| *pte)
    }

    // 找到虚拟地址对应的物理地址
    pub fn translate_va(&self, va: VirtAddr) -> Option<PhysAddr> {
        let vpn = va.floor();
        self.find_pte(vpn).filter(|pte| pte.is_valid()).map(|pte| {
            let aligned_pa: PhysAddr = pte.ppn().into();
            let offset = va.page_offset();
            let aligned_pa_usize: usize = aligned_pa.into();
            (aligned_pa_usize + offset).into()
        })
    }

    // 找到虚拟页号对应的L0页表项，中间缺少的L1/L0页表会分配清零的物理页来补上。
    // 返回的页表项不一定合法，需要调用者进一步判断。分配失败时返回None。
    fn find_pte_create<A: FrameAllocator + ?Sized>(
        &mut self,
        vpn: VirtPageNum,
        frames: &mut A,
    ) -> Option<&'static mut PageTableEntry> {
        let idxs = vpn.indexes();
        let mut ppn = self.root_ppn;
        for (i, idx) in idxs.iter().enumerate() {
            // 找到页表中对应的页表项
            let pte = &mut ppn.get_pte_array()[*idx];
            if i == 2 {
                return Some(pte);
            }
            if !pte.is_valid() {
                let frame = frame_alloc(frames)?;
                *pte = PageTableEntry::new(frame, PTEFlags::V);
            }
            ppn = pte.ppn();
        }
        None
    }

    // 找到虚拟页号对应的页表项。如果不存在，则返回None。
    fn find_pte(&self, vpn: VirtPageNum) -> Option<&'static mut PageTableEntry> {
        let idxs = vpn.indexes();
        let mut ppn = self.root_ppn;
        for (i, idx) in idxs.iter().enumerate() {
            let pte = &mut ppn.get_pte_array()[*idx];
            if i == 2 {
                return Some(pte);
            }
            if !pte.is_valid() {
                return None;
            }
            ppn = pte.ppn();
        }
        None
    }

    // 将虚拟页号映射到物理页号
    // 页表是存储在内核的地址空间中的，因此采用恒等映射，即存放页表的虚拟页号等于物理页号
    pub fn map<A: FrameAllocator + ?Sized>(
        &mut self,
        vpn: VirtPageNum,
        ppn: PhysPageNum,
        flags: PTEFlags,
        frames: &mut A,
    ) -> Result<(), OutOfMemory> {
        let pte = self.find_pte_create(vpn, frames).ok_or(OutOfMemory)?;
        // 如果找到的页表项是合法的，则表示之前已经映射过了，报错。
        assert!(!pte.is_valid(), "vpn {:?} is mapped before mapping", vpn);
        *pte = PageTableEntry::new(ppn, flags | PTEFlags::V);
        trace!("map {:?} -> {:?} {:?}", vpn, ppn, flags);
        Ok(())
    }

    // 按[L2, L1, L0]的顺序，遍历根页表第l2_range项以下的所有叶子页表项
    pub fn for_each_leaf<E>(
        &self,
        l2_range: Range<usize>,
        mut f: impl FnMut(VirtPageNum, PhysPageNum, PTEFlags) -> Result<(), E>,
    ) -> Result<(), E> {
        let l2_table = self.root_ppn.get_pte_array();
        for i2 in l2_range {
            let l1_ppn = match l2_table[i2].kind() {
                PteKind::Branch(ppn) => ppn,
                _ => continue,
            };
            let l1_table = l1_ppn.get_pte_array();
            for (i1, l1_pte) in l1_table.iter().enumerate() {
                let l0_ppn = match l1_pte.kind() {
                    PteKind::Branch(ppn) => ppn,
                    _ => continue,
                };
                let l0_table = l0_ppn.get_pte_array();
                for (i0, l0_pte) in l0_table.iter().enumerate() {
                    if let PteKind::Leaf(ppn, flags) = l0_pte.kind() {
                        f(VirtPageNum::from_indexes([i2, i1, i0]), ppn, flags)?;
                    }
                }
            }
        }
        Ok(())
    }

    // 释放根页表第l2_range项以下的全部物理页：叶子页、L0页表、L1页表，并清空这些根页表项。
    // 根页表自身不在这里释放。
    pub fn free_range<A: FrameAllocator + ?Sized>(&mut self, l2_range: Range<usize>, frames: &mut A) {
        let l2_table = self.root_ppn.get_pte_array();
        for i2 in l2_range {
            let l1_ppn = match l2_table[i2].kind() {
                PteKind::Branch(ppn) => ppn,
                PteKind::Leaf(..) | PteKind::Invalid => continue,
            };
            for l1_pte in l1_ppn.get_pte_array().iter() {
                let l0_ppn = match l1_pte.kind() {
                    PteKind::Branch(ppn) => ppn,
                    PteKind::Leaf(..) | PteKind::Invalid => continue,
                };
                for l0_pte in l0_ppn.get_pte_array().iter() {
                    if let PteKind::Leaf(ppn, _) = l0_pte.kind() {
                        frames.dealloc_frame(ppn);
                    }
                }
                frames.dealloc_frame(l0_ppn);
            }
            frames.dealloc_frame(l1_ppn);
            l2_table[i2] = PageTableEntry::empty();
        }
    }

    // 构造CSR寄存器satp的值，使得分页模式为SV39。satp用于控制MMU的行为。
    // CSR寄存器satp的格式：MODE (4 bits) | ASID (16 bits) | PPN (44 bits)
    // - MODE：0不开启分页机制，8开启SV39分页机制
    // - ASCI：地址空间的标识符
    // - PPN：根页表的物理页号
    pub fn token(&self) -> usize {
        8usize << 60 | self.root_ppn.0
    }
}

// 替换satp中的根页表物理页号，保留MODE和ASID
pub fn satp_with_root(satp: usize, root_ppn: PhysPageNum) -> usize {
    (satp & SATP_MODE_ASID_MASK) | root_ppn.0
}
