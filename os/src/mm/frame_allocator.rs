//! 管理页帧（frame），即物理页

use alloc::vec::Vec;
use core::fmt::{self, Debug, Formatter};

use super::address::PhysPageNum;

// 物理页帧分配器。内核用StackFrameAllocator管理[ekernel, MEMORY_END)，
// 进程管理器只通过这个接口申请和归还物理页。
pub trait FrameAllocator {
    // 分配物理页帧，内容不保证清零
    fn alloc_frame(&mut self) -> Option<PhysPageNum>;
    // 回收物理页帧
    fn dealloc_frame(&mut self, ppn: PhysPageNum);
}

// 分配一个物理页帧，并清理其中的内容
pub fn frame_alloc<A: FrameAllocator + ?Sized>(frames: &mut A) -> Option<PhysPageNum> {
    let ppn = frames.alloc_frame()?;
    ppn.get_bytes_array().fill(0);
    Some(ppn)
}

// 栈式物理页帧分配器
pub struct StackFrameAllocator {
    current: usize, // 空闲内存的起始物理页号
    end: usize,     // 空闲内存的结束物理页号
    recycled: Vec<usize>,
}

impl StackFrameAllocator {
    // 可供分配的物理页号范围：[l, r)
    pub fn new(l: PhysPageNum, r: PhysPageNum) -> Self {
        Self {
            current: l.0,
            end: r.0,
            recycled: Vec::new(),
        }
    }

    // 剩余可分配的物理页数
    pub fn remaining(&self) -> usize {
        self.end - self.current + self.recycled.len()
    }
}

impl FrameAllocator for StackFrameAllocator {
    fn alloc_frame(&mut self) -> Option<PhysPageNum> {
        // 优先使用回收的物理页帧
        if let Some(ppn) = self.recycled.pop() {
            Some(ppn.into())
        } else if self.current == self.end {
            None
        } else {
            let allocated = self.current;
            self.current += 1;
            Some(allocated.into())
        }
    }

    fn dealloc_frame(&mut self, ppn: PhysPageNum) {
        let ppn = ppn.0;
        // 合法性检查
        // - 该页面是被分配过
        // - 该页面没有被回收
        if ppn >= self.current || self.recycled.iter().any(|&v| v == ppn) {
            panic!("Frame ppn={:#x} has not been allocated!", ppn);
        }
        // 回收物理页帧
        self.recycled.push(ppn);
    }
}

impl Debug for StackFrameAllocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "StackFrameAllocator:[{:#x}, {:#x}) recycled={}",
            self.current,
            self.end,
            self.recycled.len()
        ))
    }
}
