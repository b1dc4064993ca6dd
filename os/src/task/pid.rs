use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::mem::size_of;

use super::process::ProcessControlBlock;
use crate::config::KERNEL_STACK_SIZE;
use crate::error::{ProcessError, Result};

// 进程的内核栈，也是进程私有的那块内存：
// Trap上下文放在栈顶，切换帧紧挨在它下面。
#[repr(C, align(4096))]
struct KernelStackSpace([u8; KERNEL_STACK_SIZE]);

pub struct KernelStack {
    space: Box<KernelStackSpace>,
}

impl KernelStack {
    pub fn new() -> Self {
        Self {
            space: Box::new(KernelStackSpace([0; KERNEL_STACK_SIZE])),
        }
    }

    // 获取该内核栈的栈顶地址
    pub fn get_top(&self) -> usize {
        self.space.0.as_ptr() as usize + KERNEL_STACK_SIZE
    }

    pub fn contains(&self, sp: usize) -> bool {
        let bottom = self.space.0.as_ptr() as usize;
        (bottom..=self.get_top()).contains(&sp)
    }

    // 将一个值放到离栈顶offset字节的位置之下，返回它的地址
    pub fn push_below<T>(&mut self, offset: usize, value: T) -> *mut T
    where
        T: Sized,
    {
        let ptr_mut = (self.get_top() - offset - size_of::<T>()) as *mut T;
        unsafe {
            ptr_mut.write(value);
        }
        ptr_mut
    }

    pub fn clear(&mut self) {
        self.space.0.fill(0);
    }
}

// PCB池：容量固定的PCB槽位，加上一张同样长度的占用表。
// PID就是槽位下标，PCB在池中从不移动，所以PCB里保存的指针在进程的整个生命周期内都有效。
pub struct PcbPool {
    slots: Vec<ProcessControlBlock>,
    occupied: Vec<bool>,
}

impl PcbPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(ProcessControlBlock::new).collect(),
            occupied: vec![false; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    // 首次适配：取第一个空闲的槽位，清空它的内容并写上PID
    pub fn allocate(&mut self) -> Result<usize> {
        let pid = self
            .occupied
            .iter()
            .position(|used| !used)
            .ok_or(ProcessError::PoolExhausted)?;
        self.occupied[pid] = true;
        self.slots[pid].reset(pid);
        Ok(pid)
    }

    // 归还槽位。重复归还是调用者的错误。
    pub fn release(&mut self, pid: usize) {
        assert!(
            self.is_allocated(pid),
            "pid {} has been released!",
            pid
        );
        self.occupied[pid] = false;
    }

    pub fn is_allocated(&self, pid: usize) -> bool {
        self.occupied.get(pid).copied().unwrap_or(false)
    }

    pub fn get(&self, pid: usize) -> Option<&ProcessControlBlock> {
        if self.is_allocated(pid) {
            self.slots.get(pid)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, pid: usize) -> Option<&mut ProcessControlBlock> {
        if self.is_allocated(pid) {
            self.slots.get_mut(pid)
        } else {
            None
        }
    }

    // 同时拿到两个不同进程的可变引用，fork时用
    pub fn get_pair_mut(
        &mut self,
        a: usize,
        b: usize,
    ) -> Option<(&mut ProcessControlBlock, &mut ProcessControlBlock)> {
        if a == b || !self.is_allocated(a) || !self.is_allocated(b) {
            return None;
        }
        if a < b {
            let (left, right) = self.slots.split_at_mut(b);
            Some((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.slots.split_at_mut(a);
            Some((&mut right[0], &mut left[b]))
        }
    }
}
