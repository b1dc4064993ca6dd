//! 进程管理器：创建、复制、查找和回收进程。调度逻辑见processor.rs。
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use log::{info, warn};

use super::pid::PcbPool;
use super::process::{ProcessControlBlock, ProcessStatus};
use super::switch::Hart;
use crate::config::{MAX_PROCESS_COUNT, PAGE_SIZE, USER_SPACE_END};
use crate::error::{ProcessError, Result};
use crate::loader::load_elf;
use crate::mm::{frame_alloc, FrameAllocator, MapPermission, MemorySet, PageTable, PhysPageNum, VirtAddr};
use crate::trap::TrapContext;

// 进程管理器，使用轮转（Round-Robin）调度算法。
// 整个内核只有一个实例，只在关中断的内核态下访问。
pub struct ProcessManager<A: FrameAllocator, H: Hart> {
    pub(super) pool: PcbPool,
    // 所有活着的进程，按创建顺序
    pub(super) all_processes: Vec<usize>,
    // 就绪队列，从队头取，往队尾放
    pub(super) ready_queue: VecDeque<usize>,
    // 正在运行的进程。为None时CPU处于idle控制流
    pub(super) current: Option<usize>,
    // 已经切走、等待回收的死进程
    pub(super) pending_reclaim: Vec<usize>,
    // idle控制流切出时保存的栈指针
    pub(super) idle_sp: usize,
    // 内核根页表，新地址空间从它拷贝MMIO和内核区的根页表项
    pub(super) kernel_root: PhysPageNum,
    pub(super) frames: A,
    pub(super) hart: H,
}

impl<A: FrameAllocator, H: Hart> ProcessManager<A, H> {
    pub fn new(kernel_root: PhysPageNum, frames: A, hart: H) -> Self {
        Self::with_capacity(MAX_PROCESS_COUNT, kernel_root, frames, hart)
    }

    pub fn with_capacity(capacity: usize, kernel_root: PhysPageNum, frames: A, hart: H) -> Self {
        Self {
            pool: PcbPool::new(capacity),
            all_processes: Vec::new(),
            ready_queue: VecDeque::new(),
            current: None,
            pending_reclaim: Vec::new(),
            idle_sp: 0,
            kernel_root,
            frames,
            hart,
        }
    }

    // 从ELF镜像创建一个新进程，放到就绪队列的末尾，返回它的PID
    pub fn create_process(&mut self, elf_data: &[u8]) -> Result<usize> {
        let pid = self
            .pool
            .allocate()
            .map_err(|_| ProcessError::ProcessLimitReached)?;
        match self.build_process(pid, elf_data) {
            Ok(entry) => {
                self.all_processes.push(pid);
                self.ready_queue.push_back(pid);
                info!("process {} created, entry = {:#x}", pid, entry);
                Ok(pid)
            }
            Err(e) => {
                warn!("failed to create process: {}", e);
                self.discard(pid);
                Err(e)
            }
        }
    }

    fn build_process(&mut self, pid: usize, elf_data: &[u8]) -> Result<usize> {
        let start_process = self.hart.start_process_entry();
        let kernel = PageTable::from_root(self.kernel_root);
        let pcb = self.pool.get_mut(pid).ok_or(ProcessError::NotFound)?;
        pcb.total_ticks = 0;
        pcb.ticks_after_schedule = 0;
        let memory_set = pcb
            .memory_set
            .insert(MemorySet::new_user(&kernel, &mut self.frames)?);
        // 用户栈只有一页，位于用户区的最高处
        let stack_page = frame_alloc(&mut self.frames).ok_or(ProcessError::OutOfMemory)?;
        if let Err(e) = memory_set.map_page(
            stack_page,
            VirtAddr::from(USER_SPACE_END - PAGE_SIZE).floor(),
            MapPermission::R | MapPermission::W | MapPermission::U,
            &mut self.frames,
        ) {
            self.frames.dealloc_frame(stack_page);
            return Err(e.into());
        }
        let entry = load_elf(elf_data, memory_set, &mut self.frames)?;
        pcb.init_kernel_stack(
            TrapContext::app_init_context(entry, USER_SPACE_END),
            start_process,
        );
        pcb.status = ProcessStatus::Ready;
        Ok(entry)
    }

    // 复制parent_pid进程，返回子进程的PID。子进程放到就绪队列的末尾。
    pub fn duplicate(&mut self, parent_pid: usize) -> Result<usize> {
        self.find_process_by_pid(parent_pid)?;
        let child_pid = self
            .pool
            .allocate()
            .map_err(|_| ProcessError::ProcessLimitReached)?;
        match self.copy_process(parent_pid, child_pid) {
            Ok(copied) => {
                self.all_processes.push(child_pid);
                self.ready_queue.push_back(child_pid);
                info!(
                    "process {} forked from {}, {} pages copied",
                    child_pid, parent_pid, copied
                );
                Ok(child_pid)
            }
            Err(e) => {
                warn!("failed to fork process {}: {}", parent_pid, e);
                self.discard(child_pid);
                Err(e)
            }
        }
    }

    // 数据都从父进程拷贝到子进程：Trap上下文、调度信息、用户区的每一页
    fn copy_process(&mut self, parent_pid: usize, child_pid: usize) -> Result<usize> {
        let start_process = self.hart.start_process_entry();
        let kernel = PageTable::from_root(self.kernel_root);
        let (parent, child) = self
            .pool
            .get_pair_mut(parent_pid, child_pid)
            .ok_or(ProcessError::NotFound)?;

        // 子进程从fork返回0；切换进来时保持关中断，直到sret
        let mut trap_cx = *parent.trap_cx();
        trap_cx.set_a0(0);
        trap_cx.mask_interrupts();
        child.init_kernel_stack(trap_cx, start_process);

        child.parent_pid = Some(parent_pid);
        child.priority = parent.priority;
        child.ticks_after_schedule = parent.ticks_after_schedule;
        child.total_ticks = parent.total_ticks;

        let parent_memory_set = parent
            .memory_set
            .as_ref()
            .ok_or(ProcessError::NotFound)?;
        let child_memory_set = child
            .memory_set
            .insert(MemorySet::new_user(&kernel, &mut self.frames)?);
        let copied =
            child_memory_set.copy_user_space_from(parent_memory_set.page_table(), &mut self.frames)?;
        child.status = ProcessStatus::Ready;
        Ok(copied)
    }

    // 按PID查找进程，只查找活着的进程
    pub fn find_process_by_pid(&self, pid: usize) -> Result<&ProcessControlBlock> {
        self.all_processes
            .iter()
            .find(|&&p| p == pid)
            .and_then(|&p| self.pool.get(p))
            .ok_or(ProcessError::NotFound)
    }

    pub fn find_process_by_pid_mut(&mut self, pid: usize) -> Result<&mut ProcessControlBlock> {
        if !self.all_processes.contains(&pid) {
            return Err(ProcessError::NotFound);
        }
        self.pool.get_mut(pid).ok_or(ProcessError::NotFound)
    }

    // 将进程标记为死亡。正在运行的进程要等下一次调度切走之后才能回收，其它进程立即回收。
    // 已经死亡的进程在等待回收，什么都不做。
    pub fn kill(&mut self, pid: usize) -> Result<()> {
        let pcb = self.find_process_by_pid_mut(pid)?;
        if pcb.status == ProcessStatus::Dead {
            return Ok(());
        }
        pcb.status = ProcessStatus::Dead;
        if self.current != Some(pid) {
            self.reclaim(pid);
        }
        Ok(())
    }

    // 回收进程：用户区的物理页和页表、根页表，最后归还PCB槽位
    pub(super) fn reclaim(&mut self, pid: usize) {
        self.all_processes.retain(|&p| p != pid);
        self.ready_queue.retain(|&p| p != pid);
        // 槽位可能马上被新进程复用，不能再留在待回收列表里
        self.pending_reclaim.retain(|&p| p != pid);
        self.discard(pid);
        info!("process {} reclaimed", pid);
    }

    // 丢弃一个（可能只构造了一半的）进程
    fn discard(&mut self, pid: usize) {
        if let Some(pcb) = self.pool.get_mut(pid) {
            if let Some(memory_set) = pcb.memory_set.take() {
                memory_set.recycle(&mut self.frames);
            }
            pcb.status = ProcessStatus::Dead;
            self.pool.release(pid);
        }
    }

    pub fn current_pid(&self) -> Option<usize> {
        self.current
    }

    pub fn ready_pids(&self) -> Vec<usize> {
        self.ready_queue.iter().copied().collect()
    }

    pub fn all_pids(&self) -> &[usize] {
        &self.all_processes
    }

    pub fn process(&self, pid: usize) -> Option<&ProcessControlBlock> {
        self.pool.get(pid)
    }

    pub fn frames(&self) -> &A {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut A {
        &mut self.frames
    }

    pub fn hart(&self) -> &H {
        &self.hart
    }
}
