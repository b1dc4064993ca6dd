use core::mem::size_of;

use super::context::TaskContext;
use super::pid::KernelStack;
use crate::mm::MemorySet;
use crate::trap::TrapContext;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    // 刚从PCB池分配出来，还没有初始化完
    Created,
    // 在就绪队列中，等待被调度
    Ready,
    // 正在CPU上执行
    Running,
    // 已经退出或被杀死，等待回收
    Dead,
}

// 进程控制块。PCB池里每个槽位都有一个，PID就是槽位下标。
pub struct ProcessControlBlock {
    pub pid: usize,
    pub parent_pid: Option<usize>,
    pub status: ProcessStatus,
    pub priority: usize,
    // 被调度执行过的时钟中断总数
    pub total_ticks: usize,
    // 本次被调度以来经过的时钟中断数
    pub ticks_after_schedule: usize,
    // 进程的地址空间，拥有根页表
    pub memory_set: Option<MemorySet>,
    // 切出时保存的内核栈指针，指向切换帧
    pub kernel_sp: usize,
    kstack: KernelStack,
}

impl ProcessControlBlock {
    pub fn new(pid: usize) -> Self {
        Self {
            pid,
            parent_pid: None,
            status: ProcessStatus::Created,
            priority: 0,
            total_ticks: 0,
            ticks_after_schedule: 0,
            memory_set: None,
            kernel_sp: 0,
            kstack: KernelStack::new(),
        }
    }

    // 槽位被重新分配时，清空上一个进程留下的全部内容
    pub fn reset(&mut self, pid: usize) {
        self.pid = pid;
        self.parent_pid = None;
        self.status = ProcessStatus::Created;
        self.priority = 0;
        self.total_ticks = 0;
        self.ticks_after_schedule = 0;
        self.memory_set = None;
        self.kernel_sp = 0;
        self.kstack.clear();
    }

    fn trap_cx_ptr(&self) -> *mut TrapContext {
        (self.kstack.get_top() - size_of::<TrapContext>()) as *mut TrapContext
    }

    // 内核栈栈顶的Trap上下文
    pub fn trap_cx(&self) -> &TrapContext {
        unsafe { &*self.trap_cx_ptr() }
    }

    pub fn trap_cx_mut(&mut self) -> &mut TrapContext {
        unsafe { &mut *self.trap_cx_ptr() }
    }

    // 当前保存在kernel_sp处的切换帧
    pub fn task_cx(&self) -> Option<TaskContext> {
        if self.kernel_sp == 0 || !self.kstack.contains(self.kernel_sp) {
            return None;
        }
        Some(unsafe { *(self.kernel_sp as *const TaskContext) })
    }

    pub fn kernel_sp_ptr(&mut self) -> *mut usize {
        &mut self.kernel_sp as *mut usize
    }

    pub fn token(&self) -> Option<usize> {
        self.memory_set.as_ref().map(|ms| ms.token())
    }

    // 在内核栈顶写入Trap上下文，再在其下方压入切换帧，使第一次调度时经由start_process进入用户态
    pub fn init_kernel_stack(&mut self, trap_cx: TrapContext, start_process: usize) {
        let task_cx = TaskContext::goto_start_process(start_process, trap_cx.sstatus, trap_cx.sepc);
        self.kstack.push_below(0, trap_cx);
        let sp = self
            .kstack
            .push_below(size_of::<TrapContext>(), task_cx);
        self.kernel_sp = sp as usize;
    }
}
