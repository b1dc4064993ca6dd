//! 内核使用的全局进程管理器，以及时钟中断、系统调用等入口调用的函数。
//!
//! 进程管理器在切换时不能保持借用：先在借用内决定切到谁，释放借用后再执行__switch。

use lazy_static::*;
use log::{info, warn};

use crate::config::{KERNEL_SPACE_BASE, MEMORY_END, MMIO};
use crate::error::{OutOfMemory, ProcessError, Result};
use crate::mm::{MapPermission, MemorySet, PhysAddr, StackFrameAllocator};
use crate::sync::UPSafeCell;
use crate::task::{ContextSwitch, ProcessManager, ProcessStatus, Sv39Hart};
use crate::{timer, trap};

type KernelProcessManager = ProcessManager<StackFrameAllocator, Sv39Hart>;

lazy_static! {
    static ref PROCESS_MANAGER: UPSafeCell<Option<KernelProcessManager>> =
        unsafe { UPSafeCell::new(None) };
}

fn with_manager<V>(f: impl FnOnce(&mut KernelProcessManager) -> V) -> Result<V> {
    PROCESS_MANAGER
        .exclusive_session(|manager| manager.as_mut().map(f))
        .ok_or(ProcessError::NotFound)
}

// 初始化内核堆、物理页帧分配器和内核地址空间，然后创建进程管理器
// ekernel是内核镜像的结束地址（由链接脚本给出），其后直到MEMORY_END的物理内存都交给页帧分配器
pub fn init(ekernel: usize) -> core::result::Result<(), OutOfMemory> {
    crate::mm::heap_allocator::init_heap();
    let mut frames = StackFrameAllocator::new(
        PhysAddr::from(ekernel).ceil(),
        PhysAddr::from(MEMORY_END).floor(),
    );
    let kernel_space = init_kernel_space(&mut frames, ekernel)?;
    kernel_space.activate();
    info!("kernel space activated, {:?}", frames);
    *PROCESS_MANAGER.exclusive_access() = Some(ProcessManager::new(
        kernel_space.root_ppn(),
        frames,
        Sv39Hart,
    ));
    Ok(())
}

// 内核页表：恒等映射MMIO、内核镜像和全部物理内存。进程的根页表以1GB为粒度共享这些映射。
fn init_kernel_space(
    frames: &mut StackFrameAllocator,
    ekernel: usize,
) -> core::result::Result<MemorySet, OutOfMemory> {
    let rw = MapPermission::R | MapPermission::W;
    let mut sections = alloc::vec![
        ("kernel", KERNEL_SPACE_BASE, ekernel, rw | MapPermission::X),
        ("physical memory", ekernel, MEMORY_END, rw),
    ];
    sections.extend(
        MMIO.iter()
            .map(|&(start, len)| ("mmio", start, start + len, rw)),
    );
    MemorySet::new_kernel(frames, &sections)
}

pub fn create_process(elf_data: &[u8]) -> Result<usize> {
    with_manager(|manager| manager.create_process(elf_data))?
}

// fork系统调用：复制当前进程
pub fn fork_current() -> Result<usize> {
    with_manager(|manager| {
        let pid = manager.current_pid().ok_or(ProcessError::NotFound)?;
        manager.duplicate(pid)
    })?
}

pub fn process_status(pid: usize) -> Result<ProcessStatus> {
    with_manager(|manager| manager.find_process_by_pid(pid).map(|pcb| pcb.status))?
}

// 调度，切换到下一个就绪进程
pub fn schedule() {
    let switch: Option<ContextSwitch> = with_manager(|manager| manager.prepare_schedule())
        .ok()
        .flatten();
    if let Some(switch) = switch {
        unsafe {
            switch.run();
        }
    }
}

// 当前进程退出（exit系统调用，或被内核杀死）
pub fn exit_current() {
    let killed = with_manager(|manager| match manager.current_pid() {
        Some(pid) => manager.kill(pid).map(|_| pid),
        None => Err(ProcessError::NotFound),
    })
    .and_then(|result| result);
    if let Err(e) = killed {
        warn!("exit without a running process: {}", e);
    }
    schedule();
}

// 时钟中断：设置下一次中断，然后调度
pub fn on_timer_tick() {
    timer::set_next_trigger();
    schedule();
}

// 开启时钟中断，从idle控制流进入第一个进程。所有进程都退出后才返回。
pub fn run_processes() {
    trap::enable_timer_interrupt();
    timer::set_next_trigger();
    schedule();
    info!("all processes exited");
}
