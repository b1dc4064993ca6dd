// 进程管理
// - `PcbPool`：容量固定的PCB槽位，PID就是槽位下标
// - `ProcessManager`：创建、复制、查找、回收进程，以及轮转调度
// - `Hart`：调度器对CPU的要求（satp、start_process、__switch）

mod context;
mod manager;
mod pid;
mod process;
mod processor;
mod switch;

pub use context::TaskContext;
pub use manager::ProcessManager;
pub use pid::{KernelStack, PcbPool};
pub use process::{ProcessControlBlock, ProcessStatus};
pub use switch::{ContextSwitch, Hart};

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub use switch::Sv39Hart;
