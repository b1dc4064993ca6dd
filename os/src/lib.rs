// 内核中以no_std模式编译；单元测试在宿主机上运行，需要标准库
#![cfg_attr(not(test), no_std)]

//! RISC-V Sv39的进程与虚拟内存核心。
//!
//! - `mm`：物理页帧分配器、三级页表、进程地址空间（与内核以1GB为粒度共享MMIO和内核区）
//! - `loader`：把ELF可执行文件的LOAD段装入进程地址空间
//! - `task`：PCB池、进程的创建/复制/回收，以及轮转调度
//! - `trap`：Trap上下文的布局，以及进入用户态的跳板
//!
//! 与CPU相关的部分（SBI、CSR、汇编）只在`riscv64-unknown-none`目标下编译，
//! 其余部分都能在宿主机上测试。

// 引入Rust内置的alloc库，用于动态内存分配
extern crate alloc;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[macro_use]
mod console;

pub mod config;
pub mod error;
pub mod loader;
pub mod mm;
pub mod sync;
pub mod task;
pub mod trap;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub mod kernel;
#[cfg(all(target_arch = "riscv64", target_os = "none", not(test)))]
mod lang_items;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub mod logging;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub mod sbi;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub mod timer;

#[cfg(test)]
mod test_util;

pub use error::{LoadError, OutOfMemory, ProcessError};
pub use loader::load_elf;
pub use mm::{FrameAllocator, MemorySet, PageTable, StackFrameAllocator};
pub use task::{ContextSwitch, Hart, ProcessControlBlock, ProcessManager, ProcessStatus};
