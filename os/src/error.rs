//! 进程与内存管理的错误类型

use core::fmt::{self, Display, Formatter};

// 物理页帧分配器耗尽
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutOfMemory;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcessError {
    // PCB池中没有空闲槽位
    PoolExhausted,
    // 物理页帧分配失败
    OutOfMemory,
    // ELF程序头不一致
    MalformedImage,
    // 创建进程时PCB池已满（PoolExhausted在进程层面的名字）
    ProcessLimitReached,
    // 按PID找不到进程
    NotFound,
}

// ELF加载器的错误
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadError {
    MalformedImage,
    OutOfMemory,
}

pub type Result<T, E = ProcessError> = core::result::Result<T, E>;

impl Display for ProcessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ProcessError::PoolExhausted => "no free PCB slot",
            ProcessError::OutOfMemory => "out of physical memory",
            ProcessError::MalformedImage => "malformed ELF image",
            ProcessError::ProcessLimitReached => "process limit reached",
            ProcessError::NotFound => "process not found",
        };
        f.write_str(msg)
    }
}

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        ProcessError::from(*self).fmt(f)
    }
}

impl From<OutOfMemory> for ProcessError {
    fn from(_: OutOfMemory) -> Self {
        ProcessError::OutOfMemory
    }
}

impl From<OutOfMemory> for LoadError {
    fn from(_: OutOfMemory) -> Self {
        LoadError::OutOfMemory
    }
}

impl From<LoadError> for ProcessError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::MalformedImage => ProcessError::MalformedImage,
            LoadError::OutOfMemory => ProcessError::OutOfMemory,
        }
    }
}
