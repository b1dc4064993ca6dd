#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
// 切换帧，压在进程内核栈中TrapContext的正下方。
// __switch切入一个进程时，从它保存的sp处弹出这4个字：sstatus、sepc、scause写回CSR，然后跳到ra。
// 对刚创建（或刚fork出来）的进程，ra是start_process，从这里进入用户态；
// 对被切出的进程，ra是__switch内部的恢复点，它会接着恢复s0~s11，回到调用__switch的地方。
pub struct TaskContext {
    pub ra: usize,
    pub sstatus: usize,
    pub sepc: usize,
    pub scause: usize,
}

impl TaskContext {
    pub fn zero_init() -> Self {
        Self {
            ra: 0,
            sstatus: 0,
            sepc: 0,
            scause: 0,
        }
    }

    // 第一次被调度时，经由start_process进入用户态
    // sstatus和sepc与Trap上下文中的保持一致
    pub fn goto_start_process(start_process: usize, sstatus: usize, sepc: usize) -> Self {
        Self {
            ra: start_process,
            sstatus,
            sepc,
            scause: 0,
        }
    }
}
