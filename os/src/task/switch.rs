//! 进程切换分成两步：调度器先决定切到谁，得到一个ContextSwitch；
//! 释放掉对进程管理器的借用后，再由Hart真正执行__switch。

// 一次上下文切换所需的全部信息
// from/to为None时表示idle控制流（启动内核的那个控制流）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSwitch {
    pub from: Option<usize>,
    pub to: Option<usize>,
    // 切出方的栈指针保存到这里（PCB的kernel_sp字段或idle的栈指针）
    pub current_sp: *mut usize,
    // 切入方保存的栈指针，指向它的切换帧
    pub next_sp: usize,
}

// 进程管理器所依赖的CPU侧操作
pub trait Hart {
    // 读CSR寄存器satp
    fn satp(&self) -> usize;
    // 写CSR寄存器satp，并刷新TLB
    fn set_satp(&mut self, satp: usize);
    // start_process跳板的地址
    fn start_process_entry(&self) -> usize;
    // 执行切换。对真实的CPU，只有当切出方再次被调度时，这个函数才会返回。
    //
    // # Safety
    // current_sp和next_sp必须指向仍然有效的内核栈。
    unsafe fn switch_to(&mut self, switch: ContextSwitch);
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod riscv64 {
    use super::{ContextSwitch, Hart};
    use core::arch::{asm, global_asm};
    use riscv::register::satp;

    // __switch(current_sp_ptr, next_sp)
    // 1. 在当前栈上保存ra、s0~s11，再压入切换帧：ra为__switch_resume，以及此刻的sstatus、sepc、scause
    // 2. 把sp保存到*current_sp_ptr，换成next_sp
    // 3. 弹出对方的切换帧，写回CSR，ret到对方的ra
    global_asm!(
        r#"
    .altmacro
    .macro SAVE_SN n
        sd s\n, (\n+1)*8(sp)
    .endm
    .macro LOAD_SN n
        ld s\n, (\n+1)*8(sp)
    .endm
    .section .text
    .globl __switch
    .align 2
__switch:
    addi sp, sp, -13*8
    sd ra, 0(sp)
    .set n, 0
    .rept 12
        SAVE_SN %n
        .set n, n+1
    .endr
    addi sp, sp, -4*8
    la t0, __switch_resume
    sd t0, 0(sp)
    csrr t0, sstatus
    sd t0, 1*8(sp)
    csrr t0, sepc
    sd t0, 2*8(sp)
    csrr t0, scause
    sd t0, 3*8(sp)
    sd sp, 0(a0)
    mv sp, a1
    ld t0, 1*8(sp)
    csrw sstatus, t0
    ld t0, 2*8(sp)
    csrw sepc, t0
    ld t0, 3*8(sp)
    csrw scause, t0
    ld ra, 0(sp)
    addi sp, sp, 4*8
    ret
__switch_resume:
    ld ra, 0(sp)
    .set n, 0
    .rept 12
        LOAD_SN %n
        .set n, n+1
    .endr
    addi sp, sp, 13*8
    ret
"#
    );

    extern "C" {
        fn __switch(current_sp_ptr: *mut usize, next_sp: usize);
    }

    impl ContextSwitch {
        // 执行切换。调用前必须已经释放对进程管理器的借用。
        //
        // # Safety
        // 见Hart::switch_to
        pub unsafe fn run(self) {
            __switch(self.current_sp, self.next_sp);
        }
    }

    // 单核RISC-V的CPU
    pub struct Sv39Hart;

    impl Hart for Sv39Hart {
        fn satp(&self) -> usize {
            satp::read().bits()
        }

        fn set_satp(&mut self, value: usize) {
            unsafe {
                satp::write(value);
                asm!("sfence.vma");
            }
        }

        fn start_process_entry(&self) -> usize {
            crate::trap::start_process_entry()
        }

        unsafe fn switch_to(&mut self, switch: ContextSwitch) {
            switch.run();
        }
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub use riscv64::Sv39Hart;
