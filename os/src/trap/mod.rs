//! Trap上下文，以及启动用户进程的跳板start_process。
//!
//! 完整的Trap入口（保存寄存器、分发中断和系统调用）由内核的其余部分提供，
//! 这里只约定Trap上下文的布局，并负责从内核栈的栈顶回到用户态。

mod context;

pub use context::TrapContext;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod riscv64 {
    use core::arch::global_asm;
    use riscv::register::sie;

    // 进入start_process时，sp指向内核栈上的TrapContext，sstatus和sepc已经由__switch弹出的切换帧设置好。
    // 它把内核栈的栈顶存进sscratch，供下次Trap进入内核时使用，然后恢复通用寄存器，最后恢复sp并sret。
    global_asm!(
        r#"
    .altmacro
    .macro LOAD_GP n
        ld x\n, \n*8(sp)
    .endm
    .section .text
    .globl start_process
    .align 2
start_process:
    addi t0, sp, 35*8
    csrw sscratch, t0
    ld x1, 1*8(sp)
    ld x3, 3*8(sp)
    .set n, 4
    .rept 28
        LOAD_GP %n
        .set n, n+1
    .endr
    ld sp, 2*8(sp)
    sret
"#
    );

    extern "C" {
        fn start_process();
    }

    // start_process的地址，写进新进程切换帧里的ra
    pub fn start_process_entry() -> usize {
        start_process as usize
    }

    // 打开S模式的时钟中断，时钟中断驱动抢占式调度
    pub fn enable_timer_interrupt() {
        unsafe {
            sie::set_stimer();
        }
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub use riscv64::{enable_timer_interrupt, start_process_entry};
