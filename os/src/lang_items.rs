use core::arch::asm;
use core::panic::PanicInfo;

use crate::sbi::shutdown;

// 回溯的最大深度
const MAX_BACKTRACE_DEPTH: usize = 16;

// `#[panic_handler]`必须放在函数`fn(info: &PanicInfo) -> !`上
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("\u{1B}[31m{}\u{1B}[0m", info);
    unsafe {
        print_stack_trace();
    }
    shutdown(true)
}

// 沿着帧指针打印函数的调用栈，需要编译时保留帧指针（-C force-frame-pointers=yes）
pub unsafe fn print_stack_trace() {
    let mut fp: *const usize;
    asm!("mv {}, fp", out(reg) fp);
    println!("\u{1B}[31m[{}]\u{1B}[0m", "---START BACKTRACE---");
    let mut i = 0;
    while !fp.is_null() && i < MAX_BACKTRACE_DEPTH {
        let saved_ra = *fp.sub(1);
        let saved_fp = *fp.sub(2);

        println!(
            "\u{1B}[31m{:2}:\u{1B}[0m 0x{:016x}, fp = 0x{:016x}",
            i, saved_ra, saved_fp
        );

        i += 1;
        fp = saved_fp as *const usize;
    }
    println!("\u{1B}[31m[{}]\u{1B}[0m", "---END   BACKTRACE---");
}
