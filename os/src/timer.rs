use crate::config::{CLOCK_FREQ, TICKS_PER_SEC};
use crate::sbi::set_timer;
use riscv::register::time;

// 返回时间
// 这里读取了计数器寄存器mtime。它统计了上电以来，CPU经过的时钟周期数（这个时钟不同于“CPU时钟”，是专门用于计时的）
pub fn get_time() -> usize {
    time::read()
}

// 设置下一个时钟中断（10ms后发生），每次中断都会触发一次调度
pub fn set_next_trigger() {
    let timer = get_time() + CLOCK_FREQ / TICKS_PER_SEC;
    set_timer(timer);
}
