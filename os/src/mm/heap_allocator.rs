//! 实现动态地分配堆内存。PCB池、就绪队列等都放在内核堆上。

use crate::config::KERNEL_HEAP_SIZE;
use buddy_system_allocator::LockedHeap;

// 指定全局内存分配器
// LockedHeap实现了GlobalAlloc
#[global_allocator]
static HEAP_ALLOCATOR: LockedHeap = LockedHeap::empty();

static mut HEAP_SPACE: [u8; KERNEL_HEAP_SIZE] = [0; KERNEL_HEAP_SIZE];

// 初始化堆空间：提供一块内存空间（HEAP_SPACE），作为「初始堆」。
// HEAP_SPACE位于.bss段中。因此这个堆也位于.bss段。
pub fn init_heap() {
    unsafe {
        // LockedHeap是被Mutex<T>包装的类型
        HEAP_ALLOCATOR
            .lock()
            .init(core::ptr::addr_of_mut!(HEAP_SPACE) as usize, KERNEL_HEAP_SIZE);
    }
}
