//! 一些配置

// 页面大小为4KB
pub const PAGE_SIZE: usize = 4096;
// 需要12位才能表示页面的任意位置。这是页内偏移（Page Offset）的位长。
pub const PAGE_SIZE_BITS: usize = 12;
// 每级页表有512个页表项，每个页表项占8字节，正好一个物理页
pub const PTE_PER_TABLE: usize = 512;
// 根页表（L2）的一个页表项覆盖1GB的地址空间（大页，gigapage）
pub const GIGAPAGE_SIZE: usize = 1 << 30;

// 进程的内核栈大小。Trap上下文和切换帧都存放在内核栈的顶部。
pub const KERNEL_STACK_SIZE: usize = PAGE_SIZE * 2;
pub const KERNEL_HEAP_SIZE: usize = 0x30_0000;
// PCB池的容量，即系统中最多能同时存在的进程数
pub const MAX_PROCESS_COUNT: usize = 16;

// 下面两段地址空间由内核页表建立，所有进程的根页表以1GB为粒度共享它们。
// MMIO：CLINT、PLIC、UART等设备寄存器都在这1GB里
pub const MMIO_BASE: usize = 0x0;
pub const MMIO_END: usize = 0x4000_0000;
// 内核镜像和可分配的物理内存（恒等映射）
pub const KERNEL_SPACE_BASE: usize = 0x8000_0000;
pub const KERNEL_SPACE_END: usize = 0xC000_0000;

// 用户地址空间：[USER_SPACE_BASE, USER_SPACE_END)
// 不能与上面的共享区域落在同一个根页表项里，否则会修改到内核的子页表
pub const USER_SPACE_BASE: usize = 0x1_0000_0000;
pub const USER_SPACE_END: usize = 0x40_0000_0000;

// 物理内存的结束地址
pub const MEMORY_END: usize = 0x8800_0000;

// CPU的时钟频率（Hz），即每秒CPU经过的时钟周期数。
pub const CLOCK_FREQ: usize = 12500000;
// 每秒时钟中断的次数，时钟中断驱动抢占式调度
pub const TICKS_PER_SEC: usize = 100;

// MMIO可将设备的寄存器映射到内存中，以便CPU就能通过读写内存来控制该设备。
// (起始地址, 长度)
pub const MMIO: &[(usize, usize)] = &[
    (0x0200_0000, 0x1_0000),  // CLINT
    (0x0c00_0000, 0x40_0000), // PLIC
    (0x1000_0000, 0x1000),    // UART
];

// CSR寄存器satp的格式：MODE (4 bits) | ASID (16 bits) | PPN (44 bits)
// 切换根页表时，只替换PPN，保留MODE和ASID
pub const SATP_MODE_ASID_MASK: usize = 0xffff_f000_0000_0000;

// CSR寄存器sstatus中用到的位
pub const SSTATUS_SIE: usize = 1 << 1; // S模式中断使能
pub const SSTATUS_SPIE: usize = 1 << 5; // sret后恢复到SIE的值
pub const SSTATUS_SPP: usize = 1 << 8; // Trap之前的特权级，0为U模式
pub const SSTATUS_SUM: usize = 1 << 18; // 允许S模式访问U模式的页
