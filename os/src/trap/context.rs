use crate::config::{SSTATUS_SIE, SSTATUS_SPIE, SSTATUS_SUM};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
// Trap上下文，保存在每个进程内核栈的栈顶
// 进入/退出Trap时，要恢复的寄存器：通用寄存器x[32]、sstatus、sepc、scause
// 布局是和trap.S里的start_process约定好的，不能随意调整字段顺序
pub struct TrapContext {
    // 通用寄存器，x[1]是ra，x[2]是sp，x[10]是a0
    pub x: [usize; 32],
    // CSR寄存器sstatus，记录Trap发生之前，CPU处于哪个特权级（S/U）
    pub sstatus: usize,
    // CSR寄存器sepc，记录Trap发生之前执行的最后一条指令地址
    // 执行sret回到User模式后，sepc的值会被复制到pc寄存器，CPU从这里继续执行
    pub sepc: usize,
    // CSR寄存器scause，记录Trap的原因
    pub scause: usize,
}

impl TrapContext {
    pub fn zero_init() -> Self {
        Self {
            x: [0; 32],
            sstatus: 0,
            sepc: 0,
            scause: 0,
        }
    }

    // 设置栈指针，寄存器x2存放的是栈顶指针sp
    pub fn set_sp(&mut self, sp: usize) {
        self.x[2] = sp;
    }

    pub fn sp(&self) -> usize {
        self.x[2]
    }

    // 设置返回值，寄存器x10是a0
    pub fn set_a0(&mut self, a0: usize) {
        self.x[10] = a0;
    }

    // 清除sstatus中的SIE位，切换到该进程时中断保持关闭，直到sret
    pub fn mask_interrupts(&mut self) {
        self.sstatus &= !SSTATUS_SIE;
    }

    // 初始化程序的TrapContext
    // SPP为0：sret后进入U模式；SPIE为1：sret后打开中断；SUM为1：内核可访问用户页
    pub fn app_init_context(entry: usize, sp: usize) -> Self {
        let mut cx = Self {
            x: [0; 32],
            sstatus: SSTATUS_SUM | SSTATUS_SPIE,
            sepc: entry, // 程序的入口地址（在.text段上）
            scause: 0,
        };
        // 设置程序的用户栈的栈顶指针
        cx.set_sp(sp);
        cx
    }
}
