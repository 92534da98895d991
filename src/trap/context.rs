// Trap上下文：陷入内核时保存的用户寄存器

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrapContext {
    // 32个通用寄存器，x[2]是sp，x[10]起是参数/返回值，x[17]是系统调用号
    pub x: [usize; 32],
    /// sepc记录 Trap 发生之前执行的最后一条指令的地址
    pub sepc: usize,
}

impl TrapContext {
    // 修改栈指针
    pub fn set_sp(&mut self, sp: usize) {
        self.x[2] = sp;
    }
    pub fn sp(&self) -> usize {
        self.x[2]
    }
    // 构造进入用户程序的上下文，从entry开始执行
    pub fn app_init_context(entry: usize, sp: usize) -> Self {
        let mut cx = Self {
            x: [0; 32],
            sepc: entry,
        };
        cx.set_sp(sp);
        cx
    }
}
