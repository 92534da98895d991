// 内核的各种常量配置

// 页大小4K
pub const PAGE_SIZE: usize = 0x1000;
// 页内偏移位宽
pub const PAGE_SIZE_BITS: usize = 0xc;
// 页号掩码，低位清零得到页对齐地址
pub const PAGE_FRAME: usize = !(PAGE_SIZE - 1);

// 用户栈顶，栈从这里向下长
pub const USER_STACK: usize = 0x8000_0000;
// 固定的用户栈页数，48K
pub const STACK_PAGES: usize = 12;
// 用户栈大小
pub const USER_STACK_SIZE: usize = STACK_PAGES * PAGE_SIZE;

// 硬件TLB槽位数
pub const TLB_ENTRIES: usize = 64;

// pid范围，0不分配
pub const PID_MIN: usize = 1;
pub const PID_MAX: usize = 32767;

// 路径长度上限（含结尾的0）
pub const PATH_MAX: usize = 1024;
// exec参数总字节上限
pub const ARG_MAX: usize = 64 * 1024;

// 默认物理内存大小
pub const MEMORY_SIZE: usize = 0x40_0000;
// 内核镜像占据的低端物理内存，不归页帧分配器管理
pub const KERNEL_RESERVED: usize = 0x1_0000;

// 运行时配置，默认值取上面的常量，测试里可以造小机器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub memory_size: usize,
    pub kernel_reserved: usize,
    pub pid_max: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            memory_size: MEMORY_SIZE,
            kernel_reserved: KERNEL_RESERVED,
            pid_max: PID_MAX,
        }
    }
}
