// 教学内核的内存管理与进程管理核心
// 硬件（TLB、中断屏蔽）和外部服务（调度、装载、文件系统）都通过trait接入

#[macro_use]
extern crate log;

extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod loader;
pub mod logging;
pub mod mm;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod trap;

pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, Services};
