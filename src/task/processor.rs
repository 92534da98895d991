// 处理器抽象：当前运行的进程，以及线程调度和回到用户态这两个外部接口

use super::Process;
use crate::error::KernelResult;
use crate::trap::TrapContext;
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::RefCell;

// 新线程的入口，拿到自己的进程和一份trap上下文，永不返回
pub type ForkEntry = fn(Arc<Process>, Box<TrapContext>) -> !;

// 线程调度器
pub trait Scheduler: Send + Sync {
    // 为进程创建一个内核线程，从entry开始运行
    fn thread_fork(
        &self,
        name: &str,
        process: Arc<Process>,
        entry: ForkEntry,
        cx: Box<TrapContext>,
    ) -> KernelResult<()>;
    // 结束当前线程
    fn thread_exit(&self) -> !;
}

// 带着trap上下文回到用户态
pub trait UserMode: Send + Sync {
    fn enter(&self, process: &Arc<Process>, cx: TrapContext) -> !;
}

thread_local! {
    // 每个内核线程各自记着自己在跑哪个进程
    static CURRENT: RefCell<Option<Arc<Process>>> = RefCell::new(None);
}

// 接口，获取当前处理器上正在运行的进程
pub fn current_process() -> Option<Arc<Process>> {
    CURRENT.with(|current| current.borrow().clone())
}

// 接口，取走当前进程
pub fn take_current_process() -> Option<Arc<Process>> {
    CURRENT.with(|current| current.borrow_mut().take())
}

// 设置当前进程，返回原来的
pub fn set_current_process(process: Option<Arc<Process>>) -> Option<Arc<Process>> {
    CURRENT.with(|current| current.replace(process))
}
