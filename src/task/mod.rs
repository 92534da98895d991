// 进程管理模块

mod manager;
mod pid;
mod process;
mod processor;
mod wait;

use crate::trap::TrapContext;
use alloc::boxed::Box;
use alloc::sync::Arc;

pub use manager::ProcessTable;
pub use pid::{PidAllocator, PidHandle};
pub use process::{ChildRecord, ExecEntry, Process, ProcessInner};
pub use processor::{
    current_process, set_current_process, take_current_process, ForkEntry, Scheduler, UserMode,
};
pub use wait::{WaitStatus, SIGBUS, SIGILL, SIGSEGV};

// 退出当前进程，结束当前线程
pub fn exit_current_and_run_next(status: WaitStatus) -> ! {
    // 直接取走当前进程，一会就要结束了
    let process = match take_current_process() {
        Some(process) => process,
        None => panic!("exit without a current process"),
    };
    let scheduler = Arc::clone(&process.kernel().scheduler);
    process.exit(status);
    drop(process);
    scheduler.thread_exit()
}

// fork出来的子线程从这里开始：装上自己的地址空间，fork返回0
pub(crate) fn enter_forked_process(process: Arc<Process>, cx: Box<TrapContext>) -> ! {
    let mut cx = *cx;
    cx.x[10] = 0;
    enter_new_process(process, Box::new(cx))
}

// 新程序的线程从这里开始，直接带着给定的上下文进入用户态
pub(crate) fn enter_new_process(process: Arc<Process>, cx: Box<TrapContext>) -> ! {
    set_current_process(Some(Arc::clone(&process)));
    if let Some(space) = process.space() {
        space.activate();
    }
    let usermode = Arc::clone(&process.kernel().usermode);
    usermode.enter(&process, *cx)
}
