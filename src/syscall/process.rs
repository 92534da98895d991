// 进程管理相关的系统调用

use crate::config::{ARG_MAX, PATH_MAX};
use crate::error::{KernelError, KernelResult};
use crate::mm::{copyin_word, copyinstr, copyout, AddressSpace, VirtAddr};
use crate::task::{current_process, exit_current_and_run_next, ExecEntry, Process, WaitStatus};
use crate::trap::TrapContext;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem::size_of;

// 系统调用一定发生在某个进程里
fn current() -> Arc<Process> {
    match current_process() {
        Some(process) => process,
        None => panic!("system call without a current process"),
    }
}

fn ret(result: KernelResult<usize>) -> isize {
    match result {
        Ok(value) => value as isize,
        Err(err) => err.as_syscall_ret(),
    }
}

// 退出进程，要给出退出码
pub fn sys_exit(exit_code: i32) -> ! {
    debug!("[kernel] Application exited with code {}", exit_code);
    exit_current_and_run_next(WaitStatus::Exited(exit_code))
}

// 获得pid值
pub fn sys_getpid() -> isize {
    current().getpid() as isize
}

// 复刻进程，父进程拿到子进程的pid
pub fn sys_fork(cx: &TrapContext) -> isize {
    ret(current().fork(cx).map(|child| child.getpid()))
}

fn waitpid(process: &Arc<Process>, pid: isize, status_ptr: usize, options: usize) -> KernelResult<usize> {
    if options != 0 {
        return Err(KernelError::InvalidArgument);
    }
    if pid <= 0 {
        return Err(KernelError::NoSuchChild);
    }
    let (pid, status) = process.waitpid(pid as usize, options)?;
    if status_ptr != 0 {
        let space = process.space().ok_or(KernelError::BadAddress)?;
        copyout(&space, VirtAddr(status_ptr), &status.encode().to_ne_bytes())?;
    }
    Ok(pid)
}

// 等待子进程退出，状态字写到status_ptr（为0就不写）
pub fn sys_waitpid(pid: isize, status_ptr: usize, options: usize) -> isize {
    ret(waitpid(&current(), pid, status_ptr, options))
}

// 把以0结尾的argv指针数组连同字符串一起拷进内核，总量不超过ARG_MAX
fn copyin_args(space: &AddressSpace, argv_ptr: usize) -> KernelResult<Vec<String>> {
    let mut args = Vec::new();
    if argv_ptr == 0 {
        return Ok(args);
    }
    let word = size_of::<usize>();
    let mut used = 0;
    loop {
        let slot = argv_ptr
            .checked_add(args.len() * word)
            .ok_or(KernelError::BadAddress)?;
        let ptr = copyin_word(space, VirtAddr(slot))?;
        if ptr == 0 {
            break;
        }
        used += word;
        if used >= ARG_MAX {
            return Err(KernelError::ArgumentListTooLong);
        }
        let arg = copyinstr(space, VirtAddr(ptr), ARG_MAX - used).map_err(|err| match err {
            KernelError::NameTooLong => KernelError::ArgumentListTooLong,
            err => err,
        })?;
        used += arg.len() + 1;
        args.push(arg);
    }
    Ok(args)
}

// 先把路径和参数拷进内核，旧地址空间马上就要没了
fn execv(process: &Arc<Process>, path_ptr: usize, argv_ptr: usize) -> KernelResult<ExecEntry> {
    if path_ptr == 0 {
        return Err(KernelError::NotFound);
    }
    let space = process.space().ok_or(KernelError::BadAddress)?;
    let path = copyinstr(&space, VirtAddr(path_ptr), PATH_MAX)?;
    let args = copyin_args(&space, argv_ptr)?;
    drop(space);
    process.exec(&path, &args)
}

// 使用elf在进程上运行新内容，成功时不返回
pub fn sys_execv(path_ptr: usize, argv_ptr: usize) -> isize {
    let process = current();
    match execv(&process, path_ptr, argv_ptr) {
        Ok(entry) => {
            let usermode = Arc::clone(&process.kernel().usermode);
            usermode.enter(&process, entry.trap_context())
        }
        Err(err) => {
            debug!("pid {} exec failed: {}", process.getpid(), err);
            err.as_syscall_ret()
        }
    }
}
