// 系统调用分发

const SYSCALL_EXIT: usize = 93;
const SYSCALL_GETPID: usize = 172;
const SYSCALL_FORK: usize = 220;
const SYSCALL_EXEC: usize = 221;
const SYSCALL_WAITPID: usize = 260;

mod process;

use crate::error::ENOSYS;
use crate::trap::TrapContext;
pub use process::*;

// 按调用号分发，返回值放回a0
pub fn syscall(syscall_id: usize, args: [usize; 3], cx: &TrapContext) -> isize {
    match syscall_id {
        SYSCALL_EXIT => sys_exit(args[0] as i32),
        SYSCALL_GETPID => sys_getpid(),
        SYSCALL_FORK => sys_fork(cx),
        SYSCALL_EXEC => sys_execv(args[0], args[1]),
        SYSCALL_WAITPID => sys_waitpid(args[0] as isize, args[1], args[2]),
        _ => {
            warn!("Unsupported syscall_id: {}", syscall_id);
            -ENOSYS
        }
    }
}
