// waitpid返回的状态字：低两位区分正常退出和被信号杀死

use crate::error::KernelError;

pub const SIGILL: i32 = 4;
pub const SIGBUS: i32 = 10;
pub const SIGSEGV: i32 = 11;

const WAIT_EXITED: i32 = 0;
const WAIT_SIGNALED: i32 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    // 调用exit正常退出，带退出码
    Exited(i32),
    // 因为异常被内核杀掉，带信号编号
    Signaled(i32),
}

impl WaitStatus {
    // 编码成用户看到的状态字
    pub fn encode(self) -> i32 {
        match self {
            WaitStatus::Exited(code) => ((code & 0xff) << 2) | WAIT_EXITED,
            WaitStatus::Signaled(sig) => (sig << 2) | WAIT_SIGNALED,
        }
    }
    pub fn decode(word: i32) -> Self {
        match word & 3 {
            WAIT_SIGNALED => WaitStatus::Signaled(word >> 2),
            _ => WaitStatus::Exited((word >> 2) & 0xff),
        }
    }
    // 导致进程被杀的错误对应的信号
    pub fn for_fault(err: KernelError) -> Option<Self> {
        match err {
            KernelError::SegmentationFault => Some(WaitStatus::Signaled(SIGSEGV)),
            KernelError::ProtectionFault => Some(WaitStatus::Signaled(SIGBUS)),
            _ => None,
        }
    }
}
