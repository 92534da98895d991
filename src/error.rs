// 内核错误类型，系统调用边界处转换成负的错误码

use thiserror::Error;

// 错误码，和用户库约定的数值
pub const ENOSYS: isize = 1;
pub const EUNIMP: isize = 2;
pub const ENOMEM: isize = 3;
pub const EFAULT: isize = 6;
pub const ENAMETOOLONG: isize = 7;
pub const EINVAL: isize = 8;
pub const ENPROC: isize = 12;
pub const ENOEXEC: isize = 13;
pub const E2BIG: isize = 14;
pub const ESRCH: isize = 15;
pub const ENOENT: isize = 19;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("too many regions in address space")]
    TooManyRegions,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("no such child process")]
    NoSuchChild,
    #[error("segmentation fault")]
    SegmentationFault,
    #[error("write to read-only mapping")]
    ProtectionFault,
    // pid用完了
    #[error("no more processes")]
    ResourceExhausted,
    #[error("bad address")]
    BadAddress,
    #[error("no such file or directory")]
    NotFound,
    #[error("name too long")]
    NameTooLong,
    #[error("argument list too long")]
    ArgumentListTooLong,
    #[error("exec format error")]
    NotExecutable,
    #[error("operation not supported")]
    Unsupported,
}

impl KernelError {
    // 对应的错误码
    pub fn errno(&self) -> isize {
        match self {
            KernelError::OutOfMemory => ENOMEM,
            KernelError::TooManyRegions => EUNIMP,
            KernelError::InvalidArgument => EINVAL,
            KernelError::NoSuchChild => ESRCH,
            KernelError::SegmentationFault
            | KernelError::ProtectionFault
            | KernelError::BadAddress => EFAULT,
            KernelError::ResourceExhausted => ENPROC,
            KernelError::NotFound => ENOENT,
            KernelError::NameTooLong => ENAMETOOLONG,
            KernelError::ArgumentListTooLong => E2BIG,
            KernelError::NotExecutable => ENOEXEC,
            KernelError::Unsupported => ENOSYS,
        }
    }
    // 系统调用的返回值
    pub fn as_syscall_ret(&self) -> isize {
        -self.errno()
    }
}

pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_return_is_negative_errno() {
        assert_eq!(KernelError::OutOfMemory.as_syscall_ret(), -ENOMEM);
        assert_eq!(KernelError::NoSuchChild.as_syscall_ret(), -ESRCH);
        assert_eq!(KernelError::ResourceExhausted.errno(), ENPROC);
    }

    #[test]
    fn messages_come_from_thiserror() {
        assert_eq!(KernelError::TooManyRegions.to_string(), "too many regions in address space");
        assert_eq!(KernelError::SegmentationFault.to_string(), "segmentation fault");
    }
}
