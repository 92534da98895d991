// pid实现。进程的唯一标识符，从小往大找第一个空闲的

use crate::config::PID_MIN;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

// pid作为一种资源，也使用分配器和自动回收
pub struct PidAllocator {
    // used[i]表示pid PID_MIN+i是否被占用
    used: spin::Mutex<Vec<bool>>,
}

impl PidAllocator {
    // 新建分配器，可用范围[PID_MIN, pid_max]
    pub fn new(pid_max: usize) -> Self {
        assert!(pid_max >= PID_MIN);
        Self {
            used: spin::Mutex::new(vec![false; pid_max - PID_MIN + 1]),
        }
    }
    // 分配pid句柄，用完了返回None
    pub fn alloc(self: &Arc<Self>) -> Option<PidHandle> {
        let mut used = self.used.lock();
        let index = used.iter().position(|u| !u)?;
        used[index] = true;
        Some(PidHandle {
            pid: PID_MIN + index,
            allocator: Arc::clone(self),
        })
    }
    // 回收pid
    fn dealloc(&self, pid: usize) {
        let mut used = self.used.lock();
        let slot = &mut used[pid - PID_MIN];
        assert!(*slot, "pid {} has been deallocated!", pid);
        *slot = false;
    }
    // 正在使用的pid数
    pub fn in_use(&self) -> usize {
        self.used.lock().iter().filter(|u| **u).count()
    }
}

// pid的资源抽象，也就是pid句柄
pub struct PidHandle {
    pid: usize,
    allocator: Arc<PidAllocator>,
}

impl PidHandle {
    pub fn pid(&self) -> usize {
        self.pid
    }
}

// 自动回收
impl Drop for PidHandle {
    fn drop(&mut self) {
        trace!("release pid {}", self.pid);
        self.allocator.dealloc(self.pid);
    }
}
