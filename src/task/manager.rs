// 进程表：pid到进程的映射，活着的和退出了还没被回收的都在里面

use super::Process;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

pub struct ProcessTable {
    procs: spin::Mutex<BTreeMap<usize, Arc<Process>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            procs: spin::Mutex::new(BTreeMap::new()),
        }
    }
    // 登记进程
    pub fn insert(&self, process: Arc<Process>) {
        let pid = process.getpid();
        let old = self.procs.lock().insert(pid, process);
        assert!(old.is_none(), "pid {} registered twice", pid);
    }
    // 移出进程表，返回的强引用交给调用者释放
    pub fn remove(&self, pid: usize) -> Option<Arc<Process>> {
        self.procs.lock().remove(&pid)
    }
    pub fn get(&self, pid: usize) -> Option<Arc<Process>> {
        self.procs.lock().get(&pid).cloned()
    }
    pub fn contains(&self, pid: usize) -> bool {
        self.procs.lock().contains_key(&pid)
    }
    pub fn len(&self) -> usize {
        self.procs.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn pids(&self) -> Vec<usize> {
        self.procs.lock().keys().copied().collect()
    }
    // 清空进程表，关机时用
    pub fn drain(&self) -> Vec<Arc<Process>> {
        let procs = core::mem::take(&mut *self.procs.lock());
        procs.into_values().collect()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
