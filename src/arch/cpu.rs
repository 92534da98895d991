// 处理器的中断屏蔽与核数

use core::cell::Cell;

// 中断屏蔽原语，splhigh关中断并返回之前的状态，splx恢复
pub trait Cpu: Send + Sync {
    fn splhigh(&self) -> bool;
    fn splx(&self, enabled: bool);
    fn interrupts_enabled(&self) -> bool;
    // 在线的核数，多核下TLB没法互相同步
    fn online_cpus(&self) -> usize {
        1
    }
}

// 关中断的作用域，离开时恢复
pub struct SplGuard<'a> {
    cpu: &'a dyn Cpu,
    prev: bool,
}

impl<'a> SplGuard<'a> {
    pub fn raise(cpu: &'a dyn Cpu) -> Self {
        let prev = cpu.splhigh();
        Self { cpu, prev }
    }
}

impl Drop for SplGuard<'_> {
    fn drop(&mut self) {
        self.cpu.splx(self.prev);
    }
}

thread_local! {
    // 中断优先级跟着线程走，切换线程时各自保存
    static INTERRUPTS_ON: Cell<bool> = Cell::new(true);
}

// 模拟的处理器
pub struct SoftCpu {
    online: usize,
}

impl SoftCpu {
    pub fn new() -> Self {
        Self { online: 1 }
    }
    pub fn with_cpus(online: usize) -> Self {
        Self { online }
    }
}

impl Default for SoftCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu for SoftCpu {
    fn splhigh(&self) -> bool {
        INTERRUPTS_ON.with(|on| on.replace(false))
    }
    fn splx(&self, enabled: bool) {
        INTERRUPTS_ON.with(|on| on.set(enabled));
    }
    fn interrupts_enabled(&self) -> bool {
        INTERRUPTS_ON.with(|on| on.get())
    }
    fn online_cpus(&self) -> usize {
        self.online
    }
}
