// 硬件相关部分：TLB和处理器

mod cpu;
mod tlb;

pub use cpu::{Cpu, SoftCpu, SplGuard};
pub use tlb::{SoftTlb, Tlb, TlbEntry, TlbFlags};

use crate::config::TLB_ENTRIES;
use alloc::sync::Arc;

// 内核看到的机器
#[derive(Clone)]
pub struct Machine {
    pub tlb: Arc<dyn Tlb>,
    pub cpu: Arc<dyn Cpu>,
}

impl Machine {
    pub fn new(tlb: Arc<dyn Tlb>, cpu: Arc<dyn Cpu>) -> Self {
        Self { tlb, cpu }
    }
    // 单核、默认槽位数的模拟机器
    pub fn soft() -> Self {
        Self::new(Arc::new(SoftTlb::new(TLB_ENTRIES)), Arc::new(SoftCpu::new()))
    }
}
