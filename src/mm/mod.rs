// 内存管理模块：页帧分配、用户地址空间、TLB缺失处理

mod address;
mod address_space;
mod copyinout;
mod fault;
mod frame_allocator;
mod ram;

// 从子模块导出出来，mod.rs作为可见性屏障
pub use address::{pages_for, round_up, PhysAddr, PhysPageNum, VirtAddr};
pub use address_space::{stack_base, AddressSpace, MapPermission, Region, Segment};
pub use copyinout::{copyin, copyin_word, copyinstr, copyout, copyout_word, copyoutstr};
pub use fault::{tlb_fill, vm_tlbshootdown, FaultKind};
pub use fault::{VM_FAULT_READ, VM_FAULT_READONLY, VM_FAULT_WRITE};
pub use frame_allocator::{frame_alloc, FrameAllocator, FrameState, FrameTracker};
pub use ram::PhysMemory;

use crate::arch::{Cpu, Machine, Tlb};
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use alloc::sync::Arc;

// 内存管理器：页帧分配器加上它要用到的硬件
pub struct MemoryManager {
    pub frames: Arc<FrameAllocator>,
    pub tlb: Arc<dyn Tlb>,
    pub cpu: Arc<dyn Cpu>,
}

impl MemoryManager {
    // 初始化内存管理，页帧分配器接管全部物理内存
    pub fn bootstrap(config: &KernelConfig, machine: Machine) -> KernelResult<Arc<Self>> {
        let frames = FrameAllocator::new(config.memory_size, config.kernel_reserved);
        Self::with_allocator(frames, machine)
    }
    // 启动早期已经用steal_mem分过内存的分配器
    pub fn with_allocator(frames: FrameAllocator, machine: Machine) -> KernelResult<Arc<Self>> {
        if machine.cpu.online_cpus() > 1 {
            error!(
                "{} cpus online, tlb shootdown is not implemented",
                machine.cpu.online_cpus()
            );
            return Err(KernelError::Unsupported);
        }
        frames.bootstrap();
        Ok(Arc::new(Self {
            frames: Arc::new(frames),
            tlb: machine.tlb,
            cpu: machine.cpu,
        }))
    }
}
