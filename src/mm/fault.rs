// TLB缺失处理：查当前地址空间，把映射填进TLB

use super::{AddressSpace, MemoryManager, VirtAddr};
use crate::arch::{SplGuard, TlbEntry};
use crate::error::{KernelError, KernelResult};
use core::convert::TryFrom;

// 硬件报上来的缺页类型编码
pub const VM_FAULT_READ: usize = 0;
pub const VM_FAULT_WRITE: usize = 1;
pub const VM_FAULT_READONLY: usize = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultKind {
    Read,
    Write,
    // 写了一个只读表项
    ReadOnly,
}

impl TryFrom<usize> for FaultKind {
    type Error = KernelError;
    fn try_from(code: usize) -> Result<Self, Self::Error> {
        match code {
            VM_FAULT_READ => Ok(FaultKind::Read),
            VM_FAULT_WRITE => Ok(FaultKind::Write),
            VM_FAULT_READONLY => Ok(FaultKind::ReadOnly),
            _ => Err(KernelError::InvalidArgument),
        }
    }
}

// 处理一次读写缺失：定位所在段，算出物理地址，装进一个TLB槽位
// 不分配内存，不睡眠，也不碰页帧表和进程的锁
pub fn tlb_fill(mm: &MemoryManager, space: &AddressSpace, addr: VirtAddr) -> KernelResult<()> {
    let vpage = addr.page_base();
    let (segment, pa) = space
        .classify(vpage)
        .ok_or(KernelError::SegmentationFault)?;
    let entry = TlbEntry::new(vpage, pa, space.is_writable(segment));

    let _spl = SplGuard::raise(mm.cpu.as_ref());
    let tlb = &mm.tlb;
    let mut invalid = None;
    for slot in 0..tlb.num_slots() {
        let old = tlb.read(slot);
        if !old.is_valid() {
            invalid.get_or_insert(slot);
        } else if old.vpage() == vpage {
            // 标签不能重复，已有同一页的表项就原地覆盖
            tlb.write(slot, entry);
            trace!("tlb refill slot {}: {:?} {:?}", slot, segment, entry);
            return Ok(());
        }
    }
    match invalid {
        Some(slot) => {
            trace!("tlb fill slot {}: {:?} {:?}", slot, segment, entry);
            tlb.write(slot, entry);
        }
        None => {
            trace!("tlb full, random replace: {:?} {:?}", segment, entry);
            tlb.write_random(entry);
        }
    }
    Ok(())
}

// 多核TLB同步没有实现
pub fn vm_tlbshootdown() -> ! {
    panic!("tlb shootdown requested on a single-core vm");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Machine, SoftTlb, Tlb};
    use crate::config::{KernelConfig, USER_STACK};
    use crate::mm::{MapPermission, PhysAddr};
    use alloc::sync::Arc;

    struct Fixture {
        tlb: Arc<SoftTlb>,
        mm: Arc<MemoryManager>,
        space: AddressSpace,
    }

    fn fixture(slots: usize) -> Fixture {
        let tlb = Arc::new(SoftTlb::new(slots));
        let machine = Machine::new(tlb.clone(), Machine::soft().cpu);
        let config = KernelConfig {
            memory_size: 0x10_0000,
            ..KernelConfig::default()
        };
        let mm = MemoryManager::bootstrap(&config, machine).unwrap();
        let mut space = AddressSpace::new(&mm);
        space
            .define_region(VirtAddr(0x40_0000), 0x2000, MapPermission::R | MapPermission::X)
            .unwrap();
        space
            .define_region(VirtAddr(0x50_0000), 0x1000, MapPermission::R | MapPermission::W)
            .unwrap();
        space.prepare_load().unwrap();
        Fixture { tlb, mm, space }
    }

    #[test]
    fn fault_kind_codes() {
        assert_eq!(FaultKind::try_from(0), Ok(FaultKind::Read));
        assert_eq!(FaultKind::try_from(2), Ok(FaultKind::ReadOnly));
        assert_eq!(FaultKind::try_from(3), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn fill_installs_translation() {
        let f = fixture(4);
        tlb_fill(&f.mm, &f.space, VirtAddr(0x40_1234)).unwrap();
        let entry = f.tlb.lookup(VirtAddr(0x40_1234)).unwrap();
        let pbase = f.space.region(0).unwrap().pbase().unwrap();
        assert_eq!(entry.frame(), pbase.offset(0x1000));
        assert!(entry.is_dirty());
        assert_eq!(f.tlb.valid_count(), 1);
    }

    #[test]
    fn gap_between_regions_is_a_segfault() {
        let f = fixture(4);
        for addr in [0x40_2000, 0x4f_ffff, 0x50_1000, 0] {
            assert_eq!(
                tlb_fill(&f.mm, &f.space, VirtAddr(addr)),
                Err(KernelError::SegmentationFault)
            );
        }
        assert_eq!(f.tlb.valid_count(), 0);
    }

    #[test]
    fn text_is_clean_after_complete_load() {
        let mut f = fixture(4);
        f.space.complete_load();
        tlb_fill(&f.mm, &f.space, VirtAddr(0x40_0000)).unwrap();
        tlb_fill(&f.mm, &f.space, VirtAddr(0x50_0000)).unwrap();
        tlb_fill(&f.mm, &f.space, VirtAddr(USER_STACK - 1)).unwrap();
        assert!(!f.tlb.lookup(VirtAddr(0x40_0000)).unwrap().is_dirty());
        assert!(f.tlb.lookup(VirtAddr(0x50_0000)).unwrap().is_dirty());
        assert!(f.tlb.lookup(VirtAddr(USER_STACK - 1)).unwrap().is_dirty());
    }

    #[test]
    fn refault_reuses_the_same_slot() {
        let f = fixture(4);
        tlb_fill(&f.mm, &f.space, VirtAddr(0x50_0000)).unwrap();
        tlb_fill(&f.mm, &f.space, VirtAddr(0x50_0008)).unwrap();
        assert_eq!(f.tlb.valid_count(), 1);
    }

    #[test]
    fn full_tlb_falls_back_to_random_replacement() {
        let f = fixture(2);
        tlb_fill(&f.mm, &f.space, VirtAddr(0x40_0000)).unwrap();
        tlb_fill(&f.mm, &f.space, VirtAddr(0x40_1000)).unwrap();
        tlb_fill(&f.mm, &f.space, VirtAddr(0x50_0000)).unwrap();
        assert_eq!(f.tlb.valid_count(), 2);
        assert!(f.tlb.lookup(VirtAddr(0x50_0000)).is_some());
        // 第一次随机替换落在最高的槽位
        assert_eq!(f.tlb.read(1).vpage(), VirtAddr(0x50_0000));
        assert_ne!(f.tlb.read(0).frame(), PhysAddr(0));
        assert!(f.mm.cpu.interrupts_enabled());
    }

    #[test]
    #[should_panic]
    fn shootdown_panics() {
        vm_tlbshootdown();
    }
}
