// 用户地址空间：两个数据段加一个固定大小的栈，每段背后是一段连续页帧

use super::{frame_alloc, FrameTracker, MemoryManager, PhysAddr, VirtAddr};
use crate::arch::SplGuard;
use crate::config::{PAGE_SIZE, STACK_PAGES, USER_STACK};
use crate::error::{KernelError, KernelResult};
use alloc::sync::Arc;
use bitflags::*;

bitflags! {
    // 段的访问权限，记下来但目前一律按读写映射
    pub struct MapPermission: u8 {
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
// 地址落在哪一段，第一个区域视作代码段
pub enum Segment {
    Text,
    Data,
    Stack,
}

// 一个区域：虚拟起始地址、页数、背后的页帧
pub struct Region {
    vbase: VirtAddr,
    npages: usize,
    perm: MapPermission,
    frames: Option<FrameTracker>,
}

impl Region {
    pub fn vbase(&self) -> VirtAddr {
        self.vbase
    }
    pub fn npages(&self) -> usize {
        self.npages
    }
    // 区域的上界（不含）
    pub fn vtop(&self) -> VirtAddr {
        self.vbase.offset(self.npages * PAGE_SIZE)
    }
    pub fn perm(&self) -> MapPermission {
        self.perm
    }
    // 物理起始地址，prepare_load之前没有
    pub fn pbase(&self) -> Option<PhysAddr> {
        self.frames.as_ref().map(|f| f.base())
    }
    pub fn contains(&self, va: VirtAddr) -> bool {
        va >= self.vbase && va < self.vtop()
    }
    // 只拷贝描述，不带页帧
    fn describe(&self) -> Self {
        Self {
            vbase: self.vbase,
            npages: self.npages,
            perm: self.perm,
            frames: None,
        }
    }
}

// 用户栈的下界
pub fn stack_base() -> VirtAddr {
    VirtAddr(USER_STACK - STACK_PAGES * PAGE_SIZE)
}

// 地址空间结构体
pub struct AddressSpace {
    mm: Arc<MemoryManager>,
    regions: [Option<Region>; 2],
    stack: Option<FrameTracker>,
    load_complete: bool,
}

impl AddressSpace {
    // 新建空的地址空间
    pub fn new(mm: &Arc<MemoryManager>) -> Self {
        Self {
            mm: Arc::clone(mm),
            regions: [None, None],
            stack: None,
            load_complete: false,
        }
    }
    pub fn memory_manager(&self) -> &Arc<MemoryManager> {
        &self.mm
    }
    // 定义一个区域，起止向外扩到页边界，最多两个。上界超出地址空间的不收
    pub fn define_region(
        &mut self,
        vaddr: VirtAddr,
        size: usize,
        perm: MapPermission,
    ) -> KernelResult<()> {
        assert!(!self.is_prepared(), "define_region after prepare_load");
        let vbase = vaddr.page_base();
        let vtop = vaddr
            .0
            .checked_add(size)
            .and_then(|end| end.checked_add(PAGE_SIZE - 1))
            .map(|end| end & !(PAGE_SIZE - 1))
            .ok_or(KernelError::InvalidArgument)?;
        let npages = (vtop - vbase.0) / PAGE_SIZE;
        if npages == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let region = Region {
            vbase,
            npages,
            perm,
            frames: None,
        };
        match self.regions.iter_mut().find(|r| r.is_none()) {
            Some(slot) => {
                debug!(
                    "define region {:?}..{:?} {:?}",
                    region.vbase,
                    region.vtop(),
                    perm
                );
                *slot = Some(region);
                Ok(())
            }
            None => {
                warn!("too many regions in one address space");
                Err(KernelError::TooManyRegions)
            }
        }
    }
    pub fn region(&self, index: usize) -> Option<&Region> {
        self.regions.get(index).and_then(|r| r.as_ref())
    }
    pub fn is_prepared(&self) -> bool {
        self.stack.is_some()
    }
    pub fn load_complete(&self) -> bool {
        self.load_complete
    }
    // 给各区域和栈分配页帧并清零，全部成功才装进来
    pub fn prepare_load(&mut self) -> KernelResult<()> {
        assert!(!self.is_prepared(), "prepare_load called twice");
        let frames = &self.mm.frames;
        let mut regions = [None, None];
        for (slot, region) in regions.iter_mut().zip(self.regions.iter()) {
            if let Some(region) = region {
                let tracker = frame_alloc(frames, region.npages)?;
                tracker.zero();
                *slot = Some(tracker);
            }
        }
        let stack = frame_alloc(frames, STACK_PAGES)?;
        stack.zero();
        for (region, tracker) in self.regions.iter_mut().zip(regions) {
            if let Some(region) = region {
                region.frames = tracker;
            }
        }
        self.stack = Some(stack);
        Ok(())
    }
    // 装载完成，之后代码段只读
    pub fn complete_load(&mut self) {
        self.load_complete = true;
    }
    // 返回初始栈顶
    pub fn define_stack(&self) -> VirtAddr {
        assert!(self.is_prepared(), "define_stack before prepare_load");
        VirtAddr(USER_STACK)
    }
    // 复制一个完全相同的地址空间，失败时半成品随drop释放
    pub fn copy(&self) -> KernelResult<AddressSpace> {
        let mut new = AddressSpace {
            mm: Arc::clone(&self.mm),
            regions: [
                self.regions[0].as_ref().map(Region::describe),
                self.regions[1].as_ref().map(Region::describe),
            ],
            stack: None,
            load_complete: self.load_complete,
        };
        new.prepare_load()?;
        for (dst, src) in new.regions.iter().zip(self.regions.iter()) {
            if let (Some(Some(dst)), Some(Some(src))) = (
                dst.as_ref().map(|r| r.frames.as_ref()),
                src.as_ref().map(|r| r.frames.as_ref()),
            ) {
                dst.copy_from(src);
            }
        }
        if let (Some(dst), Some(src)) = (new.stack.as_ref(), self.stack.as_ref()) {
            dst.copy_from(src);
        }
        Ok(new)
    }
    // 切换到此地址空间，表项不带空间标识，只能全部作废
    pub fn activate(&self) {
        let _spl = SplGuard::raise(self.mm.cpu.as_ref());
        self.mm.tlb.invalidate_all();
    }
    pub fn deactivate(&self) {}
    // 销毁地址空间，所有页帧还给分配器
    pub fn destroy(self) {
        debug!(
            "destroy address space, {} frames released",
            self.frame_count()
        );
    }
    // 占用的页帧数
    pub fn frame_count(&self) -> usize {
        self.regions
            .iter()
            .flatten()
            .filter_map(|r| r.frames.as_ref())
            .chain(self.stack.iter())
            .map(|f| f.npages())
            .sum()
    }
    // 判断地址属于哪个段并给出物理地址，还没分配页帧的区域不算
    pub fn classify(&self, va: VirtAddr) -> Option<(Segment, PhysAddr)> {
        for (index, region) in self.regions.iter().enumerate() {
            let region = match region {
                Some(region) if region.contains(va) => region,
                _ => continue,
            };
            if let Some(pbase) = region.pbase() {
                let segment = if index == 0 {
                    Segment::Text
                } else {
                    Segment::Data
                };
                return Some((segment, pbase.offset(va.0 - region.vbase.0)));
            }
        }
        let stack = self.stack.as_ref()?;
        let base = stack_base();
        if va >= base && va.0 < USER_STACK {
            return Some((Segment::Stack, stack.base().offset(va.0 - base.0)));
        }
        None
    }
    pub fn translate(&self, va: VirtAddr) -> Option<PhysAddr> {
        self.classify(va).map(|(_, pa)| pa)
    }
    // 该段当前能否写
    pub fn is_writable(&self, segment: Segment) -> bool {
        !(segment == Segment::Text && self.load_complete)
    }
}
