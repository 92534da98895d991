// 实现物理页帧分配器

use super::{pages_for, round_up, PhysAddr, PhysMemory, PhysPageNum};
use crate::config::{PAGE_FRAME, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::{self, Debug, Formatter};
use core::mem::size_of;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
// 一个页帧的状态，连续分配的一段只在首帧记长度
pub enum FrameState {
    Free,
    Used(usize),
    Continuation,
}

// 页帧表（core map）
struct CoreMap {
    // 启动前偷内存用的指针，只增不减
    first_free: usize,
    last: usize,
    bootstrapped: bool,
    // 被管理的第一帧
    base: PhysPageNum,
    frames: Vec<FrameState>,
}

impl CoreMap {
    // 启动前的线性分配，分出去的不回收
    fn steal(&mut self, npages: usize) -> Option<PhysAddr> {
        let end = npages
            .checked_mul(PAGE_SIZE)
            .and_then(|size| self.first_free.checked_add(size))
            .filter(|end| *end <= self.last)?;
        let pa = PhysAddr(self.first_free);
        self.first_free = end;
        Some(pa)
    }
    // 首次适应，找n个连续的空闲帧
    fn first_fit(&mut self, npages: usize) -> Option<usize> {
        let mut run = 0;
        for i in 0..self.frames.len() {
            if self.frames[i] != FrameState::Free {
                run = 0;
                continue;
            }
            run += 1;
            if run == npages {
                let start = i + 1 - npages;
                self.frames[start] = FrameState::Used(npages);
                for frame in &mut self.frames[start + 1..=i] {
                    *frame = FrameState::Continuation;
                }
                return Some(start);
            }
        }
        None
    }
    fn index_of(&self, pa: PhysAddr) -> Option<usize> {
        let ppn = pa.floor();
        if ppn < self.base || ppn.0 - self.base.0 >= self.frames.len() {
            return None;
        }
        Some(ppn.0 - self.base.0)
    }
}

// 页帧分配器，拥有整块物理内存
pub struct FrameAllocator {
    ram: PhysMemory,
    core_map: spin::Mutex<CoreMap>,
}

impl FrameAllocator {
    // 低端kernel_reserved字节是内核镜像，之后到内存顶都是可用的
    pub fn new(memory_size: usize, kernel_reserved: usize) -> Self {
        let first_free = round_up(kernel_reserved, PAGE_SIZE);
        let last = memory_size & PAGE_FRAME;
        assert!(first_free < last, "no physical memory left after the kernel");
        Self {
            ram: PhysMemory::new(memory_size),
            core_map: spin::Mutex::new(CoreMap {
                first_free,
                last,
                bootstrapped: false,
                base: PhysPageNum(0),
                frames: Vec::new(),
            }),
        }
    }
    pub fn ram(&self) -> &PhysMemory {
        &self.ram
    }
    // 启动前分配内存，只能在bootstrap之前用
    pub fn steal_mem(&self, npages: usize) -> Option<PhysAddr> {
        let mut core_map = self.core_map.lock();
        assert!(!core_map.bootstrapped, "steal_mem after vm bootstrap");
        core_map.steal(npages)
    }
    // 接管剩下的物理内存，页帧表本身放在这段内存的开头
    pub fn bootstrap(&self) {
        let mut core_map = self.core_map.lock();
        assert!(!core_map.bootstrapped, "frame allocator bootstrapped twice");
        let total = (core_map.last - core_map.first_free) / PAGE_SIZE;
        let meta_pages = pages_for(total * size_of::<FrameState>());
        assert!(meta_pages < total, "no room for the core map");
        core_map.base = PhysAddr(core_map.first_free).floor();
        core_map.base.0 += meta_pages;
        core_map.frames = vec![FrameState::Free; total - meta_pages];
        core_map.bootstrapped = true;
        info!(
            "core map: {} frames managed from {:?}, {} frames for metadata",
            total - meta_pages,
            PhysAddr::from(core_map.base),
            meta_pages
        );
    }
    pub fn is_bootstrapped(&self) -> bool {
        self.core_map.lock().bootstrapped
    }
    // 分配npages个连续页帧，返回首帧物理地址
    pub fn alloc(&self, npages: usize) -> KernelResult<PhysAddr> {
        if npages == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let mut core_map = self.core_map.lock();
        if !core_map.bootstrapped {
            return core_map.steal(npages).ok_or(KernelError::OutOfMemory);
        }
        match core_map.first_fit(npages) {
            Some(index) => {
                let pa = PhysAddr::from(PhysPageNum(core_map.base.0 + index));
                trace!("alloc {} frames at {:?}", npages, pa);
                Ok(pa)
            }
            None => {
                debug!("no run of {} free frames", npages);
                Err(KernelError::OutOfMemory)
            }
        }
    }
    // 回收一整段，必须是某次分配的首帧
    pub fn dealloc(&self, pa: PhysAddr) {
        let mut core_map = self.core_map.lock();
        assert!(core_map.bootstrapped, "dealloc {:?} before vm bootstrap", pa);
        let index = match core_map.index_of(pa) {
            Some(index) if pa.aligned() => index,
            _ => panic!("Frame {:?} is not managed by the core map", pa),
        };
        match core_map.frames[index] {
            FrameState::Used(npages) => {
                for frame in &mut core_map.frames[index..index + npages] {
                    *frame = FrameState::Free;
                }
                trace!("free {} frames at {:?}", npages, pa);
            }
            state => panic!("Frame {:?} is not the start of a run ({:?})", pa, state),
        }
    }
    // 某个页帧的状态，不归管的返回None
    pub fn frame_state(&self, pa: PhysAddr) -> Option<FrameState> {
        let core_map = self.core_map.lock();
        core_map.index_of(pa).map(|index| core_map.frames[index])
    }
    // 被管理的第一帧
    pub fn managed_base(&self) -> PhysAddr {
        self.core_map.lock().base.into()
    }
    pub fn total_frames(&self) -> usize {
        self.core_map.lock().frames.len()
    }
    pub fn free_frames(&self) -> usize {
        self.core_map
            .lock()
            .frames
            .iter()
            .filter(|f| **f == FrameState::Free)
            .count()
    }
    pub fn used_frames(&self) -> usize {
        self.total_frames() - self.free_frames()
    }
}

// 一段连续页帧的资源抽象，drop时自动回收
pub struct FrameTracker {
    base: PhysAddr,
    npages: usize,
    allocator: Arc<FrameAllocator>,
}

impl FrameTracker {
    pub fn base(&self) -> PhysAddr {
        self.base
    }
    pub fn npages(&self) -> usize {
        self.npages
    }
    pub fn len(&self) -> usize {
        self.npages * PAGE_SIZE
    }
    // 整段清零
    pub fn zero(&self) {
        self.allocator.ram().zero(self.base, self.len());
    }
    // 从另一段拷贝内容，两段长度要一致
    pub fn copy_from(&self, other: &FrameTracker) {
        assert_eq!(self.npages, other.npages);
        self.allocator.ram().copy(self.base, other.base, self.len());
    }
}

impl Debug for FrameTracker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "FrameTracker:PA={:#x},pages={}",
            self.base.0, self.npages
        ))
    }
}

impl Drop for FrameTracker {
    fn drop(&mut self) {
        self.allocator.dealloc(self.base);
    }
}

// 接口，分配一段页帧并包装成资源
pub fn frame_alloc(allocator: &Arc<FrameAllocator>, npages: usize) -> KernelResult<FrameTracker> {
    assert!(allocator.is_bootstrapped(), "frame_alloc before vm bootstrap");
    let base = allocator.alloc(npages)?;
    Ok(FrameTracker {
        base,
        npages,
        allocator: Arc::clone(allocator),
    })
}
