// 软件管理的TLB，表项格式仿照MIPS的EntryHi/EntryLo

use crate::config::{PAGE_FRAME, PAGE_SIZE_BITS};
use crate::mm::{PhysAddr, VirtAddr};
use alloc::vec::Vec;
use bitflags::*;
use core::fmt::{self, Debug, Formatter};
use core::sync::atomic::{AtomicUsize, Ordering};

bitflags! {
    // EntryLo里的标志位，DIRTY置位才允许写
    pub struct TlbFlags: usize {
        const VALID = 1 << 9;
        const DIRTY = 1 << 10;
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
// 一个TLB表项，ehi是虚拟页标签，elo是物理页帧和标志位
pub struct TlbEntry {
    pub ehi: usize,
    pub elo: usize,
}

impl TlbEntry {
    // 新建一条有效映射
    pub fn new(vpage: VirtAddr, frame: PhysAddr, writable: bool) -> Self {
        let mut flags = TlbFlags::VALID;
        if writable {
            flags |= TlbFlags::DIRTY;
        }
        Self {
            ehi: vpage.0 & PAGE_FRAME,
            elo: (frame.0 & PAGE_FRAME) | flags.bits(),
        }
    }
    // 无效表项，每个槽位的标签落在内核段且互不相同，避免出现重复标签
    pub fn invalid(slot: usize) -> Self {
        Self {
            ehi: (0x80000 + slot) << PAGE_SIZE_BITS,
            elo: 0,
        }
    }
    pub fn vpage(&self) -> VirtAddr {
        VirtAddr(self.ehi & PAGE_FRAME)
    }
    pub fn frame(&self) -> PhysAddr {
        PhysAddr(self.elo & PAGE_FRAME)
    }
    pub fn flags(&self) -> TlbFlags {
        TlbFlags::from_bits_truncate(self.elo)
    }
    pub fn is_valid(&self) -> bool {
        self.flags().contains(TlbFlags::VALID)
    }
    pub fn is_dirty(&self) -> bool {
        self.flags().contains(TlbFlags::DIRTY)
    }
}

impl Debug for TlbEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "TLB:{:#x}->{:#x}{}{}",
            self.ehi,
            self.elo & PAGE_FRAME,
            if self.is_valid() { " V" } else { "" },
            if self.is_dirty() { " D" } else { "" },
        ))
    }
}

// 硬件TLB的操作原语，缺页处理只通过它碰硬件
pub trait Tlb: Send + Sync {
    // 槽位数
    fn num_slots(&self) -> usize;
    // 读一个槽位
    fn read(&self, slot: usize) -> TlbEntry;
    // 写一个槽位
    fn write(&self, slot: usize, entry: TlbEntry);
    // 由硬件挑一个槽位写入
    fn write_random(&self, entry: TlbEntry);
    // 全部作废，切换地址空间时用
    fn invalidate_all(&self) {
        for slot in 0..self.num_slots() {
            self.write(slot, TlbEntry::invalid(slot));
        }
    }
}

// 用内存模拟的TLB
pub struct SoftTlb {
    slots: spin::Mutex<Vec<TlbEntry>>,
    // 模拟MIPS的Random寄存器，每用一次就往下走一格，走到0再绕回顶部
    random: AtomicUsize,
}

impl SoftTlb {
    pub fn new(num_slots: usize) -> Self {
        assert!(num_slots > 0, "TLB must have at least one slot");
        Self {
            slots: spin::Mutex::new((0..num_slots).map(TlbEntry::invalid).collect()),
            random: AtomicUsize::new(num_slots - 1),
        }
    }
    // 模拟硬件查表：找标签匹配的有效表项
    pub fn lookup(&self, vaddr: VirtAddr) -> Option<TlbEntry> {
        let tag = vaddr.0 & PAGE_FRAME;
        self.slots
            .lock()
            .iter()
            .copied()
            .find(|e| e.is_valid() && e.ehi == tag)
    }
    // 有效表项个数
    pub fn valid_count(&self) -> usize {
        self.slots.lock().iter().filter(|e| e.is_valid()).count()
    }
    fn next_random(&self) -> usize {
        let n = self.num_slots();
        let prev = self
            .random
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |r| {
                Some(if r == 0 { n - 1 } else { r - 1 })
            });
        // 闭包总是返回Some
        match prev {
            Ok(r) | Err(r) => r,
        }
    }
}

impl Tlb for SoftTlb {
    fn num_slots(&self) -> usize {
        self.slots.lock().len()
    }
    fn read(&self, slot: usize) -> TlbEntry {
        self.slots.lock()[slot]
    }
    fn write(&self, slot: usize, entry: TlbEntry) {
        self.slots.lock()[slot] = entry;
    }
    fn write_random(&self, entry: TlbEntry) {
        let slot = self.next_random();
        self.write(slot, entry);
    }
}
