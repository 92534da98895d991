// 物理内存本体，内核经直接映射可以访问任意物理地址

use super::PhysAddr;
use alloc::boxed::Box;
use alloc::vec;

pub struct PhysMemory {
    bytes: spin::Mutex<Box<[u8]>>,
    size: usize,
}

impl PhysMemory {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: spin::Mutex::new(vec![0u8; size].into_boxed_slice()),
            size,
        }
    }
    // 总字节数
    pub fn size(&self) -> usize {
        self.size
    }
    fn check(&self, pa: PhysAddr, len: usize) {
        assert!(
            pa.0.checked_add(len).map_or(false, |end| end <= self.size),
            "physical access {:?}+{:#x} out of range",
            pa,
            len
        );
    }
    // 读出一段
    pub fn read(&self, pa: PhysAddr, buf: &mut [u8]) {
        self.check(pa, buf.len());
        buf.copy_from_slice(&self.bytes.lock()[pa.0..pa.0 + buf.len()]);
    }
    // 写入一段
    pub fn write(&self, pa: PhysAddr, data: &[u8]) {
        self.check(pa, data.len());
        self.bytes.lock()[pa.0..pa.0 + data.len()].copy_from_slice(data);
    }
    // 清零
    pub fn zero(&self, pa: PhysAddr, len: usize) {
        self.check(pa, len);
        self.bytes.lock()[pa.0..pa.0 + len].fill(0);
    }
    // 物理内存内部搬运
    pub fn copy(&self, dst: PhysAddr, src: PhysAddr, len: usize) {
        self.check(dst, len);
        self.check(src, len);
        self.bytes.lock().copy_within(src.0..src.0 + len, dst.0);
    }
}
