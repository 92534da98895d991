// 用户地址空间与内核之间的数据搬运，按页查表后直接读写物理内存

use super::{AddressSpace, PhysAddr, VirtAddr};
use crate::config::PAGE_SIZE;
use crate::error::{KernelError, KernelResult};
use alloc::string::String;
use alloc::vec::Vec;
use core::mem::size_of;

// 把[start, start+len)切成不跨页的小段，逐段交给f
fn for_each_chunk(
    space: &AddressSpace,
    start: VirtAddr,
    len: usize,
    write: bool,
    mut f: impl FnMut(PhysAddr, usize, usize),
) -> KernelResult<()> {
    let end = start.0.checked_add(len).ok_or(KernelError::BadAddress)?;
    let mut va = start.0;
    let mut done = 0;
    while va < end {
        let chunk = (PAGE_SIZE - va % PAGE_SIZE).min(end - va);
        let (segment, pa) = space
            .classify(VirtAddr(va))
            .ok_or(KernelError::BadAddress)?;
        if write && !space.is_writable(segment) {
            return Err(KernelError::BadAddress);
        }
        f(pa, done, chunk);
        done += chunk;
        va += chunk;
    }
    Ok(())
}

// 从用户空间读len字节到buf
pub fn copyin(space: &AddressSpace, src: VirtAddr, buf: &mut [u8]) -> KernelResult<()> {
    let ram = space.memory_manager().frames.ram();
    let len = buf.len();
    for_each_chunk(space, src, len, false, |pa, done, chunk| {
        ram.read(pa, &mut buf[done..done + chunk]);
    })
}

// 把data写到用户空间
pub fn copyout(space: &AddressSpace, dst: VirtAddr, data: &[u8]) -> KernelResult<()> {
    let ram = space.memory_manager().frames.ram();
    for_each_chunk(space, dst, data.len(), true, |pa, done, chunk| {
        ram.write(pa, &data[done..done + chunk]);
    })
}

// 读一个以0结尾的字符串，max包括结尾的0
pub fn copyinstr(space: &AddressSpace, src: VirtAddr, max: usize) -> KernelResult<String> {
    let ram = space.memory_manager().frames.ram();
    let mut bytes = Vec::new();
    let mut va = src.0;
    while bytes.len() < max {
        let chunk = (PAGE_SIZE - va % PAGE_SIZE).min(max - bytes.len());
        let pa = space
            .translate(VirtAddr(va))
            .ok_or(KernelError::BadAddress)?;
        let mut buf = [0u8; PAGE_SIZE];
        ram.read(pa, &mut buf[..chunk]);
        if let Some(nul) = buf[..chunk].iter().position(|b| *b == 0) {
            bytes.extend_from_slice(&buf[..nul]);
            return String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument);
        }
        bytes.extend_from_slice(&buf[..chunk]);
        va = va.checked_add(chunk).ok_or(KernelError::BadAddress)?;
    }
    Err(KernelError::NameTooLong)
}

// 写一个以0结尾的字符串，返回写入的字节数（含0）
pub fn copyoutstr(space: &AddressSpace, s: &str, dst: VirtAddr, max: usize) -> KernelResult<usize> {
    let len = s.len() + 1;
    if len > max {
        return Err(KernelError::NameTooLong);
    }
    let mut bytes = Vec::with_capacity(len);
    bytes.extend_from_slice(s.as_bytes());
    bytes.push(0);
    copyout(space, dst, &bytes)?;
    Ok(len)
}

// 读一个用户指针大小的字
pub fn copyin_word(space: &AddressSpace, src: VirtAddr) -> KernelResult<usize> {
    let mut buf = [0u8; size_of::<usize>()];
    copyin(space, src, &mut buf)?;
    Ok(usize::from_ne_bytes(buf))
}

// 写一个用户指针大小的字
pub fn copyout_word(space: &AddressSpace, dst: VirtAddr, word: usize) -> KernelResult<()> {
    copyout(space, dst, &word.to_ne_bytes())
}
