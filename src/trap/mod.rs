// 陷入处理：系统调用、TLB缺失和非法指令

mod context;

pub use context::TrapContext;

use crate::error::{KernelError, KernelResult};
use crate::mm::{tlb_fill, FaultKind, VirtAddr};
use crate::mm::{VM_FAULT_READ, VM_FAULT_READONLY, VM_FAULT_WRITE};
use crate::syscall::syscall;
use crate::task::{current_process, exit_current_and_run_next, WaitStatus, SIGILL};
use core::convert::TryFrom;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
// 陷入原因，缺失类的带出错的虚拟地址
pub enum Trap {
    UserEnvCall,
    // 读或取指时TLB里没有
    TlbLoad(usize),
    // 写时TLB里没有
    TlbStore(usize),
    // 写了不可写的表项
    TlbModify(usize),
    IllegalInstruction,
}

// 分发处理一次陷入，处理完后按cx回到用户态
pub fn trap_handler(trap: Trap, cx: &mut TrapContext) {
    match trap {
        // 系统调用
        Trap::UserEnvCall => {
            // 让中断位置指针向前步进1个指令，表示这个调用已经受理了
            cx.sepc += 4;
            let result = syscall(cx.x[17], [cx.x[10], cx.x[11], cx.x[12]], cx);
            cx.x[10] = result as usize;
        }
        Trap::TlbLoad(addr) => handle_fault(VM_FAULT_READ, addr, cx),
        Trap::TlbStore(addr) => handle_fault(VM_FAULT_WRITE, addr, cx),
        Trap::TlbModify(addr) => handle_fault(VM_FAULT_READONLY, addr, cx),
        // 无效指令
        Trap::IllegalInstruction => {
            info!("[kernel] IllegalInstruction in application, core dumped.");
            exit_current_and_run_next(WaitStatus::Signaled(SIGILL));
        }
    }
}

// 缺页失败的话只杀掉当前进程，内核自己的问题直接panic
fn handle_fault(fault_type: usize, addr: usize, cx: &TrapContext) {
    let err = match vm_fault(fault_type, VirtAddr(addr)) {
        Ok(()) => return,
        Err(err) => err,
    };
    match WaitStatus::for_fault(err) {
        Some(status) => {
            info!(
                "[kernel] {} in application, bad addr = {:#x}, bad instruction = {:#x}, core dumped.",
                err, addr, cx.sepc,
            );
            exit_current_and_run_next(status);
        }
        None => panic!("vm_fault at {:#x} failed: {}", addr, err),
    }
}

// 缺页处理入口：检查类型和当前进程，再交给tlb_fill
pub fn vm_fault(fault_type: usize, addr: VirtAddr) -> KernelResult<()> {
    let kind = FaultKind::try_from(fault_type)?;
    if kind == FaultKind::ReadOnly {
        // 页面默认都是读写映射，只可能是写了代码段
        return Err(KernelError::ProtectionFault);
    }
    // 没有进程或地址空间说明是启动早期的缺页
    let process = current_process().ok_or(KernelError::BadAddress)?;
    let space = process.space().ok_or(KernelError::BadAddress)?;
    tlb_fill(&process.kernel().mm, &space, addr)
}
