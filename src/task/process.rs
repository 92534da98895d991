// 进程控制块与fork/exec/exit/waitpid的实现

use super::pid::PidHandle;
use super::wait::WaitStatus;
use super::enter_forked_process;
use crate::config::USER_STACK_SIZE;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::mm::{copyout_word, copyoutstr, round_up, AddressSpace, VirtAddr};
use crate::sync::{Condvar, SleepGuard, SleepLock};
use crate::trap::TrapContext;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::mem::size_of;

// 父进程为每个子进程留的记录，子进程退出时填上状态，waitpid时取走
pub struct ChildRecord {
    pub pid: usize,
    pub child: Weak<Process>,
    pub status: Option<WaitStatus>,
}

// 进程控制块
pub struct Process {
    // 初始化后就不变的部分
    pid: PidHandle,
    name: String,
    kernel: Arc<Kernel>,
    // 地址空间指针，只在取快照或替换时短暂持锁
    space: spin::Mutex<Option<Arc<AddressSpace>>>,
    // 运行中发生变化的部分，父子关系和退出状态
    inner: SleepLock<ProcessInner>,
    // 本进程退出时通知父进程，只和父进程的锁配合使用
    exit_cv: Condvar,
}

pub struct ProcessInner {
    // 父进程，使用弱引用，父进程退出时清空
    pub parent: Option<Weak<Process>>,
    pub children: Vec<ChildRecord>,
    pub alive: bool,
}

// exec成功后回到用户态需要的东西
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExecEntry {
    pub argc: usize,
    pub argv: usize,
    pub sp: usize,
    pub entry: VirtAddr,
}

impl ExecEntry {
    // a0是argc，a1是argv
    pub fn trap_context(&self) -> TrapContext {
        let mut cx = TrapContext::app_init_context(self.entry.0, self.sp);
        cx.x[10] = self.argc;
        cx.x[11] = self.argv;
        cx
    }
}

// 释放一个地址空间，别处还拿着快照的话等快照放掉时再释放
fn release_space(space: Arc<AddressSpace>) {
    space.deactivate();
    if let Ok(space) = Arc::try_unwrap(space) {
        space.destroy();
    }
}

impl Process {
    pub(crate) fn new(
        pid: PidHandle,
        name: &str,
        kernel: Arc<Kernel>,
        space: Option<AddressSpace>,
        parent: Option<Weak<Process>>,
    ) -> Self {
        Self {
            pid,
            name: String::from(name),
            kernel,
            space: spin::Mutex::new(space.map(Arc::new)),
            inner: SleepLock::new(ProcessInner {
                parent,
                children: Vec::new(),
                alive: true,
            }),
            exit_cv: Condvar::new(),
        }
    }
    // 获取内部可变的引用
    pub fn inner_exclusive_access(&self) -> SleepGuard<'_, ProcessInner> {
        self.inner.lock()
    }
    // 获取pid值
    pub fn getpid(&self) -> usize {
        self.pid.pid()
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }
    // 地址空间的快照
    pub fn space(&self) -> Option<Arc<AddressSpace>> {
        self.space.lock().clone()
    }
    // 换上新的地址空间，返回旧的
    pub fn replace_space(&self, space: Option<Arc<AddressSpace>>) -> Option<Arc<AddressSpace>> {
        core::mem::replace(&mut *self.space.lock(), space)
    }
    pub fn is_alive(&self) -> bool {
        self.inner_exclusive_access().alive
    }
    pub fn parent(&self) -> Option<Arc<Process>> {
        self.inner_exclusive_access()
            .parent
            .as_ref()
            .and_then(|p| p.upgrade())
    }
    // 还没被回收的子进程
    pub fn children(&self) -> Vec<usize> {
        self.inner_exclusive_access()
            .children
            .iter()
            .map(|r| r.pid)
            .collect()
    }

    // 复刻进程，子进程从cx的副本开始运行，fork在子进程里返回0
    pub fn fork(self: &Arc<Self>, cx: &TrapContext) -> KernelResult<Arc<Process>> {
        let kernel = &self.kernel;
        // 先复制地址空间，这时还没拿任何进程的锁
        let space = self.space().ok_or(KernelError::BadAddress)?.copy()?;
        let pid = kernel.pids.alloc().ok_or(KernelError::ResourceExhausted)?;
        let child = Arc::new(Process::new(
            pid,
            &self.name,
            Arc::clone(kernel),
            Some(space),
            Some(Arc::downgrade(self)),
        ));
        let child_pid = child.getpid();
        // 子进程能跑起来之前就建立好父子关系
        self.inner_exclusive_access().children.push(ChildRecord {
            pid: child_pid,
            child: Arc::downgrade(&child),
            status: None,
        });
        kernel.procs.insert(Arc::clone(&child));
        if let Err(err) = kernel.scheduler.thread_fork(
            &self.name,
            Arc::clone(&child),
            enter_forked_process,
            Box::new(*cx),
        ) {
            warn!("fork: cannot start a thread for pid {}: {}", child_pid, err);
            self.inner_exclusive_access()
                .children
                .retain(|r| r.pid != child_pid);
            kernel.procs.remove(child_pid);
            return Err(err);
        }
        debug!("pid {} forked pid {}", self.getpid(), child_pid);
        Ok(child)
    }

    // 用path指定的程序替换当前内容，成功后旧地址空间已经销毁
    pub fn exec(self: &Arc<Self>, path: &str, args: &[String]) -> KernelResult<ExecEntry> {
        if path.is_empty() {
            return Err(KernelError::NotFound);
        }
        let kernel = &self.kernel;
        let file = kernel.fs.open(path)?;
        let mut space = AddressSpace::new(&kernel.mm);
        let entry = kernel.loader.load_elf(file.as_ref(), &mut space)?;
        let stack_top = space.define_stack();
        let (sp, argv) = push_args(&space, stack_top, args)?;
        // 到这里不会再失败，换上新的地址空间
        let space = Arc::new(space);
        let old = self.replace_space(Some(Arc::clone(&space)));
        space.activate();
        if let Some(old) = old {
            release_space(old);
        }
        info!(
            "pid {} exec {} argc={} entry={:?}",
            self.getpid(),
            path,
            args.len(),
            entry
        );
        Ok(ExecEntry {
            argc: args.len(),
            argv,
            sp,
            entry,
        })
    }

    // 进程退出：先释放地址空间，再托孤，最后把状态交给父进程
    pub fn exit(self: &Arc<Self>, status: WaitStatus) {
        let kernel = &self.kernel;
        let pid = self.getpid();
        if let Some(space) = self.replace_space(None) {
            release_space(space);
        }
        // 从进程表里拿出来的强引用在所有锁都放掉之后再释放
        let mut reaped = Vec::new();
        let parent = {
            let mut inner = self.inner_exclusive_access();
            inner.alive = false;
            for record in inner.children.drain(..) {
                if record.status.is_some() {
                    reaped.extend(kernel.procs.remove(record.pid));
                } else if let Some(child) = record.child.upgrade() {
                    child.inner_exclusive_access().parent = None;
                }
            }
            inner.parent.take().and_then(|p| p.upgrade())
        };
        let mut published = false;
        if let Some(parent) = parent {
            let mut parent_inner = parent.inner_exclusive_access();
            if let Some(record) = parent_inner.children.iter_mut().find(|r| r.pid == pid) {
                record.status = Some(status);
                published = true;
                // 持有父进程的锁时通知，父进程不会错过
                self.exit_cv.notify_all();
            }
        }
        if !published {
            // 没人等，直接回收
            reaped.extend(kernel.procs.remove(pid));
        }
        debug!("pid {} exited with {:?}", pid, status);
        drop(reaped);
    }

    // 等待pid指定的子进程退出，返回它的pid和退出状态
    pub fn waitpid(self: &Arc<Self>, pid: usize, options: usize) -> KernelResult<(usize, WaitStatus)> {
        if options != 0 {
            return Err(KernelError::InvalidArgument);
        }
        let mut inner = self.inner_exclusive_access();
        let child = inner
            .children
            .iter()
            .find(|r| r.pid == pid)
            .ok_or(KernelError::NoSuchChild)?
            .child
            .upgrade();
        let status = loop {
            let status = inner
                .children
                .iter()
                .find(|r| r.pid == pid)
                .ok_or(KernelError::NoSuchChild)?
                .status;
            if let Some(status) = status {
                break status;
            }
            // 子进程还没退出就一定还在进程表里
            let child = child.as_ref().ok_or(KernelError::NoSuchChild)?;
            inner = child.exit_cv.wait(inner);
        };
        inner.children.retain(|r| r.pid != pid);
        drop(inner);
        let reaped = self.kernel.procs.remove(pid);
        debug!("pid {} reaped pid {}: {:?}", self.getpid(), pid, status);
        drop(child);
        drop(reaped);
        Ok((pid, status))
    }
}

// 在新栈上摆好参数：先是各个字符串（补齐到4字节），再是以0结尾的指针数组
// 没有参数时什么都不放，返回(sp, argv)
fn push_args(space: &AddressSpace, stack_top: VirtAddr, args: &[String]) -> KernelResult<(usize, usize)> {
    let mut sp = stack_top.0;
    if args.is_empty() {
        return Ok((sp, sp));
    }
    let word = size_of::<usize>();
    let strings: usize = args.iter().map(|arg| round_up(arg.len() + 1, 4)).sum();
    if round_up(strings, word) + (args.len() + 1) * word > USER_STACK_SIZE {
        return Err(KernelError::ArgumentListTooLong);
    }
    let mut argv = Vec::with_capacity(args.len() + 1);
    for arg in args.iter().rev() {
        let size = round_up(arg.len() + 1, 4);
        sp -= size;
        copyoutstr(space, arg, VirtAddr(sp), size)?;
        argv.push(sp);
    }
    argv.reverse();
    argv.push(0);
    sp &= !(word - 1);
    for ptr in argv.iter().rev() {
        sp -= word;
        copyout_word(space, VirtAddr(sp), *ptr)?;
    }
    Ok((sp, sp))
}
