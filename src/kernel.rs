// 内核对象：原先散落在全局的状态都放在这里，显式创建和关闭

use crate::arch::Machine;
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::loader::{FileSystem, Loader};
use crate::mm::MemoryManager;
use crate::task::{enter_new_process, PidAllocator, Process, ProcessTable, Scheduler, UserMode};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

// 内核依赖的外部服务
pub struct Services {
    pub fs: Arc<dyn FileSystem>,
    pub loader: Arc<dyn Loader>,
    pub scheduler: Arc<dyn Scheduler>,
    pub usermode: Arc<dyn UserMode>,
}

pub struct Kernel {
    pub mm: Arc<MemoryManager>,
    pub pids: Arc<PidAllocator>,
    pub procs: ProcessTable,
    pub fs: Arc<dyn FileSystem>,
    pub loader: Arc<dyn Loader>,
    pub scheduler: Arc<dyn Scheduler>,
    pub usermode: Arc<dyn UserMode>,
}

impl Kernel {
    // 初始化内存管理和进程管理，多核机器不支持
    pub fn new(config: &KernelConfig, machine: Machine, services: Services) -> KernelResult<Arc<Self>> {
        let mm = MemoryManager::bootstrap(config, machine)?;
        info!(
            "kernel up: {} KiB memory, {} free frames, pid max {}",
            config.memory_size / 1024,
            mm.frames.free_frames(),
            config.pid_max
        );
        Ok(Arc::new(Self {
            mm,
            pids: Arc::new(PidAllocator::new(config.pid_max)),
            procs: ProcessTable::new(),
            fs: services.fs,
            loader: services.loader,
            scheduler: services.scheduler,
            usermode: services.usermode,
        }))
    }

    // 新建一个没有父进程、也没有地址空间的进程
    pub fn create_process(self: &Arc<Self>, name: &str) -> KernelResult<Arc<Process>> {
        let pid = self.pids.alloc().ok_or(KernelError::ResourceExhausted)?;
        let process = Arc::new(Process::new(pid, name, Arc::clone(self), None, None));
        self.procs.insert(Arc::clone(&process));
        Ok(process)
    }

    // 装载并启动一个程序，作为没有父进程的进程运行
    pub fn spawn_program(self: &Arc<Self>, path: &str, args: &[String]) -> KernelResult<Arc<Process>> {
        let process = self.create_process(path)?;
        let pid = process.getpid();
        let started = process.exec(path, args).and_then(|entry| {
            self.scheduler.thread_fork(
                path,
                Arc::clone(&process),
                enter_new_process,
                Box::new(entry.trap_context()),
            )
        });
        if let Err(err) = started {
            warn!("spawn {} failed: {}", path, err);
            if let Some(process) = self.procs.remove(pid) {
                process.replace_space(None);
            }
            return Err(err);
        }
        info!("spawned {} as pid {}", path, pid);
        Ok(process)
    }

    // 关闭内核：清空进程表，报告没还回来的页帧，返回占用的页帧数
    pub fn shutdown(&self) -> usize {
        let procs = self.procs.drain();
        for process in procs.iter() {
            process.replace_space(None);
        }
        drop(procs);
        let used = self.mm.frames.used_frames();
        if used > 0 {
            warn!("shutdown: {} frames still in use", used);
        } else {
            info!("shutdown: all frames returned");
        }
        used
    }
}
