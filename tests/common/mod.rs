// 集成测试用的宿主机器：每个进程一个宿主线程，用户程序是按入口地址登记的闭包
#![allow(dead_code)]

use os::arch::{Machine, SoftCpu, SoftTlb};
use os::config::{KernelConfig, PAGE_SIZE};
use os::loader::{AppFs, ElfLoader};
use os::mm::{PhysAddr, VirtAddr};
use os::task::{ForkEntry, Process, Scheduler, UserMode};
use os::trap::{trap_handler, Trap, TrapContext};
use os::{Kernel, KernelError, KernelResult, Services};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

pub const SYSCALL_EXIT: usize = 93;
pub const SYSCALL_GETPID: usize = 172;
pub const SYSCALL_FORK: usize = 220;
pub const SYSCALL_EXEC: usize = 221;
pub const SYSCALL_WAITPID: usize = 260;

// 每个测试程序的代码段放在自己的入口处，数据段都在DATA
pub const INIT_ENTRY: usize = 0x40_0000;
pub const PROG_ENTRY: usize = 0x48_0000;
pub const DATA: usize = 0x1000_0000;
pub const DATA_SIZE: usize = 2 * PAGE_SIZE;
pub const DATA_INIT: &[u8] = b"initial data";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// thread_exit用这个负载展开线程，不算测试失败
struct ThreadExit;

fn describe(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic")
    }
}

// 每个内核线程就是一个宿主线程
#[derive(Default)]
pub struct ThreadScheduler {
    handles: Mutex<Vec<JoinHandle<()>>>,
    failures: Arc<Mutex<Vec<String>>>,
}

impl Scheduler for ThreadScheduler {
    fn thread_fork(
        &self,
        name: &str,
        process: Arc<Process>,
        entry: ForkEntry,
        cx: Box<TrapContext>,
    ) -> KernelResult<()> {
        let failures = Arc::clone(&self.failures);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(move || {
                    entry(process, cx);
                }));
                if let Err(payload) = result {
                    if !payload.is::<ThreadExit>() {
                        lock(&failures).push(describe(payload.as_ref()));
                    }
                }
            })
            .map_err(|_| KernelError::OutOfMemory)?;
        lock(&self.handles).push(handle);
        Ok(())
    }

    fn thread_exit(&self) -> ! {
        panic::resume_unwind(Box::new(ThreadExit))
    }
}

pub type Program = Arc<dyn Fn(&mut User) + Send + Sync>;

// 回到用户态就是按sepc找到登记的程序来跑，跑完了按exit(0)处理
pub struct ScriptedUserMode {
    programs: Mutex<BTreeMap<usize, Program>>,
    tlb: Arc<SoftTlb>,
    // 所有用户态访存排成一队，每次访存前切换到自己的地址空间
    cpu: Arc<Mutex<()>>,
}

impl UserMode for ScriptedUserMode {
    fn enter(&self, process: &Arc<Process>, cx: TrapContext) -> ! {
        let program = lock(&self.programs).get(&cx.sepc).cloned();
        let program = match program {
            Some(program) => program,
            None => panic!("no program at {:#x}", cx.sepc),
        };
        let mut user = User {
            process: Arc::clone(process),
            cx,
            tlb: Arc::clone(&self.tlb),
            cpu: Arc::clone(&self.cpu),
        };
        program(&mut user);
        user.exit(0)
    }
}

// 用户程序看到的"机器"：寄存器、系统调用和经过TLB的访存
pub struct User {
    pub process: Arc<Process>,
    pub cx: TrapContext,
    tlb: Arc<SoftTlb>,
    cpu: Arc<Mutex<()>>,
}

impl User {
    pub fn syscall(&mut self, id: usize, args: [usize; 3]) -> isize {
        self.cx.x[17] = id;
        self.cx.x[10] = args[0];
        self.cx.x[11] = args[1];
        self.cx.x[12] = args[2];
        trap_handler(Trap::UserEnvCall, &mut self.cx);
        self.cx.x[10] as isize
    }
    pub fn getpid(&mut self) -> isize {
        self.syscall(SYSCALL_GETPID, [0; 3])
    }
    // 子进程从child_entry开始跑，fork的陷入会先把sepc往后推4
    pub fn fork(&mut self, child_entry: usize) -> isize {
        self.cx.sepc = child_entry - 4;
        self.syscall(SYSCALL_FORK, [0; 3])
    }
    pub fn waitpid(&mut self, pid: isize, status_ptr: usize, options: usize) -> isize {
        self.syscall(SYSCALL_WAITPID, [pid as usize, status_ptr, options])
    }
    pub fn execv(&mut self, path_ptr: usize, argv_ptr: usize) -> isize {
        self.syscall(SYSCALL_EXEC, [path_ptr, argv_ptr, 0])
    }
    pub fn exit(&mut self, code: i32) -> ! {
        self.syscall(SYSCALL_EXIT, [code as usize, 0, 0]);
        unreachable!("exit returned")
    }
    pub fn illegal_instruction(&mut self) -> ! {
        trap_handler(Trap::IllegalInstruction, &mut self.cx);
        unreachable!("illegal instruction returned")
    }
    pub fn argc(&self) -> usize {
        self.cx.x[10]
    }
    pub fn argv(&self) -> usize {
        self.cx.x[11]
    }
    pub fn sp(&self) -> usize {
        self.cx.sp()
    }

    // 模拟硬件查TLB，缺失或写了干净表项时陷入内核；进程被杀的话不会返回
    fn translate(&mut self, va: usize, write: bool) -> PhysAddr {
        let cpu = Arc::clone(&self.cpu);
        let _cpu = lock(&cpu);
        if let Some(space) = self.process.space() {
            space.activate();
        }
        loop {
            match self.tlb.lookup(VirtAddr(va)) {
                Some(entry) if write && !entry.is_dirty() => {
                    trap_handler(Trap::TlbModify(va), &mut self.cx)
                }
                Some(entry) => return entry.frame().offset(va % PAGE_SIZE),
                None if write => trap_handler(Trap::TlbStore(va), &mut self.cx),
                None => trap_handler(Trap::TlbLoad(va), &mut self.cx),
            }
        }
    }

    fn ram_access(&mut self, va: usize, len: usize, write: bool, mut f: impl FnMut(PhysAddr, std::ops::Range<usize>)) {
        let mut done = 0;
        while done < len {
            let addr = va + done;
            let chunk = (PAGE_SIZE - addr % PAGE_SIZE).min(len - done);
            let pa = self.translate(addr, write);
            f(pa, done..done + chunk);
            done += chunk;
        }
    }

    pub fn store(&mut self, va: usize, data: &[u8]) {
        let kernel = Arc::clone(self.process.kernel());
        self.ram_access(va, data.len(), true, |pa, range| {
            kernel.mm.frames.ram().write(pa, &data[range]);
        });
    }
    pub fn load(&mut self, va: usize, len: usize) -> Vec<u8> {
        let kernel = Arc::clone(self.process.kernel());
        let mut buf = vec![0u8; len];
        self.ram_access(va, len, false, |pa, range| {
            kernel.mm.frames.ram().read(pa, &mut buf[range]);
        });
        buf
    }
    pub fn store_word(&mut self, va: usize, word: usize) {
        self.store(va, &word.to_ne_bytes());
    }
    pub fn load_word(&mut self, va: usize) -> usize {
        let bytes = self.load(va, std::mem::size_of::<usize>());
        let mut word = [0u8; std::mem::size_of::<usize>()];
        word.copy_from_slice(&bytes);
        usize::from_ne_bytes(word)
    }
    pub fn load_i32(&mut self, va: usize) -> i32 {
        let bytes = self.load(va, 4);
        i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
    // 读一个以0结尾的字符串
    pub fn load_str(&mut self, mut va: usize) -> String {
        let mut bytes = Vec::new();
        loop {
            let byte = self.load(va, 1)[0];
            if byte == 0 {
                break;
            }
            bytes.push(byte);
            va += 1;
        }
        String::from_utf8(bytes).unwrap()
    }
    // 在va处摆一个以0结尾的字符串，返回下一个可用地址
    pub fn store_str(&mut self, va: usize, s: &str) -> usize {
        self.store(va, s.as_bytes());
        self.store(va + s.len(), &[0]);
        va + s.len() + 1
    }
}

// 手工拼一个小端ELF64，segs是(虚拟地址, 内容, 内存大小, 标志)
pub fn elf_image(entry: u64, segs: &[(u64, &[u8], u64, u32)]) -> Vec<u8> {
    let phoff = 64u64;
    let mut data_off = phoff + 56 * segs.len() as u64;
    let mut image = Vec::new();
    image.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    image.extend_from_slice(&[0; 8]);
    image.extend_from_slice(&2u16.to_le_bytes());
    image.extend_from_slice(&0xf3u16.to_le_bytes());
    image.extend_from_slice(&1u32.to_le_bytes());
    image.extend_from_slice(&entry.to_le_bytes());
    image.extend_from_slice(&phoff.to_le_bytes());
    image.extend_from_slice(&0u64.to_le_bytes());
    image.extend_from_slice(&0u32.to_le_bytes());
    image.extend_from_slice(&64u16.to_le_bytes());
    image.extend_from_slice(&56u16.to_le_bytes());
    image.extend_from_slice(&(segs.len() as u16).to_le_bytes());
    image.extend_from_slice(&64u16.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes());
    for (vaddr, bytes, mem_size, flags) in segs {
        image.extend_from_slice(&1u32.to_le_bytes());
        image.extend_from_slice(&flags.to_le_bytes());
        image.extend_from_slice(&data_off.to_le_bytes());
        image.extend_from_slice(&vaddr.to_le_bytes());
        image.extend_from_slice(&vaddr.to_le_bytes());
        image.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        image.extend_from_slice(&mem_size.to_le_bytes());
        image.extend_from_slice(&0x1000u64.to_le_bytes());
        data_off += bytes.len() as u64;
    }
    for (_, bytes, _, _) in segs {
        image.extend_from_slice(bytes);
    }
    image
}

// 一页代码段（r-x）加两页数据段（rw-）
pub fn program_image(entry: usize) -> Vec<u8> {
    elf_image(
        entry as u64,
        &[
            (entry as u64, &b"\x13\x00\x00\x00"[..], PAGE_SIZE as u64, 5),
            (DATA as u64, DATA_INIT, DATA_SIZE as u64, 6),
        ],
    )
}

pub struct TestMachine {
    pub kernel: Arc<Kernel>,
    pub tlb: Arc<SoftTlb>,
    pub fs: Arc<AppFs>,
    pub scheduler: Arc<ThreadScheduler>,
    pub usermode: Arc<ScriptedUserMode>,
}

impl TestMachine {
    pub fn new() -> Self {
        Self::with_config(KernelConfig {
            memory_size: 0x20_0000,
            pid_max: 64,
            ..KernelConfig::default()
        })
    }

    pub fn with_config(config: KernelConfig) -> Self {
        os::logging::init();
        let tlb = Arc::new(SoftTlb::new(8));
        let fs = Arc::new(AppFs::new());
        let scheduler = Arc::new(ThreadScheduler::default());
        let usermode = Arc::new(ScriptedUserMode {
            programs: Mutex::new(BTreeMap::new()),
            tlb: Arc::clone(&tlb),
            cpu: Arc::new(Mutex::new(())),
        });
        let machine = Machine::new(tlb.clone(), Arc::new(SoftCpu::new()));
        let kernel = Kernel::new(
            &config,
            machine,
            Services {
                fs: fs.clone(),
                loader: Arc::new(ElfLoader),
                scheduler: scheduler.clone(),
                usermode: usermode.clone(),
            },
        )
        .unwrap();
        Self {
            kernel,
            tlb,
            fs,
            scheduler,
            usermode,
        }
    }

    // 登记一段从pc开始的用户代码
    pub fn on(&self, pc: usize, program: impl Fn(&mut User) + Send + Sync + 'static) {
        lock(&self.usermode.programs).insert(pc, Arc::new(program));
    }

    // 往文件系统里放一个程序，入口处的代码就是program
    pub fn install(&self, path: &str, entry: usize, program: impl Fn(&mut User) + Send + Sync + 'static) {
        self.fs.add_app(path, program_image(entry));
        self.on(entry, program);
    }

    // 等所有进程线程结束，有用户程序断言失败就报出来
    pub fn join(&self) {
        loop {
            let handles: Vec<_> = lock(&self.scheduler.handles).drain(..).collect();
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                handle.join().unwrap();
            }
        }
        let failures = lock(&self.scheduler.failures);
        assert!(failures.is_empty(), "user programs failed: {:?}", *failures);
    }

    // 全部结束后不能有残留：进程表、pid和页帧都要还干净
    pub fn assert_clean(&self) {
        assert!(self.kernel.procs.is_empty(), "left over: {:?}", self.kernel.procs.pids());
        assert_eq!(self.kernel.pids.in_use(), 0);
        assert_eq!(self.kernel.mm.frames.used_frames(), 0);
        assert_eq!(self.kernel.shutdown(), 0);
    }
}
