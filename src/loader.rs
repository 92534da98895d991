// 程序的来源（文件系统）和装载（ELF解析）

use crate::error::{KernelError, KernelResult};
use crate::mm::{copyout, AddressSpace, MapPermission, VirtAddr};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

// 打开的文件
pub trait Vnode: Send + Sync {
    fn size(&self) -> usize;
    // 从offset开始读，返回读到的字节数
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> KernelResult<usize>;
}

// 文件系统，只需要能按路径打开文件
pub trait FileSystem: Send + Sync {
    fn open(&self, path: &str) -> KernelResult<Arc<dyn Vnode>>;
}

// 把一个可执行文件装进地址空间，返回入口地址
pub trait Loader: Send + Sync {
    fn load_elf(&self, file: &dyn Vnode, space: &mut AddressSpace) -> KernelResult<VirtAddr>;
}

// 内存里的一个应用镜像
pub struct AppFile {
    data: Vec<u8>,
}

impl Vnode for AppFile {
    fn size(&self) -> usize {
        self.data.len()
    }
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
        if offset >= self.data.len() {
            return Ok(0);
        }
        let len = buf.len().min(self.data.len() - offset);
        buf[..len].copy_from_slice(&self.data[offset..offset + len]);
        Ok(len)
    }
}

// 按名字存放应用镜像的文件系统
pub struct AppFs {
    apps: spin::Mutex<BTreeMap<String, Arc<AppFile>>>,
}

impl AppFs {
    pub fn new() -> Self {
        Self {
            apps: spin::Mutex::new(BTreeMap::new()),
        }
    }
    // 添加应用，同名的会被替换
    pub fn add_app(&self, name: &str, data: Vec<u8>) {
        self.apps
            .lock()
            .insert(String::from(name), Arc::new(AppFile { data }));
    }
    // 打印出所有应用的名字
    pub fn list_apps(&self) -> Vec<String> {
        let apps: Vec<String> = self.apps.lock().keys().cloned().collect();
        info!("/**** APPS ****");
        for app in apps.iter() {
            info!("{}", app);
        }
        info!("**************/");
        apps
    }
}

impl Default for AppFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for AppFs {
    fn open(&self, path: &str) -> KernelResult<Arc<dyn Vnode>> {
        let file = self
            .apps
            .lock()
            .get(path)
            .cloned()
            .ok_or(KernelError::NotFound)?;
        Ok(file)
    }
}

// 读出整个文件
fn read_all(file: &dyn Vnode) -> KernelResult<Vec<u8>> {
    let mut data = vec![0u8; file.size()];
    let mut done = 0;
    while done < data.len() {
        let n = file.read_at(done, &mut data[done..])?;
        if n == 0 {
            return Err(KernelError::NotExecutable);
        }
        done += n;
    }
    Ok(data)
}

// 用xmas-elf解析程序头，每个LOAD段定义一个区域
pub struct ElfLoader;

impl Loader for ElfLoader {
    fn load_elf(&self, file: &dyn Vnode, space: &mut AddressSpace) -> KernelResult<VirtAddr> {
        let data = read_all(file)?;
        // 解析elf
        let elf = xmas_elf::ElfFile::new(&data).map_err(|err| {
            debug!("bad elf image: {}", err);
            KernelError::NotExecutable
        })?;
        let magic = elf.header.pt1.magic;
        if magic != [0x7f, 0x45, 0x4c, 0x46] {
            return Err(KernelError::NotExecutable);
        }
        // 先定义区域，记下每段要拷贝的内容
        let mut segments = Vec::new();
        for i in 0..elf.header.pt2.ph_count() {
            let ph = elf
                .program_header(i)
                .map_err(|_| KernelError::NotExecutable)?;
            match ph.get_type() {
                Ok(xmas_elf::program::Type::Load) => {}
                _ => continue,
            }
            let offset = ph.offset() as usize;
            let file_size = ph.file_size() as usize;
            let mem_size = ph.mem_size() as usize;
            if file_size > mem_size || offset.checked_add(file_size).map_or(true, |end| end > data.len()) {
                return Err(KernelError::NotExecutable);
            }
            let mut perm = MapPermission::U;
            let ph_flags = ph.flags();
            if ph_flags.is_read() {
                perm |= MapPermission::R;
            }
            if ph_flags.is_write() {
                perm |= MapPermission::W;
            }
            if ph_flags.is_execute() {
                perm |= MapPermission::X;
            }
            let vaddr = VirtAddr(ph.virtual_addr() as usize);
            // 段越过地址空间顶端说明镜像是坏的
            space
                .define_region(vaddr, mem_size, perm)
                .map_err(|err| match err {
                    KernelError::InvalidArgument => KernelError::NotExecutable,
                    err => err,
                })?;
            segments.push((vaddr, offset, file_size));
        }
        if segments.is_empty() {
            return Err(KernelError::NotExecutable);
        }
        space.prepare_load()?;
        // 剩下的部分prepare_load已经清零
        for (vaddr, offset, file_size) in segments {
            copyout(space, vaddr, &data[offset..offset + file_size])?;
        }
        space.complete_load();
        Ok(VirtAddr(elf.header.pt2.entry_point() as usize))
    }
}
