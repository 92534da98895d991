// 可睡眠的互斥锁和条件变量，等待时线程让出处理器

use std::sync::{self, PoisonError};

// 互斥锁，持有者被杀掉也不会把锁永久弄坏
pub struct SleepLock<T> {
    inner: sync::Mutex<T>,
}

pub type SleepGuard<'a, T> = sync::MutexGuard<'a, T>;

impl<T> SleepLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: sync::Mutex::new(value),
        }
    }
    // 获取锁，可能睡眠
    pub fn lock(&self) -> SleepGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// 条件变量，只能配合保护对应状态的那把锁使用
pub struct Condvar {
    inner: sync::Condvar,
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            inner: sync::Condvar::new(),
        }
    }
    // 放锁睡眠，醒来时重新持有锁
    pub fn wait<'a, T>(&self, guard: SleepGuard<'a, T>) -> SleepGuard<'a, T> {
        self.inner.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
    pub fn notify_all(&self) {
        self.inner.notify_all();
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn waiter_sees_the_update() {
        let pair = Arc::new((SleepLock::new(false), Condvar::new()));
        let other = Arc::clone(&pair);
        let handle = thread::spawn(move || {
            let (lock, cv) = &*other;
            *lock.lock() = true;
            cv.notify_all();
        });
        let (lock, cv) = &*pair;
        let mut done = lock.lock();
        while !*done {
            done = cv.wait(done);
        }
        drop(done);
        handle.join().unwrap();
    }

    #[test]
    fn poisoned_lock_is_still_usable() {
        let lock = Arc::new(SleepLock::new(1));
        let other = Arc::clone(&lock);
        let _ = thread::spawn(move || {
            let _guard = other.lock();
            panic!("holder died");
        })
        .join();
        assert_eq!(*lock.lock(), 1);
    }
}
