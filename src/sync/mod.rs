// 同步原语

mod lock;

pub use lock::{Condvar, SleepGuard, SleepLock};
