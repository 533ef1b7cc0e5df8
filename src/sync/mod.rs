pub use self::cpu_lock::{CpuLock, CpuLockGuard, CpuToken};

pub mod cpu_lock;
