//! CPU pinning and scheduling priority for worker threads.

use crate::error::{Error, Result};

/// Pin the calling thread to the CPUs set in `mask` (bit N = CPU N).
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(mask: u64) -> Result<()> {
    if mask == 0 {
        return Err(Error::ConfigInvalid("cpumask selects no CPUs".into()));
    }
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for cpu in 0..64 {
            if mask & (1u64 << cpu) != 0 {
                libc::CPU_SET(cpu, &mut set);
            }
        }
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_cpu_affinity(_mask: u64) -> Result<()> {
    log::warn!("cpumask unsupported on this platform");
    Ok(())
}

/// Adjust the calling thread's nice value.
pub fn set_nice(nice: i32) -> Result<()> {
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}
