//! Pinned IO buffer region.
//!
//! One contiguous allocation of `units × unit_size` bytes per worker, carved
//! into per-unit slices that engines address by raw pointer. The allocation
//! strategy (heap, SysV shm, anonymous mmap, each with an optional huge-page
//! variant) is chosen once and is invisible to the rest of the core.
//!
//! `unit_size` is the largest block size the job can produce, rounded up to
//! `mem_align` so every slice start satisfies O_DIRECT alignment.

use crate::config::workload::MemType;
use crate::error::{Error, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};

#[derive(Debug)]
enum Region {
    Heap { ptr: *mut u8, layout: Layout },
    Mmap { ptr: *mut u8, len: usize },
    Shm { ptr: *mut u8 },
}

/// The per-worker buffer region.
#[derive(Debug)]
pub struct IoBuffers {
    region: Region,
    unit_size: usize,
    count: usize,
}

// The region is owned memory addressed only through this handle.
unsafe impl Send for IoBuffers {}

fn round_up(v: usize, align: usize) -> usize {
    let align = align.max(1);
    v.div_ceil(align) * align
}

impl IoBuffers {
    /// Allocate `count` slices of `max_unit` bytes (rounded up to
    /// `mem_align`) with the given strategy.
    pub fn allocate(
        mem_type: MemType,
        count: usize,
        max_unit: usize,
        mem_align: usize,
        hugepage_size: usize,
    ) -> Result<Self> {
        let align = mem_align.max(std::mem::align_of::<u64>()).next_power_of_two();
        let unit_size = round_up(max_unit.max(1), align);
        let mut total = unit_size * count.max(1);

        let huge = matches!(mem_type, MemType::ShmHuge | MemType::MmapHuge);
        if huge && hugepage_size > 0 {
            total = round_up(total, hugepage_size);
        }

        let region = match mem_type {
            MemType::Heap => Self::alloc_heap(total, align)?,
            MemType::Mmap | MemType::MmapHuge => Self::alloc_mmap(total, huge)?,
            MemType::Shm | MemType::ShmHuge => Self::alloc_shm(total, huge)?,
        };

        Ok(Self {
            region,
            unit_size,
            count: count.max(1),
        })
    }

    fn alloc_heap(total: usize, align: usize) -> Result<Region> {
        let layout = Layout::from_size_align(total, align)
            .map_err(|_| Error::ResourceExhausted("buffer layout"))?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(Error::ResourceExhausted("buffer region"));
        }
        Ok(Region::Heap { ptr, layout })
    }

    #[cfg(target_os = "linux")]
    fn alloc_mmap(total: usize, huge: bool) -> Result<Region> {
        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        if huge {
            flags |= libc::MAP_HUGETLB;
        }
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::ResourceExhausted("anonymous mapping"));
        }
        Ok(Region::Mmap {
            ptr: ptr as *mut u8,
            len: total,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn alloc_mmap(total: usize, _huge: bool) -> Result<Region> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::ResourceExhausted("anonymous mapping"));
        }
        Ok(Region::Mmap {
            ptr: ptr as *mut u8,
            len: total,
        })
    }

    #[cfg(target_os = "linux")]
    fn alloc_shm(total: usize, huge: bool) -> Result<Region> {
        let mut flags = libc::IPC_CREAT | 0o600;
        if huge {
            flags |= libc::SHM_HUGETLB;
        }
        let id = unsafe { libc::shmget(libc::IPC_PRIVATE, total, flags) };
        if id < 0 {
            return Err(Error::ResourceExhausted("shm segment"));
        }
        let ptr = unsafe { libc::shmat(id, std::ptr::null(), 0) };
        // The segment dies on last detach regardless of how we exit.
        unsafe {
            libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut());
        }
        if ptr as isize == -1 {
            return Err(Error::ResourceExhausted("shm attach"));
        }
        Ok(Region::Shm { ptr: ptr as *mut u8 })
    }

    #[cfg(not(target_os = "linux"))]
    fn alloc_shm(total: usize, _huge: bool) -> Result<Region> {
        log::warn!("shm buffers unsupported on this platform, using mmap");
        Self::alloc_mmap(total, false)
    }

    fn base(&self) -> *mut u8 {
        match &self.region {
            Region::Heap { ptr, .. } => *ptr,
            Region::Mmap { ptr, .. } => *ptr,
            Region::Shm { ptr } => *ptr,
        }
    }

    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Raw pointer to a unit's slice, handed to engines.
    #[inline(always)]
    pub fn unit_ptr(&self, idx: usize) -> *mut u8 {
        assert!(idx < self.count, "buffer index out of range");
        unsafe { self.base().add(idx * self.unit_size) }
    }

    #[inline]
    pub fn unit(&self, idx: usize) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.unit_ptr(idx), self.unit_size) }
    }

    #[inline]
    pub fn unit_mut(&mut self, idx: usize) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.unit_ptr(idx), self.unit_size) }
    }
}

impl Drop for IoBuffers {
    fn drop(&mut self) {
        match &self.region {
            Region::Heap { ptr, layout } => unsafe {
                dealloc(*ptr, *layout);
            },
            Region::Mmap { ptr, len } => unsafe {
                libc::munmap(*ptr as *mut libc::c_void, *len);
            },
            Region::Shm { ptr } => unsafe {
                #[cfg(target_os = "linux")]
                libc::shmdt(*ptr as *const libc::c_void);
                #[cfg(not(target_os = "linux"))]
                let _ = ptr;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_allocation_aligned() {
        let bufs = IoBuffers::allocate(MemType::Heap, 8, 4000, 4096, 0).unwrap();
        assert_eq!(bufs.unit_size(), 4096);
        assert_eq!(bufs.count(), 8);
        for i in 0..8 {
            assert_eq!(bufs.unit_ptr(i) as usize % 4096, 0);
        }
    }

    #[test]
    fn test_units_disjoint() {
        let mut bufs = IoBuffers::allocate(MemType::Heap, 4, 1024, 512, 0).unwrap();
        for i in 0..4 {
            bufs.unit_mut(i).fill(i as u8 + 1);
        }
        for i in 0..4 {
            assert!(bufs.unit(i).iter().all(|&b| b == i as u8 + 1));
        }
    }

    #[test]
    fn test_mmap_allocation() {
        let mut bufs = IoBuffers::allocate(MemType::Mmap, 2, 8192, 4096, 0).unwrap();
        bufs.unit_mut(1)[0] = 0xAA;
        assert_eq!(bufs.unit(1)[0], 0xAA);
        // Anonymous mappings start zeroed.
        assert_eq!(bufs.unit(0)[0], 0);
    }

    #[test]
    #[should_panic(expected = "buffer index out of range")]
    fn test_out_of_range_unit() {
        let bufs = IoBuffers::allocate(MemType::Heap, 2, 512, 512, 0).unwrap();
        bufs.unit_ptr(2);
    }
}
