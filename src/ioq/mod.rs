//! IO unit pool: pre-allocated request objects and depth bookkeeping.
//!
//! The pool owns `iodepth` units in a fixed arena; everything else refers to
//! a unit by its index, which doubles as the index of the unit's buffer
//! slice. Units move between three lists: free, busy (in flight), and
//! requeue (partial or failed submissions retried ahead of fresh work).
//! At every observable instant `|free| + |busy| + |requeue|` equals the
//! pool capacity.

use crate::config::workload::DataDir;
use crate::engine::IoOp;
use crate::util::fast_time::FastInstant;
use std::collections::VecDeque;

/// One request slot.
#[derive(Debug, Clone)]
pub struct IoUnit {
    /// Arena index; also the buffer slice index.
    pub index: usize,
    /// Engine operation; fsync units carry no payload.
    pub op: IoOp,
    /// Direction for accounting; sync ops account nothing.
    pub dir: DataDir,
    pub file_index: usize,
    pub offset: u64,
    pub len: u32,
    /// Progress into the unit's buffer slice after a partial transfer.
    pub buf_shift: u32,
    /// Unit allocation time (slat starts here).
    pub alloc_time: Option<FastInstant>,
    /// Engine acceptance time (clat starts here).
    pub issue_time: Option<FastInstant>,
    pub complete_time: Option<FastInstant>,
    /// Bytes transferred, or the failing errno.
    pub result: Option<Result<usize, i32>>,
    /// Block-local verify seed for verified writes.
    pub verify_seed: Option<u64>,
    /// Write sequence number feeding verify history.
    pub verify_serial: u64,
}

impl IoUnit {
    fn blank(index: usize) -> Self {
        Self {
            index,
            op: IoOp::Read,
            dir: DataDir::Read,
            file_index: 0,
            offset: 0,
            len: 0,
            buf_shift: 0,
            alloc_time: None,
            issue_time: None,
            complete_time: None,
            result: None,
            verify_seed: None,
            verify_serial: 0,
        }
    }

    fn clear(&mut self) {
        let index = self.index;
        *self = Self::blank(index);
    }
}

#[derive(Debug)]
pub struct IoUnitPool {
    units: Vec<IoUnit>,
    free: VecDeque<usize>,
    busy: Vec<usize>,
    requeue: VecDeque<usize>,
}

impl IoUnitPool {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            units: (0..depth).map(IoUnit::blank).collect(),
            free: (0..depth).collect(),
            busy: Vec::with_capacity(depth),
            requeue: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.units.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// In-flight units; the current queue depth.
    pub fn busy_count(&self) -> usize {
        self.busy.len()
    }

    pub fn requeue_count(&self) -> usize {
        self.requeue.len()
    }

    /// Take a previously requeued unit for resubmission, fields intact.
    pub fn take_requeued(&mut self) -> Option<usize> {
        let idx = self.requeue.pop_front()?;
        self.busy.push(idx);
        Some(idx)
    }

    /// Claim a fresh unit from the freelist. The unit moves straight onto
    /// the busy list; `None` means the caller must reap completions.
    pub fn get(&mut self, now: FastInstant) -> Option<usize> {
        let idx = self.free.pop_front()?;
        self.units[idx].clear();
        self.units[idx].alloc_time = Some(now);
        self.busy.push(idx);
        Some(idx)
    }

    #[inline]
    pub fn unit(&self, idx: usize) -> &IoUnit {
        &self.units[idx]
    }

    #[inline]
    pub fn unit_mut(&mut self, idx: usize) -> &mut IoUnit {
        &mut self.units[idx]
    }

    /// Stamp engine acceptance.
    pub fn mark_issued(&mut self, idx: usize, now: FastInstant) {
        self.units[idx].issue_time = Some(now);
    }

    /// Stamp completion with the engine's result.
    pub fn mark_complete(&mut self, idx: usize, result: Result<usize, i32>, now: FastInstant) {
        let unit = &mut self.units[idx];
        unit.complete_time = Some(now);
        unit.result = Some(result);
    }

    /// Move a busy unit to the requeue list for retry.
    pub fn requeue(&mut self, idx: usize) {
        self.remove_busy(idx);
        self.requeue.push_back(idx);
    }

    /// Return a busy unit to the freelist.
    pub fn put(&mut self, idx: usize) {
        self.remove_busy(idx);
        self.units[idx].clear();
        self.free.push_back(idx);
    }

    fn remove_busy(&mut self, idx: usize) {
        let pos = self
            .busy
            .iter()
            .position(|&b| b == idx)
            .expect("unit not on busy list");
        self.busy.swap_remove(pos);
    }

    /// Indices currently in flight, for cancellation on terminate.
    pub fn busy_units(&self) -> &[usize] {
        &self.busy
    }

    /// Submission latency (µs) of a unit, if both stamps are present.
    pub fn slat_us(&self, idx: usize) -> Option<u64> {
        let unit = &self.units[idx];
        match (unit.alloc_time, unit.issue_time) {
            (Some(alloc), Some(issue)) => Some(issue.duration_since(alloc).as_micros() as u64),
            _ => None,
        }
    }

    /// Completion latency (µs) of a unit, if both stamps are present.
    pub fn clat_us(&self, idx: usize) -> Option<u64> {
        let unit = &self.units[idx];
        match (unit.issue_time, unit.complete_time) {
            (Some(issue), Some(complete)) => {
                Some(complete.duration_since(issue).as_micros() as u64)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> FastInstant {
        FastInstant::now()
    }

    fn assert_invariant(pool: &IoUnitPool) {
        assert_eq!(
            pool.free_count() + pool.busy_count() + pool.requeue_count(),
            pool.capacity()
        );
    }

    #[test]
    fn test_pool_invariant_through_lifecycle() {
        let mut pool = IoUnitPool::new(4);
        assert_invariant(&pool);

        let a = pool.get(now()).unwrap();
        let b = pool.get(now()).unwrap();
        assert_invariant(&pool);
        assert_eq!(pool.busy_count(), 2);

        pool.mark_complete(a, Ok(4096), now());
        pool.put(a);
        assert_invariant(&pool);

        pool.requeue(b);
        assert_invariant(&pool);
        assert_eq!(pool.requeue_count(), 1);

        // Requeued unit comes back ahead of fresh ones.
        let c = pool.take_requeued().unwrap();
        assert_eq!(c, b);
        assert_invariant(&pool);
    }

    #[test]
    fn test_exhausted_pool_returns_none() {
        let mut pool = IoUnitPool::new(2);
        assert!(pool.get(now()).is_some());
        assert!(pool.get(now()).is_some());
        assert!(pool.get(now()).is_none());
        assert_eq!(pool.busy_count(), 2);
    }

    #[test]
    fn test_requeued_unit_keeps_fields() {
        let mut pool = IoUnitPool::new(2);
        let idx = pool.get(now()).unwrap();
        {
            let unit = pool.unit_mut(idx);
            unit.offset = 8192;
            unit.len = 4096;
            unit.dir = DataDir::Write;
        }
        pool.requeue(idx);
        assert!(pool.take_requeued().is_some());
        assert_eq!(pool.unit(idx).offset, 8192);
        assert_eq!(pool.unit(idx).dir, DataDir::Write);
    }

    #[test]
    fn test_put_clears_unit() {
        let mut pool = IoUnitPool::new(1);
        let idx = pool.get(now()).unwrap();
        pool.unit_mut(idx).offset = 12345;
        pool.mark_complete(idx, Ok(512), now());
        pool.put(idx);

        let idx = pool.get(now()).unwrap();
        assert_eq!(pool.unit(idx).offset, 0);
        assert!(pool.unit(idx).result.is_none());
    }

    #[test]
    fn test_latency_stamps() {
        let mut pool = IoUnitPool::new(1);
        let idx = pool.get(now()).unwrap();
        assert_eq!(pool.slat_us(idx), None);
        pool.mark_issued(idx, now());
        assert!(pool.slat_us(idx).is_some());
        assert_eq!(pool.clat_us(idx), None);
        pool.mark_complete(idx, Ok(0), now());
        assert!(pool.clat_us(idx).is_some());
    }
}
