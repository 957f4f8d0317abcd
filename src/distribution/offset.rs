//! Offset generation.
//!
//! Produces the next `(offset, length)` pair for an IO against one file
//! region. Sequential mode advances a per-direction cursor (or one shared
//! cursor when directions are tied together); random mode draws uniformly,
//! optionally through the no-repeat random map; zoned workloads stay inside
//! a `zone_size` window and then skip `zone_skip` bytes to the next zone.
//!
//! The generator owns cursor advancement and tail clamping: the returned
//! length is the requested block size trimmed to what is left of the region
//! (or zone), and `None` means the phase is over for this file.

use crate::config::workload::{DataDir, SeqMode, DDIR_COUNT};
use crate::rng::RandSource;
use crate::target::randmap::RandomMap;

/// Per-file cursor and zone state, embedded in each job file.
#[derive(Debug, Clone)]
pub struct CursorState {
    start: u64,
    len: u64,
    last_pos: [u64; DDIR_COUNT],
    shared_pos: u64,
    zone_start: u64,
    zone_bytes: u64,
    seq_issues: u64,
}

impl CursorState {
    pub fn new(start: u64, len: u64) -> Self {
        Self {
            start,
            len,
            last_pos: [start; DDIR_COUNT],
            shared_pos: start,
            zone_start: start,
            zone_bytes: 0,
            seq_issues: 0,
        }
    }

    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    pub fn region_len(&self) -> u64 {
        self.len
    }

    /// Rewind all cursors, as between loop passes or for time_based wrap.
    pub fn restart(&mut self) {
        *self = Self::new(self.start, self.len);
    }
}

/// Workload-level offset policy, shared by all files of a worker.
#[derive(Debug, Clone)]
pub struct OffsetGenerator {
    random: bool,
    seq_mode: SeqMode,
    zone_size: u64,
    zone_skip: u64,
    /// Sequential issues between stride applications.
    seq_nr: u64,
    /// Stride added to the cursor every `seq_nr` issues.
    seq_add: u64,
    soft_map: bool,
}

impl OffsetGenerator {
    pub fn new(random: bool, seq_mode: SeqMode) -> Self {
        Self {
            random,
            seq_mode,
            zone_size: 0,
            zone_skip: 0,
            seq_nr: 0,
            seq_add: 0,
            soft_map: false,
        }
    }

    pub fn with_zones(mut self, zone_size: u64, zone_skip: u64) -> Self {
        self.zone_size = zone_size;
        self.zone_skip = zone_skip;
        self
    }

    pub fn with_stride(mut self, seq_nr: u64, seq_add: u64) -> Self {
        self.seq_nr = seq_nr;
        self.seq_add = seq_add;
        self
    }

    pub fn with_soft_map(mut self, soft: bool) -> Self {
        self.soft_map = soft;
        self
    }

    /// Next `(offset, length)` for an IO of requested size `bs`, or `None`
    /// when the phase has covered this file.
    ///
    /// `min_bs` is the random-map granularity. The map is consulted and
    /// marked here so no-repeat bookkeeping cannot drift from the offsets
    /// actually produced.
    pub fn next(
        &self,
        cur: &mut CursorState,
        map: Option<&mut RandomMap>,
        dir: DataDir,
        bs: u32,
        min_bs: u32,
        rng: &mut RandSource,
    ) -> Option<(u64, u32)> {
        if bs == 0 || cur.len == 0 {
            return None;
        }
        if self.random {
            self.next_random(cur, map, bs, min_bs, rng)
        } else {
            self.next_sequential(cur, dir, bs)
        }
    }

    fn next_sequential(&self, cur: &mut CursorState, dir: DataDir, bs: u32) -> Option<(u64, u32)> {
        let mut pos = match self.seq_mode {
            SeqMode::Identical => cur.shared_pos,
            SeqMode::Sequential => cur.last_pos[dir.index()],
        };

        if self.zone_size > 0 && cur.zone_bytes >= self.zone_size {
            cur.zone_start += self.zone_size + self.zone_skip;
            cur.zone_bytes = 0;
            pos = cur.zone_start;
        }

        if self.seq_add > 0 && self.seq_nr > 0 && cur.seq_issues > 0 {
            if cur.seq_issues % self.seq_nr == 0 {
                pos += self.seq_add;
            }
        }

        if pos >= cur.end() {
            return None;
        }
        let len = (bs as u64).min(cur.end() - pos) as u32;

        let next = pos + len as u64;
        match self.seq_mode {
            SeqMode::Identical => cur.shared_pos = next,
            SeqMode::Sequential => cur.last_pos[dir.index()] = next,
        }
        cur.zone_bytes += len as u64;
        cur.seq_issues += 1;
        Some((pos, len))
    }

    fn next_random(
        &self,
        cur: &mut CursorState,
        map: Option<&mut RandomMap>,
        bs: u32,
        min_bs: u32,
        rng: &mut RandSource,
    ) -> Option<(u64, u32)> {
        if self.zone_size > 0 {
            return self.next_random_zoned(cur, bs, rng);
        }

        if let Some(map) = map {
            match map.pick_unused(rng) {
                Some(block) => {
                    let offset = cur.start + block * min_bs as u64;
                    let len = (bs as u64).min(cur.end() - offset) as u32;
                    let span = (len as u64).div_ceil(min_bs as u64);
                    for b in block..(block + span).min(map.nr_blocks()) {
                        map.mark(b);
                    }
                    return Some((offset, len));
                }
                None if !self.soft_map => return None,
                // softrandommap: exhaustion is reported but not fatal, keep
                // drawing with repeats.
                None => {}
            }
        }

        let nr_blocks = cur.len / bs as u64;
        if nr_blocks == 0 {
            return None;
        }
        let offset = cur.start + rng.next_below(nr_blocks) * bs as u64;
        Some((offset, bs))
    }

    fn next_random_zoned(
        &self,
        cur: &mut CursorState,
        bs: u32,
        rng: &mut RandSource,
    ) -> Option<(u64, u32)> {
        if cur.zone_bytes >= self.zone_size {
            cur.zone_start += self.zone_size + self.zone_skip;
            cur.zone_bytes = 0;
        }
        if cur.zone_start >= cur.end() {
            return None;
        }
        let zone_len = self.zone_size.min(cur.end() - cur.zone_start);
        let nr_blocks = zone_len / bs as u64;
        if nr_blocks == 0 {
            return None;
        }
        let offset = cur.zone_start + rng.next_below(nr_blocks) * bs as u64;
        cur.zone_bytes += bs as u64;
        Some((offset, bs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> RandSource {
        RandSource::new(false, 42)
    }

    #[test]
    fn test_sequential_covers_region_in_order() {
        // 1 MiB at bs 4k: 256 IOs at offsets 0, 4096, ..., 1044480.
        let gen = OffsetGenerator::new(false, SeqMode::Sequential);
        let mut cur = CursorState::new(0, 1 << 20);
        let mut r = rng();

        let mut offsets = Vec::new();
        while let Some((off, len)) = gen.next(&mut cur, None, DataDir::Write, 4096, 4096, &mut r) {
            assert_eq!(len, 4096);
            offsets.push(off);
        }
        assert_eq!(offsets.len(), 256);
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[255], 1_044_480);
        for pair in offsets.windows(2) {
            assert_eq!(pair[1], pair[0] + 4096);
        }
    }

    #[test]
    fn test_sequential_per_direction_cursors() {
        let gen = OffsetGenerator::new(false, SeqMode::Sequential);
        let mut cur = CursorState::new(0, 1 << 20);
        let mut r = rng();

        let (r0, _) = gen.next(&mut cur, None, DataDir::Read, 4096, 4096, &mut r).unwrap();
        let (w0, _) = gen.next(&mut cur, None, DataDir::Write, 4096, 4096, &mut r).unwrap();
        let (r1, _) = gen.next(&mut cur, None, DataDir::Read, 4096, 4096, &mut r).unwrap();
        assert_eq!(r0, 0);
        assert_eq!(w0, 0);
        assert_eq!(r1, 4096);
    }

    #[test]
    fn test_identical_mode_shares_cursor() {
        let gen = OffsetGenerator::new(false, SeqMode::Identical);
        let mut cur = CursorState::new(0, 1 << 20);
        let mut r = rng();

        let (r0, _) = gen.next(&mut cur, None, DataDir::Read, 4096, 4096, &mut r).unwrap();
        let (w0, _) = gen.next(&mut cur, None, DataDir::Write, 4096, 4096, &mut r).unwrap();
        assert_eq!(r0, 0);
        assert_eq!(w0, 4096);
    }

    #[test]
    fn test_sequential_tail_clamped() {
        let gen = OffsetGenerator::new(false, SeqMode::Sequential);
        let mut cur = CursorState::new(0, 10_000);
        let mut r = rng();

        let mut total = 0u64;
        let mut last_len = 0;
        while let Some((_, len)) = gen.next(&mut cur, None, DataDir::Write, 4096, 4096, &mut r) {
            total += len as u64;
            last_len = len;
        }
        assert_eq!(total, 10_000);
        assert_eq!(last_len, 10_000 % 4096);
    }

    #[test]
    fn test_random_offsets_block_aligned() {
        let gen = OffsetGenerator::new(true, SeqMode::Sequential);
        let mut cur = CursorState::new(0, 1 << 20);
        let mut r = rng();

        for _ in 0..1000 {
            let (off, len) = gen.next(&mut cur, None, DataDir::Read, 4096, 4096, &mut r).unwrap();
            assert_eq!(off % 4096, 0);
            assert!(off + len as u64 <= 1 << 20);
        }
    }

    #[test]
    fn test_random_map_phase_ends_on_exhaustion() {
        // 16 KiB at bs 4k: exactly 4 distinct blocks, then the phase ends.
        let gen = OffsetGenerator::new(true, SeqMode::Sequential);
        let mut cur = CursorState::new(0, 16 * 1024);
        let mut map = RandomMap::for_file(16 * 1024, 4096);
        let mut r = rng();

        let mut seen = Vec::new();
        for _ in 0..4 {
            let (off, _) = gen
                .next(&mut cur, Some(&mut map), DataDir::Write, 4096, 4096, &mut r)
                .unwrap();
            seen.push(off);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 4096, 8192, 12288]);
        assert!(gen
            .next(&mut cur, Some(&mut map), DataDir::Write, 4096, 4096, &mut r)
            .is_none());
    }

    #[test]
    fn test_soft_map_repeats_after_exhaustion() {
        let gen = OffsetGenerator::new(true, SeqMode::Sequential).with_soft_map(true);
        let mut cur = CursorState::new(0, 16 * 1024);
        let mut map = RandomMap::for_file(16 * 1024, 4096);
        let mut r = rng();

        for _ in 0..4 {
            gen.next(&mut cur, Some(&mut map), DataDir::Write, 4096, 4096, &mut r)
                .unwrap();
        }
        // Exhausted, but soft: draws keep coming.
        assert!(gen
            .next(&mut cur, Some(&mut map), DataDir::Write, 4096, 4096, &mut r)
            .is_some());
    }

    #[test]
    fn test_large_bs_marks_span_in_map() {
        // bs 8k over a 4k-granularity map: each IO consumes two map blocks.
        let gen = OffsetGenerator::new(true, SeqMode::Sequential);
        let mut cur = CursorState::new(0, 32 * 1024);
        let mut map = RandomMap::for_file(32 * 1024, 4096);
        let mut r = rng();

        let mut issued = 0;
        while gen
            .next(&mut cur, Some(&mut map), DataDir::Write, 8192, 4096, &mut r)
            .is_some()
        {
            issued += 1;
            assert!(issued <= 8);
        }
        assert!(map.is_exhausted());
    }

    #[test]
    fn test_zoned_sequential_skips_between_zones() {
        // 4k zone, 4k skip over 32k: offsets cover 0..4k, 8k..12k, 16k..20k, 24k..28k.
        let gen = OffsetGenerator::new(false, SeqMode::Sequential).with_zones(4096, 4096);
        let mut cur = CursorState::new(0, 32 * 1024);
        let mut r = rng();

        let mut offsets = Vec::new();
        while let Some((off, _)) = gen.next(&mut cur, None, DataDir::Read, 2048, 2048, &mut r) {
            offsets.push(off);
        }
        assert_eq!(
            offsets,
            vec![0, 2048, 8192, 10240, 16384, 18432, 24576, 26624]
        );
    }

    #[test]
    fn test_zoned_random_stays_in_zone() {
        let gen = OffsetGenerator::new(true, SeqMode::Sequential).with_zones(8192, 8192);
        let mut cur = CursorState::new(0, 64 * 1024);
        let mut r = rng();

        // First zone: two 4k draws inside [0, 8192).
        for _ in 0..2 {
            let (off, _) = gen.next(&mut cur, None, DataDir::Read, 4096, 4096, &mut r).unwrap();
            assert!(off < 8192);
        }
        // Next zone: draws inside [16384, 24576).
        for _ in 0..2 {
            let (off, _) = gen.next(&mut cur, None, DataDir::Read, 4096, 4096, &mut r).unwrap();
            assert!((16384..24576).contains(&off));
        }
    }

    #[test]
    fn test_stride_perturbs_sequential() {
        // Every 2 issues the cursor skips an extra 4k.
        let gen = OffsetGenerator::new(false, SeqMode::Sequential).with_stride(2, 4096);
        let mut cur = CursorState::new(0, 64 * 1024);
        let mut r = rng();

        let mut offsets = Vec::new();
        for _ in 0..6 {
            let (off, _) = gen.next(&mut cur, None, DataDir::Write, 4096, 4096, &mut r).unwrap();
            offsets.push(off);
        }
        assert_eq!(offsets, vec![0, 4096, 12288, 16384, 24576, 28672]);
    }

    #[test]
    fn test_restart_rewinds() {
        let gen = OffsetGenerator::new(false, SeqMode::Sequential);
        let mut cur = CursorState::new(0, 8192);
        let mut r = rng();

        while gen.next(&mut cur, None, DataDir::Write, 4096, 4096, &mut r).is_some() {}
        cur.restart();
        let (off, _) = gen.next(&mut cur, None, DataDir::Write, 4096, 4096, &mut r).unwrap();
        assert_eq!(off, 0);
    }
}
