//! Set-associative resampling cache.
//!
//! Two parallel tag tables cover the same (set, way) space:
//!
//! * The **reservation array** ([`TagArray`]) is written by the parser. It
//!   drives PLRU ordering and admits in-flight misses, so the pipeline can
//!   keep issuing lookups against lines whose fetch has not landed yet.
//! * The **compute array** ([`ComputeTagArray`]) is written by the fill
//!   controller and invalidated by the victim controller. It gates whether
//!   data is actually present for the compute engine; probing it never
//!   mutates replacement state.
//!
//! Line bytes live in [`CacheStorage`], written once per fill and read (or
//! read-modify-written, in reduction mode) by the compute engine until the
//! slot is recycled.

/// Pseudo-LRU replacement state (tree and saturating flavors).
pub mod plru;
/// Coordinate-to-tag translation and tag merging.
pub mod tags;

use crate::config::{CacheGeometry, PlruPolicy};
use tracing::trace;

/// Result of one reservation lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    /// Way serving the reference (hit way or allocated way).
    pub way: usize,
    /// Whether the reference hit.
    pub hit: bool,
    /// Line ref displaced by the allocation, if a valid line was evicted.
    pub evicted: Option<u32>,
}

/// Snapshot of one set's reservation state, for batch-admission rollback.
///
/// The parser must not mutate the cache for a batch it cannot admit (miss
/// queue full), so it snapshots the touched sets, performs the lookups, and
/// restores on failure.
#[derive(Debug, Clone)]
pub struct SetSnapshot {
    set: usize,
    refs: Vec<u32>,
    valid: Vec<bool>,
    plru: u16,
}

impl SetSnapshot {
    /// The set this snapshot captured.
    pub const fn set(&self) -> usize {
        self.set
    }
}

/// The reservation tag array with PLRU replacement.
#[derive(Debug)]
pub struct TagArray {
    sets: usize,
    ways: usize,
    refs: Vec<u32>,
    valid: Vec<bool>,
    plru: Vec<u16>,
    policy: PlruPolicy,
}

impl TagArray {
    /// Creates an empty array for the given geometry.
    pub fn new(geom: &CacheGeometry, policy: PlruPolicy) -> Self {
        Self {
            sets: geom.sets,
            ways: geom.ways,
            refs: vec![0; geom.sets * geom.ways],
            valid: vec![false; geom.sets * geom.ways],
            plru: vec![0; geom.sets],
            policy,
        }
    }

    /// Clears all entries and replacement state (task start).
    pub fn reset(&mut self) {
        self.refs.fill(0);
        self.valid.fill(false);
        self.plru.fill(0);
    }

    const fn idx(&self, set: usize, way: usize) -> usize {
        set * self.ways + way
    }

    /// Read-only hit test; never touches replacement state.
    pub fn probe(&self, set: usize, line_ref: u32) -> Option<usize> {
        (0..self.ways).find(|&way| {
            let i = self.idx(set, way);
            self.valid[i] && self.refs[i] == line_ref
        })
    }

    /// References a line: hit updates PLRU to MRU; miss evicts the PLRU way
    /// (preferring invalid ways) and allocates.
    pub fn reference(&mut self, set: usize, line_ref: u32) -> Lookup {
        if let Some(way) = self.probe(set, line_ref) {
            self.touch(set, way, true);
            return Lookup {
                way,
                hit: true,
                evicted: None,
            };
        }

        // Fill invalid ways before evicting anything.
        let way = (0..self.ways)
            .find(|&w| !self.valid[self.idx(set, w)])
            .unwrap_or_else(|| self.victim(set));
        let i = self.idx(set, way);
        let evicted = self.valid[i].then_some(self.refs[i]);
        self.refs[i] = line_ref;
        self.valid[i] = true;
        self.touch(set, way, false);
        if evicted.is_some() {
            trace!(set, way, line_ref, "reservation eviction");
        }
        Lookup {
            way,
            hit: false,
            evicted,
        }
    }

    /// The way the replacement policy would evict next.
    pub fn victim(&self, set: usize) -> usize {
        match self.policy {
            PlruPolicy::Tree => plru::tree_victim(self.plru[set], self.ways),
            PlruPolicy::Saturating => plru::saturating_victim(self.plru[set], self.ways),
        }
    }

    /// Marks `way` most-recently-used.
    ///
    /// The saturating policy ignores the hit/miss distinction (monotonic
    /// mark-as-used); the tree policy updates the full path either way —
    /// the flag is kept so per-task policies stay signature-compatible.
    fn touch(&mut self, set: usize, way: usize, _hit: bool) {
        self.plru[set] = match self.policy {
            PlruPolicy::Tree => plru::tree_touch(self.plru[set], self.ways, way),
            PlruPolicy::Saturating => plru::saturating_touch(self.plru[set], self.ways, way),
        };
    }

    /// Captures one set's state for later rollback.
    pub fn snapshot_set(&self, set: usize) -> SetSnapshot {
        let base = set * self.ways;
        SetSnapshot {
            set,
            refs: self.refs[base..base + self.ways].to_vec(),
            valid: self.valid[base..base + self.ways].to_vec(),
            plru: self.plru[set],
        }
    }

    /// Restores a set captured with [`Self::snapshot_set`].
    pub fn restore_set(&mut self, snap: &SetSnapshot) {
        let base = snap.set * self.ways;
        self.refs[base..base + self.ways].copy_from_slice(&snap.refs);
        self.valid[base..base + self.ways].copy_from_slice(&snap.valid);
        self.plru[snap.set] = snap.plru;
    }

    /// Set count.
    pub const fn sets(&self) -> usize {
        self.sets
    }

    /// Way count.
    pub const fn ways(&self) -> usize {
        self.ways
    }
}

/// The compute-side tag table: which (set, way) actually holds fetched data.
#[derive(Debug)]
pub struct ComputeTagArray {
    ways: usize,
    refs: Vec<u32>,
    valid: Vec<bool>,
}

impl ComputeTagArray {
    /// Creates an empty array for the given geometry.
    pub fn new(geom: &CacheGeometry) -> Self {
        Self {
            ways: geom.ways,
            refs: vec![0; geom.sets * geom.ways],
            valid: vec![false; geom.sets * geom.ways],
        }
    }

    /// Read-only hit test for the compute engine.
    pub fn probe(&self, set: usize, line_ref: u32) -> Option<usize> {
        (0..self.ways).find(|&way| {
            let i = set * self.ways + way;
            self.valid[i] && self.refs[i] == line_ref
        })
    }

    /// Marks a slot as holding fetched data (fill controller).
    pub fn fill(&mut self, set: usize, way: usize, line_ref: u32) {
        let i = set * self.ways + way;
        self.refs[i] = line_ref;
        self.valid[i] = true;
    }

    /// Invalidates a slot (victim controller).
    pub fn invalidate(&mut self, set: usize, way: usize) {
        self.valid[set * self.ways + way] = false;
    }

    /// Whether a slot currently holds data.
    pub fn is_valid(&self, set: usize, way: usize) -> bool {
        self.valid[set * self.ways + way]
    }

    /// Clears all entries (task start).
    pub fn reset(&mut self) {
        self.refs.fill(0);
        self.valid.fill(false);
    }

    /// All slots currently holding data, as (set, way, ref) triples.
    pub fn iter_valid(&self) -> impl Iterator<Item = (usize, usize, u32)> + '_ {
        self.valid.iter().enumerate().filter_map(|(i, v)| {
            v.then_some((i / self.ways, i % self.ways, self.refs[i]))
        })
    }
}

/// Cached line bytes for every (set, way) slot.
#[derive(Debug)]
pub struct CacheStorage {
    ways: usize,
    line_bytes: usize,
    data: Vec<u8>,
}

impl CacheStorage {
    /// Allocates zeroed storage for the given geometry.
    pub fn new(geom: &CacheGeometry) -> Self {
        Self {
            ways: geom.ways,
            line_bytes: geom.line_bytes,
            data: vec![0; geom.sets * geom.ways * geom.line_bytes],
        }
    }

    /// Line size in bytes.
    pub const fn line_bytes(&self) -> usize {
        self.line_bytes
    }

    /// The bytes of one slot.
    pub fn line(&self, set: usize, way: usize) -> &[u8] {
        let base = (set * self.ways + way) * self.line_bytes;
        &self.data[base..base + self.line_bytes]
    }

    /// Mutable bytes of one slot (fill install, reduction read-modify-write).
    pub fn line_mut(&mut self, set: usize, way: usize) -> &mut [u8] {
        let base = (set * self.ways + way) * self.line_bytes;
        &mut self.data[base..base + self.line_bytes]
    }
}
