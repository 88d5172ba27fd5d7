//! Cache coherence: a ref inserted and not evicted always hits; after
//! eviction it misses until reinserted.

use warpsim_core::config::{CacheGeometry, PlruPolicy};
use warpsim_core::core::cache::{ComputeTagArray, TagArray};

fn geom(sets: usize, ways: usize) -> CacheGeometry {
    CacheGeometry {
        sets,
        ways,
        bank_rows: 1,
        line_bytes: 32,
    }
}

#[test]
fn resident_refs_always_hit() {
    let mut arr = TagArray::new(&geom(8, 4), PlruPolicy::Tree);
    let refs = [11u32, 22, 33, 44];
    for r in refs {
        assert!(!arr.reference(3, r).hit);
    }
    // Any access order: all four stay resident in a 4-way set.
    for r in [44u32, 11, 33, 22, 11, 44] {
        assert!(arr.reference(3, r).hit, "ref {r} should be resident");
    }
}

#[test]
fn evicted_ref_misses_until_reinserted() {
    let mut arr = TagArray::new(&geom(8, 2), PlruPolicy::Tree);
    assert!(!arr.reference(0, 1).hit);
    assert!(!arr.reference(0, 2).hit);
    let l = arr.reference(0, 3);
    assert!(!l.hit);
    let evicted = l.evicted.unwrap();

    assert!(arr.probe(0, evicted).is_none());
    let back = arr.reference(0, evicted);
    assert!(!back.hit);
    assert!(arr.reference(0, evicted).hit);
}

#[test]
fn sets_are_independent() {
    let mut arr = TagArray::new(&geom(4, 2), PlruPolicy::Tree);
    let _ = arr.reference(0, 7);
    assert!(arr.probe(1, 7).is_none());
    assert!(arr.probe(0, 7).is_some());
}

#[test]
fn saturating_policy_still_coherent() {
    let mut arr = TagArray::new(&geom(4, 4), PlruPolicy::Saturating);
    for r in 0..4u32 {
        assert!(!arr.reference(2, r).hit);
    }
    for r in 0..4u32 {
        assert!(arr.reference(2, r).hit);
    }
    assert!(arr.reference(2, 100).evicted.is_some());
}

#[test]
fn compute_probe_never_mutates() {
    let g = geom(4, 2);
    let mut res = TagArray::new(&g, PlruPolicy::Tree);
    let mut comp = ComputeTagArray::new(&g);
    let a = res.reference(0, 1);
    let b = res.reference(0, 2);
    comp.fill(0, a.way, 1);
    comp.fill(0, b.way, 2);

    // Probing in any order changes nothing about placement.
    for _ in 0..10 {
        assert_eq!(comp.probe(0, 1), Some(a.way));
        assert_eq!(comp.probe(0, 2), Some(b.way));
    }
}
