//! Time-conflict stalls: overlapping accumulations are serialized by the
//! pipeline-depth history.

use warpsim_core::core::cache::tags::window_of;
use warpsim_core::core::pipeline::stall::TimeConflictModel;

#[test]
fn second_writer_to_same_pixel_stalls() {
    let mut tc = TimeConflictModel::new(6);
    tc.record(&[window_of(3.0, 3.0)], 10);

    // Same source location from a different output pixel, still in flight.
    let resume = tc.check(&[window_of(3.5, 3.5)], 11);
    assert_eq!(resume, Some(16));

    // The stall lasts exactly until the conflicting entry retires.
    assert!(tc.check(&[window_of(3.5, 3.5)], 15).is_some());
    assert!(tc.check(&[window_of(3.5, 3.5)], 16).is_none());
}

#[test]
fn sub_pixel_parity_is_ignored() {
    let mut tc = TimeConflictModel::new(6);
    tc.record(&[window_of(3.25, 3.75)], 10);
    // Integer window is what matters, not the fraction.
    assert!(tc.check(&[window_of(3.9, 3.1)], 11).is_some());
}

#[test]
fn stall_ends_when_history_drains() {
    let mut tc = TimeConflictModel::new(2);
    tc.record(&[window_of(5.0, 5.0)], 0);
    tc.expire(2);
    assert!(tc.check(&[window_of(5.0, 5.0)], 2).is_none());
}
