//! Cache unit tests.

/// Reservation/compute array coherence.
pub mod lookup;
/// Bit-layout translation functions.
pub mod tags;
