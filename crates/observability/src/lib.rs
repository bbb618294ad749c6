//! Process-wide tracing setup shared by the stockledger services.

pub mod tracing;

/// Install the JSON subscriber. Later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Install a human-readable subscriber that writes through the test harness
/// so output is captured per test. Later calls are no-ops.
pub fn init_for_tests() {
    tracing::init_for_tests();
}
