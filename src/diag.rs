//! Thin structured-logging wrapper.
//!
//! The core never throws exceptions for the failure modes it owns; it
//! reports diagnostic lines (name, counts, timings) through `tracing` and,
//! for the one truly unrecoverable condition (flood-fill on a grid with no
//! fill mode configured), logs a diagnostic and aborts the process.

use tracing::{error, info};

/// Log a per-step diagnostic line: a name plus a set of named counters.
pub fn step_counters(name: &str, counters: &[(&str, u64)]) {
    info!(target: "nbflip_grid", step = name, ?counters, "step complete");
}

/// Log a per-step timing line.
pub fn step_timing(name: &str, millis: f64) {
    info!(target: "nbflip_grid", step = name, millis, "step timing");
}

/// Flood-fill was invoked on a grid that is neither level-set nor fillable.
/// This is defined as fatal by the design: subsequent reads of `filled` would
/// be meaningless, so the process is aborted after logging a diagnostic.
pub fn fatal_unconfigured_flood_fill(grid_name: &str) -> ! {
    error!(
        target: "nbflip_grid",
        grid = grid_name,
        "flood_fill called on a grid with no level-set/fillable mode configured"
    );
    std::process::abort()
}
