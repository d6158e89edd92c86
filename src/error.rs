//! Crate-level error types.
//!
//! Most failure modes named in the design are caller bugs (out-of-range
//! coordinate, shape mismatch) and are asserted rather than returned — by the
//! time a `Result` could be constructed the caller has already violated an
//! invariant the type system can't otherwise express. The one boundary where
//! external, possibly-malformed input reaches the crate is configuration, so
//! that is the only path that returns `Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("tile size {0} is not a power of two")]
    TileSizeNotPowerOfTwo(u32),

    #[error("unknown back-end selector {0:?}")]
    UnknownBackend(String),

    #[error("RK order must be 1, 2, or 4, got {0}")]
    InvalidRkOrder(u32),

    #[error("narrowband width must be >= 1, got {0}")]
    InvalidNarrowband(u32),

    #[error("PIC/FLIP blend must be in [0,1], got {0}")]
    InvalidPicFlipBlend(f64),

    #[error("{field} must be >= 0, got {value}")]
    NegativeValue { field: &'static str, value: f64 },

    #[error("min particles per cell ({min}) exceeds max ({max})")]
    ParticleBoundsInverted { min: u32, max: u32 },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
