//! Sparse, spatially-tiled, N-dimensional grid engine, plus the
//! narrowband-FLIP particle/grid coupling core built on top of it.
//!
//! The grid layer (`shape`, `grid`, `bitgrid`, `mac`, `backend`, `pool`,
//! `popcount`, `hashgrid`, `parallel`) is independent of any particular
//! simulation method. `flip` is the one consumer in this crate, wiring the
//! grid primitives into the seed/splat/advect/correct/collision/reseed
//! pipeline described in the design notes.

pub mod backend;
pub mod bitgrid;
pub mod collaborators;
pub mod config;
pub mod diag;
pub mod error;
pub mod flip;
pub mod grid;
pub mod hashgrid;
pub mod mac;
pub mod parallel;
pub mod pool;
pub mod popcount;
pub mod shape;

pub use bitgrid::BitGrid;
pub use config::{FlipConfig, GridConfig};
pub use error::{ConfigError, ConfigResult};
pub use flip::{FlipSolver, StepStats};
pub use grid::{FillMode, Grid};
pub use mac::MacGrid;
pub use pool::{GridPool, PooledGrid};
pub use shape::{Coord, Shape};
