//! Typed configuration surface.
//!
//! Mirrors the option table in §6 of the design spec. Every field is
//! defaulted so an empty TOML document is a valid configuration; `validate`
//! is the one place in the crate that turns malformed input into a typed,
//! recoverable error instead of an assertion.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Build-time default back-end, substituted for the `*` token in selector
/// strings (§6).
pub const DEFAULT_BACKEND: &str = "flat-tiled";

/// Default tile side `Z` for the flat-tiled and tree back-ends (§6 `TileSize`).
pub const DEFAULT_TILE_SIZE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizingMode {
    Both,
    VelocityOnly,
    GeometryOnly,
}

impl Default for SizingMode {
    fn default() -> Self {
        SizingMode::Both
    }
}

/// Configuration read by the grid back-ends (§6 `TileSize`..`EnableCache`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub backend: String,
    pub tile_size: u32,
    pub max_depth: u32,
    pub max_buffer: usize,
    pub enable_cache: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            backend: "*".to_string(),
            tile_size: 16,
            max_depth: 8,
            max_buffer: 4096,
            enable_cache: true,
        }
    }
}

impl GridConfig {
    /// Resolve the `*` default-backend token and validate numeric ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.tile_size.is_power_of_two() {
            return Err(ConfigError::TileSizeNotPowerOfTwo(self.tile_size));
        }
        let resolved = self.resolve_backend();
        match resolved.as_str() {
            "dense" | "flat-tiled" | "tree" | "tree-bit" => {}
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        }
        Ok(())
    }

    /// Substitute the `*` token for [`DEFAULT_BACKEND`].
    pub fn resolve_backend(&self) -> String {
        if self.backend == "*" {
            DEFAULT_BACKEND.to_string()
        } else {
            self.backend.clone()
        }
    }
}

/// Configuration read by the narrowband-FLIP core (§6 `APIC`..`PICFLIP`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlipConfig {
    pub apic: bool,
    pub narrowband: u32,
    pub correct_depth: u32,
    pub fit_particle_dist: f64,
    pub rk_order: u32,
    pub erosion: f64,
    pub min_particles_per_cell: u32,
    pub max_particles_per_cell: u32,
    pub minimal_live_count: u32,
    pub correct_stiff: f64,
    pub velocity_correction: bool,
    pub bullet_maximal_time: f64,
    pub loose_interior: bool,
    pub sizing_mode: SizingMode,
    pub sizing_blur_radius: u32,
    pub threshold_u: f64,
    pub threshold_g: f64,
    pub amplification: f64,
    pub diffuse_count: u32,
    pub diffuse_rate: f64,
    pub pic_flip: f64,
}

impl Default for FlipConfig {
    fn default() -> Self {
        FlipConfig {
            apic: true,
            narrowband: 3,
            correct_depth: 2,
            fit_particle_dist: 1.0,
            rk_order: 2,
            erosion: 0.5,
            min_particles_per_cell: 2,
            max_particles_per_cell: 16,
            minimal_live_count: 2,
            correct_stiff: 0.5,
            velocity_correction: false,
            bullet_maximal_time: 0.5,
            loose_interior: true,
            sizing_mode: SizingMode::Both,
            sizing_blur_radius: 2,
            threshold_u: 0.1,
            threshold_g: 0.1,
            amplification: 2.0,
            diffuse_count: 2,
            diffuse_rate: 0.5,
            pic_flip: 0.95,
        }
    }
}

impl FlipConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if ![1, 2, 4].contains(&self.rk_order) {
            return Err(ConfigError::InvalidRkOrder(self.rk_order));
        }
        if self.narrowband < 1 {
            return Err(ConfigError::InvalidNarrowband(self.narrowband));
        }
        if !(0.0..=1.0).contains(&self.pic_flip) {
            return Err(ConfigError::InvalidPicFlipBlend(self.pic_flip));
        }
        if self.erosion < 0.0 {
            return Err(ConfigError::NegativeValue { field: "erosion", value: self.erosion });
        }
        if self.bullet_maximal_time < 0.0 {
            return Err(ConfigError::NegativeValue {
                field: "bullet_maximal_time",
                value: self.bullet_maximal_time,
            });
        }
        if self.min_particles_per_cell > self.max_particles_per_cell {
            return Err(ConfigError::ParticleBoundsInverted {
                min: self.min_particles_per_cell,
                max: self.max_particles_per_cell,
            });
        }
        Ok(())
    }

    /// Parse a TOML document, defaulting any field not present, then validate.
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        let cfg: FlipConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(GridConfig::default().validate().is_ok());
        assert!(FlipConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_tile_size() {
        let mut cfg = GridConfig::default();
        cfg.tile_size = 17;
        assert!(matches!(cfg.validate(), Err(ConfigError::TileSizeNotPowerOfTwo(17))));
    }

    #[test]
    fn resolves_default_backend_token() {
        let cfg = GridConfig::default();
        assert_eq!(cfg.resolve_backend(), DEFAULT_BACKEND);
    }

    #[test]
    fn rejects_inverted_particle_bounds() {
        let mut cfg = FlipConfig::default();
        cfg.min_particles_per_cell = 20;
        cfg.max_particles_per_cell = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_toml_document_is_valid() {
        let cfg = FlipConfig::from_toml("").expect("empty config uses all defaults");
        assert_eq!(cfg.rk_order, 2);
    }
}
