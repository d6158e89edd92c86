//! Particle seeding (§4.6.2).

use crate::backend::GridBackend;
use crate::collaborators::interpolate_velocity;
use crate::config::FlipConfig;
use crate::grid::Grid;
use crate::mac::MacGrid;

use super::particle::{Particle, ParticleSet};

/// Sub-cell jitter offsets at quarter-cell positions: `2^N` of them (8 in
/// 3D, 4 in 2D), matching §4.6.2.
fn jitter_offsets<const N: usize>(dx: f64) -> Vec<[f64; N]> {
    let corners = 1usize << N;
    (0..corners)
        .map(|mask| {
            let mut off = [0.0f64; N];
            for d in 0..N {
                let bit = (mask >> d) & 1;
                off[d] = if bit == 1 { 0.25 * dx } else { -0.25 * dx };
            }
            off
        })
        .collect()
}

/// Seed particles into every narrowband cell with nonzero sizing. Deep
/// interior cells (`loose_interior`) get a single centered particle instead
/// of the full jittered set.
pub fn seed<const N: usize, B: GridBackend<f64, N>, BB: GridBackend<(), N>>(
    levelset: &Grid<f64, N, B>,
    sizing: &Grid<f64, N, B>,
    velocity: &MacGrid<f64, N, B>,
    narrowband: &crate::bitgrid::BitGrid<N, BB>,
    dx: f64,
    cfg: &FlipConfig,
) -> ParticleSet<N> {
    let mut particles = ParticleSet::new();
    let offsets = jitter_offsets::<N>(dx);

    for c in narrowband.serial_actives() {
        if sizing.sample(c) <= 0.0 {
            continue;
        }
        let phi = levelset.sample(c);
        let mut cell_center = [0.0f64; N];
        for d in 0..N {
            cell_center[d] = (c[d] as f64 + 0.5) * dx;
        }

        if cfg.loose_interior && phi <= -1.25 * dx {
            let v = interpolate_velocity(velocity, cell_center, dx);
            let mut p = Particle::new(cell_center, v, 1.0, dx * 0.25);
            fit_to_surface(&mut p, levelset, dx, cfg.fit_particle_dist);
            particles.push(p);
            continue;
        }

        for off in &offsets {
            let mut pos = cell_center;
            for d in 0..N {
                pos[d] += off[d];
            }
            let v = interpolate_velocity(velocity, pos, dx);
            let mut p = Particle::new(pos, v, 1.0 / (1usize << N) as f64, dx * 0.25);
            fit_to_surface(&mut p, levelset, dx, cfg.fit_particle_dist);
            particles.push(p);
        }
    }

    particles
}

/// Iterate `p ← p - 0.5*(phi(p) ∓ r)*grad(phi)` a few steps so the particle
/// settles just below the surface when it started too close (§4.6.2).
pub(super) fn fit_to_surface<const N: usize, B: GridBackend<f64, N>>(
    p: &mut Particle<N>,
    levelset: &Grid<f64, N, B>,
    dx: f64,
    fit_dist: f64,
) {
    let shape = levelset.shape();
    for _ in 0..4 {
        let mut cell = [0i64; N];
        for d in 0..N {
            cell[d] = (p.position[d] / dx).floor() as i64;
        }
        if !shape.in_bounds(cell) {
            break;
        }
        let phi = levelset.sample(cell);
        if phi.abs() >= fit_dist * p.radius {
            break;
        }
        let grad = gradient(levelset, p.position, dx);
        let sign = if phi < 0.0 { 1.0 } else { -1.0 };
        let target = phi - sign * p.radius;
        for d in 0..N {
            p.position[d] -= 0.5 * target * grad[d];
        }
    }
}

fn gradient<const N: usize, B: GridBackend<f64, N>>(levelset: &Grid<f64, N, B>, p: [f64; N], dx: f64) -> [f64; N] {
    let shape = levelset.shape();
    let mut grad = [0.0f64; N];
    for d in 0..N {
        let mut plus = p;
        let mut minus = p;
        plus[d] += dx;
        minus[d] -= dx;
        let mut cp = [0i64; N];
        let mut cm = [0i64; N];
        for e in 0..N {
            cp[e] = (plus[e] / dx).floor() as i64;
            cm[e] = (minus[e] / dx).floor() as i64;
        }
        let vp = if shape.in_bounds(cp) { levelset.sample(cp) } else { 0.0 };
        let vm = if shape.in_bounds(cm) { levelset.sample(cm) } else { 0.0 };
        grad[d] = (vp - vm) / (2.0 * dx);
    }
    grad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dense::DenseBackend;
    use crate::shape::Shape;

    #[test]
    fn jitter_offsets_count_matches_2_pow_n() {
        assert_eq!(jitter_offsets::<2>(1.0).len(), 4);
        assert_eq!(jitter_offsets::<3>(1.0).len(), 8);
    }

    #[test]
    fn seed_emits_particles_in_narrowband() {
        let shape = Shape::<2>::new([8, 8]);
        let dx = 1.0;
        let mut levelset = Grid::<f64, 2, DenseBackend<f64, 2>>::new(shape, 1.0);
        levelset.set_as_levelset(1.0, -1.0);
        for c in shape.iter() {
            let val = (c[1] as f64) - 4.0;
            levelset.set(c, &mut |slot, a| {
                *slot = Some(val);
                *a = true;
            });
        }
        let mut narrowband = crate::bitgrid::BitGrid::<2, DenseBackend<(), 2>>::new(shape);
        let mut sizing = Grid::<f64, 2, DenseBackend<f64, 2>>::new(shape, 0.0);
        for c in shape.iter() {
            if (levelset.sample(c)).abs() <= 3.0 {
                narrowband.set(c, true);
                sizing.set(c, &mut |slot, a| {
                    *slot = Some(1.0);
                    *a = true;
                });
            }
        }
        let velocity = MacGrid::<f64, 2, DenseBackend<f64, 2>>::new(shape);
        let cfg = FlipConfig::default();
        let particles = seed(&levelset, &sizing, &velocity, &narrowband, dx, &cfg);
        assert!(!particles.is_empty());
    }
}
