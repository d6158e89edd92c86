//! Particle count maintenance (§4.6.9).

use crate::backend::GridBackend;
use crate::bitgrid::BitGrid;
use crate::collaborators::interpolate_velocity;
use crate::config::FlipConfig;
use crate::grid::Grid;
use crate::hashgrid::{NeighborMode, PointHash};
use crate::mac::MacGrid;

use super::particle::{Particle, ParticleSet};
use super::seed::fit_to_surface;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReseedStats {
    pub spawned: u32,
    pub culled: u32,
    pub removed_in_solid: u32,
}

/// Enforce `[min, max]` particles per narrowband cell with nonzero sizing;
/// remove particles buried in the solid beyond their own radius
/// unconditionally, regardless of narrowband membership (§4.6.9).
pub fn reseed<const N: usize, BF: GridBackend<f64, N>, BB: GridBackend<(), N>>(
    particles: &mut ParticleSet<N>,
    levelset: &Grid<f64, N, BF>,
    solid: &Grid<f64, N, BF>,
    sizing: &Grid<f64, N, BF>,
    narrowband: &BitGrid<N, BB>,
    velocity: &MacGrid<f64, N, BF>,
    hash: &impl PointHash<N>,
    dx: f64,
    cfg: &FlipConfig,
) -> ReseedStats {
    let mut stats = ReseedStats::default();
    let shape = levelset.shape();

    let mut removed_in_solid = 0u32;
    particles.retain(|p| {
        let mut cell = [0i64; N];
        for d in 0..N {
            cell[d] = (p.position[d] / dx).floor() as i64;
        }
        let buried = shape.in_bounds(cell) && -solid.sample(cell) > p.radius;
        if buried {
            removed_in_solid += 1;
        }
        buried
    });
    stats.removed_in_solid = removed_in_solid;

    let mut per_cell_counts: std::collections::HashMap<[i64; N], Vec<usize>> = std::collections::HashMap::new();
    for (i, p) in particles.iter().enumerate() {
        let mut cell = [0i64; N];
        for d in 0..N {
            cell[d] = (p.position[d] / dx).floor() as i64;
        }
        per_cell_counts.entry(cell).or_default().push(i);
    }

    let mut to_remove: std::collections::HashSet<usize> = std::collections::HashSet::new();
    let mut to_spawn: Vec<Particle<N>> = Vec::new();

    for c in narrowband.serial_actives() {
        if sizing.sample(c) <= 0.0 {
            continue;
        }
        let indices = per_cell_counts.get(&c).cloned().unwrap_or_default();
        let count = indices.len() as u32;

        if count > cfg.max_particles_per_cell {
            let mut excess = count - cfg.max_particles_per_cell;
            for &i in &indices {
                if excess == 0 {
                    break;
                }
                let p = particles.get(i);
                if !p.bullet && p.live_count >= cfg.minimal_live_count {
                    to_remove.insert(i);
                    excess -= 1;
                }
            }
            stats.culled += count - cfg.max_particles_per_cell - excess;
        } else if count < cfg.min_particles_per_cell {
            let needed = cfg.min_particles_per_cell - count;
            let mut cell_center = [0.0f64; N];
            for d in 0..N {
                cell_center[d] = (c[d] as f64 + 0.5) * dx;
            }
            let mut spawned = 0u32;
            let corners = 1usize << N;
            'corner: for mask in 0..corners {
                if spawned >= needed {
                    break;
                }
                let mut pos = cell_center;
                for d in 0..N {
                    let bit = (mask >> d) & 1;
                    pos[d] += if bit == 1 { 0.25 * dx } else { -0.25 * dx };
                }
                let neighbors = hash.cell_neighbors(c, NeighborMode::Cell);
                for &ni in &neighbors {
                    let np = particles.get(ni as usize);
                    let dist_sq: f64 = (0..N).map(|d| (np.position[d] - pos[d]).powi(2)).sum();
                    if dist_sq <= (2.0 * np.radius).powi(2) {
                        continue 'corner;
                    }
                }
                let v = interpolate_velocity(velocity, pos, dx);
                let mut p = Particle::new(pos, v, 1.0 / corners as f64, dx * 0.25);
                fit_to_surface(&mut p, levelset, dx, cfg.fit_particle_dist);
                to_spawn.push(p);
                spawned += 1;
            }
            stats.spawned += spawned;
        }
    }

    let mut idx = 0;
    particles.retain(|_| {
        let should_remove = to_remove.contains(&idx);
        idx += 1;
        should_remove
    });
    for p in to_spawn {
        particles.push(p);
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dense::DenseBackend;
    use crate::hashgrid::CellHashGrid;
    use crate::shape::Shape;

    #[test]
    fn underpopulated_cell_gets_new_particles() {
        let shape = Shape::<2>::new([4, 4]);
        let dx = 1.0;
        let mut levelset = Grid::<f64, 2, DenseBackend<f64, 2>>::new(shape, 1.0);
        let mut solid = Grid::<f64, 2, DenseBackend<f64, 2>>::new(shape, 10.0);
        let mut sizing = Grid::<f64, 2, DenseBackend<f64, 2>>::new(shape, 0.0);
        let mut narrowband = BitGrid::<2, DenseBackend<(), 2>>::new(shape);
        for c in shape.iter() {
            levelset.set(c, &mut |slot, a| {
                *slot = Some(-1.0);
                *a = true;
            });
            solid.set(c, &mut |slot, a| {
                *slot = Some(10.0);
                *a = true;
            });
            sizing.set(c, &mut |slot, a| {
                *slot = Some(1.0);
                *a = true;
            });
            narrowband.set(c, true);
        }
        let velocity = MacGrid::<f64, 2, DenseBackend<f64, 2>>::new(shape);
        let mut particles = ParticleSet::<2>::new();
        let hash = CellHashGrid::<2>::new(dx);
        let mut cfg = FlipConfig::default();
        cfg.min_particles_per_cell = 1;
        cfg.max_particles_per_cell = 16;

        let stats = reseed(&mut particles, &levelset, &solid, &sizing, &narrowband, &velocity, &hash, dx, &cfg);
        assert!(stats.spawned > 0);
        assert_eq!(particles.len() as u32, stats.spawned);
    }
}
