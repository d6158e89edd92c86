//! Narrowband-FLIP particle/grid coupling core (§4.6).
//!
//! The individual operations (seeding, splatting, advection, bullet
//! bookkeeping, position correction, collision, reseeding, sizing) are each
//! plain functions over the grid/particle types defined elsewhere in the
//! crate; [`FlipSolver`] only owns the simulation state between steps and
//! sequences those functions in the order a caller driving a pressure-solve
//! loop around it would expect.

pub mod advect;
pub mod bullets;
pub mod collision;
pub mod correct;
pub mod kernel;
pub mod particle;
pub mod reseed;
pub mod seed;
pub mod sizing;
pub mod splat;
pub mod velocity;

use crate::backend::GridBackend;
use crate::bitgrid::BitGrid;
use crate::collaborators::{Rasterizer, Redistancer, ScalarAdvector};
use crate::config::FlipConfig;
use crate::diag;
use crate::grid::Grid;
use crate::hashgrid::{CellHashGrid, PointHash};
use crate::mac::MacGrid;
use crate::shape::Shape;

use particle::ParticleSet;
use reseed::ReseedStats;
use sizing::SizingFunction;

/// Per-step telemetry, emitted as a single structured `tracing` event at the
/// end of [`FlipSolver::step`] (§4.6.12, §7 "diagnostic lines").
#[derive(Debug, Default, Clone, Copy)]
pub struct StepStats {
    pub particle_count: usize,
    pub bullet_count: usize,
    pub narrowband_cells: usize,
    pub reseed_spawned: u32,
    pub reseed_culled: u32,
    pub reseed_removed_in_solid: u32,
}

/// Owns the narrowband-FLIP simulation state: particles, the fluid and
/// solid level-sets, the sizing field, the narrowband mask, and the
/// point hash used to query particles by cell.
pub struct FlipSolver<const N: usize, BF: GridBackend<f64, N>, BB: GridBackend<(), N>> {
    particles: ParticleSet<N>,
    fluid: Grid<f64, N, BF>,
    solid: Grid<f64, N, BF>,
    sizing: Grid<f64, N, BF>,
    narrowband: BitGrid<N, BB>,
    hash: CellHashGrid<N>,
    dx: f64,
    cfg: FlipConfig,
    /// Set once the narrowband collapses to nothing, meaning the whole
    /// domain is interior fluid; level-set advection is then skipped for
    /// as long as it stays true, matching the original's `fluid_filled`
    /// short-circuit around its own level-set advection pass.
    fully_filled: bool,
}

impl<const N: usize, BF: GridBackend<f64, N>, BB: GridBackend<(), N>> FlipSolver<N, BF, BB> {
    pub fn new(shape: Shape<N>, dx: f64, cfg: FlipConfig) -> Self {
        let halfband = cfg.narrowband as f64 * dx;
        let mut fluid = Grid::new(shape, halfband).named("fluid");
        fluid.set_as_levelset(halfband, -halfband);
        let mut solid = Grid::new(shape, halfband).named("solid");
        solid.set_as_levelset(halfband, -halfband);
        FlipSolver {
            particles: ParticleSet::new(),
            fluid,
            solid,
            sizing: Grid::new(shape, 0.0).named("sizing"),
            narrowband: BitGrid::new(shape).named("narrowband"),
            // Bucket size must equal `dx`: every caller (splat, correct,
            // reseed) queries with cells computed as `floor(pos/dx)`, and
            // `cell_neighbors` only finds particles bucketed under that same
            // unit.
            hash: CellHashGrid::new(dx),
            dx,
            cfg,
            fully_filled: false,
        }
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn particles(&self) -> &ParticleSet<N> {
        &self.particles
    }

    pub fn levelset(&self) -> &Grid<f64, N, BF> {
        &self.fluid
    }

    pub fn levelset_mut(&mut self) -> &mut Grid<f64, N, BF> {
        &mut self.fluid
    }

    pub fn assign_solid(&mut self, solid: &Grid<f64, N, BF>) {
        self.solid.copy(solid, |d, s| *d = *s);
    }

    /// Seed particles into the current narrowband using the configured
    /// sizing function, replacing any existing particle population.
    pub fn seed(&mut self, velocity: &MacGrid<f64, N, BF>, sizing_fn: &dyn SizingFunction<N, BF>) -> usize {
        self.compute_narrowband();
        sizing_fn.compute(&self.fluid, velocity, &mut self.sizing);
        self.particles = seed::seed(&self.fluid, &self.sizing, velocity, &self.narrowband, self.dx, &self.cfg);
        self.hash.sort_points(&self.particles.positions());
        self.particles.len()
    }

    /// Re-derive the narrowband mask: a one-cell-wide seam around the
    /// fluid's zero-crossing, widened to `cfg.narrowband` cells either side.
    pub fn compute_narrowband(&mut self) -> usize {
        let shape = self.fluid.shape();
        let mut band = BitGrid::new(shape).named("narrowband");
        for c in shape.iter() {
            if self.fluid.sample(c).abs() <= self.dx {
                band.set(c, true);
            }
        }
        band.dilate(self.cfg.narrowband.saturating_sub(1));
        self.narrowband = band;
        let count = self.narrowband.count();
        self.fully_filled = count == 0;
        count
    }

    /// Accumulate particle mass/momentum onto the MAC grids (§4.6.3).
    pub fn splat(&self, momentum: &mut MacGrid<f64, N, BF>, mass: &mut MacGrid<f64, N, BF>) {
        splat::splat::<N, BF, BB>(&self.particles, &self.hash, momentum, mass, self.dx, self.cfg.apic);
    }

    /// Advance the simulation by one step: pick up the pressure-projected
    /// velocity field, move particles, maintain the bullet/narrowband/
    /// particle-count bookkeeping, and (unless the domain is fully filled)
    /// carry the level-set forward too.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        old_velocity: &MacGrid<f64, N, BF>,
        new_velocity: &MacGrid<f64, N, BF>,
        dt: f64,
        gravity: [f64; N],
        sizing_fn: &dyn SizingFunction<N, BF>,
        advector: &dyn ScalarAdvector<f64, N, BF>,
        redistancer: &dyn Redistancer<f64, N, BF>,
        rasterizer: &dyn Rasterizer<N, f64, BF>,
    ) -> StepStats {
        velocity::update_velocity(
            &mut self.particles,
            old_velocity,
            new_velocity,
            self.dx,
            dt,
            gravity,
            self.cfg.pic_flip,
            self.cfg.apic,
        );

        advect::advect(&mut self.particles, new_velocity, self.dx, dt, self.cfg.rk_order, &mut self.hash);

        bullets::update_bullets(
            &mut self.particles,
            &self.fluid,
            new_velocity,
            self.dx,
            dt,
            self.cfg.bullet_maximal_time,
            1.0,
            self.dx * 0.25,
        );

        correct::correct(
            &mut self.particles,
            &self.fluid,
            new_velocity,
            &self.hash,
            self.dx,
            self.cfg.correct_depth,
            self.cfg.correct_stiff,
            self.cfg.velocity_correction,
        );
        self.hash.sort_points(&self.particles.positions());

        collision::resolve_collisions(&mut self.particles, &self.solid, self.dx);

        let narrowband_cells = self.compute_narrowband();
        sizing_fn.compute(&self.fluid, new_velocity, &mut self.sizing);

        let reseed_stats: ReseedStats = reseed::reseed(
            &mut self.particles,
            &self.fluid,
            &self.solid,
            &self.sizing,
            &self.narrowband,
            new_velocity,
            &self.hash,
            self.dx,
            &self.cfg,
        );
        self.hash.sort_points(&self.particles.positions());

        if !self.fully_filled {
            let halfband = self.cfg.narrowband as f64 * self.dx;
            advect::advect_levelset(
                &mut self.fluid,
                &self.solid,
                &self.sizing,
                &self.particles,
                new_velocity,
                advector,
                redistancer,
                rasterizer,
                self.cfg.narrowband,
                self.cfg.erosion,
                self.dx,
                dt,
                halfband,
                self.dx * 0.125,
            );
        }
        collision::clip_fluid_against_solid(&mut self.fluid, &self.solid, self.dx);

        let bullet_count = self.particles.iter().filter(|p| p.bullet).count();
        let stats = StepStats {
            particle_count: self.particles.len(),
            bullet_count,
            narrowband_cells,
            reseed_spawned: reseed_stats.spawned,
            reseed_culled: reseed_stats.culled,
            reseed_removed_in_solid: reseed_stats.removed_in_solid,
        };
        diag::step_counters(
            "flip_solver",
            &[
                ("particles", stats.particle_count as u64),
                ("bullets", stats.bullet_count as u64),
                ("narrowband", stats.narrowband_cells as u64),
                ("reseed_spawned", stats.reseed_spawned as u64),
                ("reseed_culled", stats.reseed_culled as u64),
                ("reseed_removed_in_solid", stats.reseed_removed_in_solid as u64),
            ],
        );
        stats
    }

    /// Persist the ballistic (bullet) particles in the little-endian binary
    /// format described in §6: a `u32` count followed by, per particle, `N`
    /// `f32` position components and an `f32` radius.
    pub fn dump_ballistic_particles<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        let bullets: Vec<_> = self.particles.iter().filter(|p| p.bullet).collect();
        w.write_all(&(bullets.len() as u32).to_le_bytes())?;
        for p in bullets {
            for d in 0..N {
                w.write_all(&(p.position[d] as f32).to_le_bytes())?;
            }
            w.write_all(&(p.radius as f32).to_le_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dense::DenseBackend;
    use crate::collaborators::Rasterizer as RasterizerTrait;
    use sizing::ConstantSizing;

    type Dense2 = DenseBackend<f64, 2>;
    type DenseBit2 = DenseBackend<(), 2>;

    struct NoopScalarAdvector;
    impl<const N: usize, B: GridBackend<f64, N>> ScalarAdvector<f64, N, B> for NoopScalarAdvector {
        fn advect_scalar(&self, _field: &mut Grid<f64, N, B>, _velocity: &MacGrid<f64, N, B>, _dt: f64) {}
    }

    struct NoopRedistancer;
    impl<const N: usize, B: GridBackend<f64, N>> Redistancer<f64, N, B> for NoopRedistancer {
        fn redistance(&self, _levelset: &mut Grid<f64, N, B>) {}
    }

    struct NoopRasterizer;
    impl<const N: usize, B: GridBackend<f64, N>> RasterizerTrait<N, f64, B> for NoopRasterizer {
        fn rasterize(&self, _positions: &[[f64; N]], _radii: &[f64], _out: &mut Grid<f64, N, B>) {}
    }

    #[test]
    fn seed_then_step_preserves_a_sane_particle_population() {
        let shape = Shape::<2>::new([8, 8]);
        let dx = 1.0;
        let cfg = FlipConfig::default();
        let mut solver = FlipSolver::<2, Dense2, DenseBit2>::new(shape, dx, cfg);

        for c in shape.iter() {
            let val = (c[1] as f64) - 4.0;
            solver.fluid.set(c, &mut |slot, a| {
                *slot = Some(val);
                *a = true;
            });
        }
        let velocity = MacGrid::<f64, 2, Dense2>::new(shape);
        let seeded = solver.seed(&velocity, &ConstantSizing);
        assert!(seeded > 0);
        assert_eq!(solver.particle_count(), seeded);

        let stats = solver.step(
            &velocity,
            &velocity,
            0.05,
            [0.0, -9.8],
            &ConstantSizing,
            &NoopScalarAdvector,
            &NoopRedistancer,
            &NoopRasterizer,
        );
        assert_eq!(stats.particle_count, solver.particle_count());
    }

    #[test]
    fn dump_ballistic_particles_writes_little_endian_record() {
        let shape = Shape::<2>::new([4, 4]);
        let cfg = FlipConfig::default();
        let mut solver = FlipSolver::<2, Dense2, DenseBit2>::new(shape, 1.0, cfg);
        let mut p = particle::Particle::new([1.5, 2.5], [0.0, 0.0], 1.0, 0.2);
        p.bullet = true;
        solver.particles.push(p);

        let mut buf = Vec::new();
        solver.dump_ballistic_particles(&mut buf).unwrap();
        assert_eq!(&buf[0..4], &1u32.to_le_bytes());
        let x = f32::from_le_bytes(buf[4..8].try_into().unwrap());
        let y = f32::from_le_bytes(buf[8..12].try_into().unwrap());
        let r = f32::from_le_bytes(buf[12..16].try_into().unwrap());
        assert_eq!((x, y, r), (1.5f32, 2.5f32, 0.2f32));
    }
}
