//! Particle advection (§4.6.4) and level-set advection (§4.6.6).

use crate::backend::GridBackend;
use crate::bitgrid::BitGrid;
use crate::collaborators::{interpolate_velocity, max_velocity_magnitude, Rasterizer, Redistancer, ScalarAdvector};
use crate::grid::Grid;
use crate::hashgrid::PointHash;
use crate::mac::MacGrid;

use super::particle::ParticleSet;

/// Integrate each particle by RK-1/2/4 of the MAC-interpolated velocity.
/// Ballistic particles advance by their own stored velocity instead, and
/// the hash grid is rebuilt from the post-advection positions.
pub fn advect<const N: usize, B: GridBackend<f64, N>>(
    particles: &mut ParticleSet<N>,
    velocity: &MacGrid<f64, N, B>,
    dx: f64,
    dt: f64,
    rk_order: u32,
    hash: &mut impl PointHash<N>,
) {
    for p in particles.iter_mut() {
        if p.bullet {
            for d in 0..N {
                p.position[d] += dt * p.velocity[d];
            }
            continue;
        }
        let displacement = match rk_order {
            1 => rk1(p.position, velocity, dx, dt),
            4 => rk4(p.position, velocity, dx, dt),
            _ => rk2(p.position, velocity, dx, dt),
        };
        for d in 0..N {
            p.position[d] += displacement[d];
        }
    }
    hash.sort_points(&particles.positions());
}

fn rk1<const N: usize, B: GridBackend<f64, N>>(p: [f64; N], velocity: &MacGrid<f64, N, B>, dx: f64, dt: f64) -> [f64; N] {
    let v = interpolate_velocity(velocity, p, dx);
    scale(v, dt)
}

fn rk2<const N: usize, B: GridBackend<f64, N>>(p: [f64; N], velocity: &MacGrid<f64, N, B>, dx: f64, dt: f64) -> [f64; N] {
    let v0 = interpolate_velocity(velocity, p, dx);
    let mid = add(p, scale(v0, dt * 0.5));
    let v1 = interpolate_velocity(velocity, mid, dx);
    scale(v1, dt)
}

fn rk4<const N: usize, B: GridBackend<f64, N>>(p: [f64; N], velocity: &MacGrid<f64, N, B>, dx: f64, dt: f64) -> [f64; N] {
    let k1 = interpolate_velocity(velocity, p, dx);
    let k2 = interpolate_velocity(velocity, add(p, scale(k1, dt * 0.5)), dx);
    let k3 = interpolate_velocity(velocity, add(p, scale(k2, dt * 0.5)), dx);
    let k4 = interpolate_velocity(velocity, add(p, scale(k3, dt)), dx);
    let mut out = [0.0f64; N];
    for d in 0..N {
        out[d] = dt / 6.0 * (k1[d] + 2.0 * k2[d] + 2.0 * k3[d] + k4[d]);
    }
    out
}

fn scale<const N: usize>(v: [f64; N], s: f64) -> [f64; N] {
    let mut out = v;
    out.iter_mut().for_each(|x| *x *= s);
    out
}

fn add<const N: usize>(a: [f64; N], b: [f64; N]) -> [f64; N] {
    let mut out = a;
    for d in 0..N {
        out[d] += b[d];
    }
    out
}

/// Carry the fluid level-set through one step of the external velocity field
/// (§4.6.6). Widens the active band first so advection has room to move the
/// surface without clipping at its own edge, then blends the advected
/// surface against a level-set rasterized directly from the particle cloud
/// so surface detail the grid field alone would smooth away survives.
///
/// `background` is the level-set's configured background value (used to
/// seed cells newly activated by dilation); `particle_background` seeds the
/// scratch grid the rasterizer writes into.
#[allow(clippy::too_many_arguments)]
pub fn advect_levelset<const N: usize, BF: GridBackend<f64, N>, BB: GridBackend<(), N>>(
    levelset: &mut Grid<f64, N, BF>,
    solid: &Grid<f64, N, BF>,
    sizing: &Grid<f64, N, BF>,
    particles: &ParticleSet<N>,
    velocity: &MacGrid<f64, N, BF>,
    advector: &dyn ScalarAdvector<f64, N, BF>,
    redistancer: &dyn Redistancer<f64, N, BF>,
    rasterizer: &dyn Rasterizer<N, f64, BF>,
    narrowband: u32,
    erosion: f64,
    dx: f64,
    dt: f64,
    background: f64,
    particle_background: f64,
) {
    let shape = levelset.shape();
    let max_u = max_velocity_magnitude(velocity);
    let dilate_width = narrowband + 2 + (max_u * dt / dx).ceil() as u32;

    for p in particles.iter() {
        let mut cell = [0i64; N];
        for d in 0..N {
            cell[d] = (p.position[d] / dx).floor() as i64;
        }
        let clamped = clamp_to_shape(cell, shape);
        if !levelset.is_active(clamped) {
            let v = levelset.sample(clamped);
            levelset.set(clamped, &mut |slot, active| {
                *slot = Some(v);
                *active = true;
            });
        }
    }
    levelset.dilate(
        &mut |slot, active| {
            *slot = Some(background);
            *active = true;
        },
        dilate_width,
    );

    advector.advect_scalar(levelset, velocity, dt);

    if particles.is_empty() {
        redistancer.redistance(levelset);
        return;
    }

    redistancer.redistance(levelset);

    let solid_exists = solid.serial_actives().into_iter().next().is_some();
    for c in levelset.serial_actives() {
        let erode_here = !solid_exists || solid.sample(c) > 0.5 * dx;
        if erode_here {
            let v = levelset.sample(c) + erosion * dx;
            levelset.set(c, &mut |slot, active| {
                *slot = Some(v);
                *active = true;
            });
        }
    }

    let mut eroded = Grid::<f64, N, BF>::new(shape, background);
    eroded.copy(levelset, |d, s| *d = *s);

    let mut mask = BitGrid::<N, BB>::new(shape);
    let positions = particles.positions();
    let radii: Vec<f64> = particles.iter().map(|p| p.radius).collect();
    for &p in &positions {
        let mut cell = [0i64; N];
        for d in 0..N {
            cell[d] = (p[d] / dx).floor() as i64;
        }
        mask.set(clamp_to_shape(cell, shape), true);
    }
    mask.dilate(2);
    for c in mask.serial_actives() {
        if !levelset.is_active(c) {
            let v = levelset.sample(c);
            levelset.set(c, &mut |slot, active| {
                *slot = Some(v);
                *active = true;
            });
        }
    }

    let mut particle_levelset = Grid::<f64, N, BF>::new(shape, particle_background);
    rasterizer.rasterize(&positions, &radii, &mut particle_levelset);

    levelset.dilate(
        &mut |slot, active| {
            *slot = Some(background);
            *active = true;
        },
        3,
    );
    for c in levelset.serial_actives() {
        let rate = sizing.sample(c);
        let value = rate * levelset.sample(c).min(particle_levelset.sample(c)) + (1.0 - rate) * eroded.sample(c);
        levelset.set(c, &mut |slot, active| {
            *slot = Some(value);
            *active = true;
        });
    }

    // Re-establish the signed-distance property across the combined
    // surface; extrapolation past the solid boundary is the redistancer's
    // own contract (§4.7), not this routine's concern.
    redistancer.redistance(levelset);
}

fn clamp_to_shape<const N: usize>(c: [i64; N], shape: crate::shape::Shape<N>) -> [i64; N] {
    let mut out = c;
    for d in 0..N {
        out[d] = out[d].clamp(0, shape.axis(d) as i64 - 1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dense::DenseBackend;
    use crate::flip::particle::Particle;
    use crate::hashgrid::CellHashGrid;
    use crate::shape::Shape;

    #[test]
    fn bullet_integrates_ballistically_ignoring_grid_velocity() {
        let shape = Shape::<2>::new([8, 8]);
        let velocity = MacGrid::<f64, 2, DenseBackend<f64, 2>>::new(shape);
        let mut particles = ParticleSet::<2>::new();
        let mut p = Particle::new([1.0, 1.0], [2.0, 0.0], 1.0, 0.1);
        p.bullet = true;
        particles.push(p);
        let mut hash = CellHashGrid::<2>::new(1.0);
        advect(&mut particles, &velocity, 1.0, 0.5, 2, &mut hash);
        assert_eq!(particles.get(0).position, [2.0, 1.0]);
    }

    struct NoopScalarAdvector;
    impl<const N: usize, B: GridBackend<f64, N>> ScalarAdvector<f64, N, B> for NoopScalarAdvector {
        fn advect_scalar(&self, _field: &mut Grid<f64, N, B>, _velocity: &MacGrid<f64, N, B>, _dt: f64) {}
    }

    struct NoopRedistancer;
    impl<const N: usize, B: GridBackend<f64, N>> Redistancer<f64, N, B> for NoopRedistancer {
        fn redistance(&self, _levelset: &mut Grid<f64, N, B>) {}
    }

    struct ConstantRasterizer(f64);
    impl<const N: usize, B: GridBackend<f64, N>> crate::collaborators::Rasterizer<N, f64, B> for ConstantRasterizer {
        fn rasterize(&self, positions: &[[f64; N]], _radii: &[f64], out: &mut Grid<f64, N, B>) {
            let shape = out.shape();
            for &p in positions {
                let mut c = [0i64; N];
                for d in 0..N {
                    c[d] = (p[d] / 1.0).floor() as i64;
                }
                if shape.in_bounds(c) {
                    let v = self.0;
                    out.set(c, &mut |slot, active| {
                        *slot = Some(v);
                        *active = true;
                    });
                }
            }
        }
    }

    #[test]
    fn advect_levelset_runs_without_losing_surface_near_particles() {
        let shape = Shape::<2>::new([8, 8]);
        let dx = 1.0;
        let mut levelset = Grid::<f64, 2, DenseBackend<f64, 2>>::new(shape, 3.0);
        let solid = Grid::<f64, 2, DenseBackend<f64, 2>>::new(shape, 3.0);
        let mut sizing = Grid::<f64, 2, DenseBackend<f64, 2>>::new(shape, 1.0);
        for c in shape.iter() {
            levelset.set(c, &mut |slot, a| {
                *slot = Some(-1.0);
                *a = true;
            });
            sizing.set(c, &mut |slot, a| {
                *slot = Some(1.0);
                *a = true;
            });
        }
        let velocity = MacGrid::<f64, 2, DenseBackend<f64, 2>>::new(shape);
        let mut particles = ParticleSet::<2>::new();
        particles.push(Particle::new([4.0, 4.0], [0.0, 0.0], 1.0, 0.25));

        advect_levelset::<2, DenseBackend<f64, 2>, DenseBackend<(), 2>>(
            &mut levelset,
            &solid,
            &sizing,
            &particles,
            &velocity,
            &NoopScalarAdvector,
            &NoopRedistancer,
            &ConstantRasterizer(-1.0),
            3,
            0.0,
            dx,
            0.1,
            3.0,
            0.125,
        );

        assert!(levelset.is_active([4, 4]));
        assert!(levelset.sample([4, 4]) < 0.0);
    }
}
