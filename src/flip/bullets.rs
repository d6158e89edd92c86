//! Ballistic (bullet) particle promotion and decay (§4.6.8).

use crate::backend::GridBackend;
use crate::collaborators::interpolate_velocity;
use crate::grid::Grid;
use crate::mac::MacGrid;

use super::particle::ParticleSet;

/// After advection: promote particles that left the fluid, demote bullets
/// that re-entered, decay remaining bullets, and drop ones past their
/// maximal lifetime.
pub fn update_bullets<const N: usize, B: GridBackend<f64, N>>(
    particles: &mut ParticleSet<N>,
    levelset: &Grid<f64, N, B>,
    velocity: &MacGrid<f64, N, B>,
    dx: f64,
    dt: f64,
    bullet_maximal_time: f64,
    default_mass: f64,
    default_radius: f64,
) {
    let shape = levelset.shape();
    for p in particles.iter_mut() {
        let mut cell = [0i64; N];
        for d in 0..N {
            cell[d] = (p.position[d] / dx).floor() as i64;
        }
        let phi = if shape.in_bounds(cell) { levelset.sample(cell) } else { 1.0 };

        if !p.bullet && phi > 0.0 {
            p.bullet = true;
            p.bullet_time = 0.0;
            p.affine = [[0.0; N]; N];
        } else if p.bullet && phi <= 0.0 {
            p.bullet = false;
            p.bullet_time = 0.0;
            p.mass = default_mass;
            p.radius = default_radius;
            p.velocity = interpolate_velocity(velocity, p.position, dx);
        } else if p.bullet {
            p.bullet_time += dt;
            let fraction = (1.0 - p.bullet_time / bullet_maximal_time).max(0.0);
            p.mass = default_mass * fraction;
            p.radius = default_radius * fraction;
        }
    }

    particles.retain(|p| p.bullet && p.bullet_time > bullet_maximal_time);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dense::DenseBackend;
    use crate::flip::particle::Particle;
    use crate::shape::Shape;

    #[test]
    fn bullet_decays_then_is_removed_past_maximal_time() {
        // §8 scenario 6.
        let shape = Shape::<2>::new([4, 4]);
        let mut levelset = Grid::<f64, 2, DenseBackend<f64, 2>>::new(shape, 1.0);
        for c in shape.iter() {
            levelset.set(c, &mut |slot, a| {
                *slot = Some(1.0);
                *a = true;
            });
        }
        let velocity = MacGrid::<f64, 2, DenseBackend<f64, 2>>::new(shape);

        let mut particles = ParticleSet::<2>::new();
        let mut p = Particle::new([1.0, 1.0], [0.0, 0.0], 1.0, 0.25);
        p.bullet = true;
        particles.push(p);

        update_bullets(&mut particles, &levelset, &velocity, 1.0, 0.25, 0.5, 1.0, 0.25);
        assert_eq!(particles.len(), 1);
        assert!((particles.get(0).mass - 0.5).abs() < 1e-9);
        assert!((particles.get(0).radius - 0.125).abs() < 1e-9);

        update_bullets(&mut particles, &levelset, &velocity, 1.0, 0.35, 0.5, 1.0, 0.25);
        assert_eq!(particles.len(), 0);
    }
}
