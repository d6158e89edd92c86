//! Particle/solid collision resolution (§4.6.11).

use crate::backend::GridBackend;
use crate::grid::Grid;
use crate::shape::Shape;

use super::particle::ParticleSet;

/// Push particles overlapping the solid along its gradient by the overshoot,
/// zero the inward velocity component, and clamp to domain bounds.
pub fn resolve_collisions<const N: usize, B: GridBackend<f64, N>>(
    particles: &mut ParticleSet<N>,
    solid: &Grid<f64, N, B>,
    dx: f64,
) {
    let shape = solid.shape();
    let bounds = domain_bounds::<N>(shape, dx);

    for p in particles.iter_mut() {
        let mut cell = [0i64; N];
        for d in 0..N {
            cell[d] = (p.position[d] / dx).floor() as i64;
        }
        if shape.in_bounds(cell) {
            let phi = solid.sample(cell);
            if phi < p.radius {
                let grad = gradient(solid, p.position, dx, shape);
                let norm_sq: f64 = grad.iter().map(|g| g * g).sum();
                if norm_sq > 1e-12 {
                    let overshoot = p.radius - phi;
                    for d in 0..N {
                        p.position[d] += overshoot * grad[d];
                    }
                    let inward: f64 = (0..N).map(|d| p.velocity[d] * grad[d]).sum();
                    if inward < 0.0 {
                        for d in 0..N {
                            p.velocity[d] -= inward * grad[d];
                        }
                    }
                }
            }
        }

        for d in 0..N {
            p.position[d] = p.position[d].clamp(bounds.0[d], bounds.1[d]);
        }
    }
}

fn domain_bounds<const N: usize>(shape: Shape<N>, dx: f64) -> ([f64; N], [f64; N]) {
    let mut hi = [0.0f64; N];
    for d in 0..N {
        hi[d] = shape.axis(d) as f64 * dx;
    }
    ([0.0; N], hi)
}

fn gradient<const N: usize, B: GridBackend<f64, N>>(grid: &Grid<f64, N, B>, p: [f64; N], dx: f64, shape: Shape<N>) -> [f64; N] {
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
        let vp = if shape.in_bounds(cp) { grid.sample(cp) } else { 0.0 };
        let vm = if shape.in_bounds(cm) { grid.sample(cm) } else { 0.0 };
        grad[d] = (vp - vm) / (2.0 * dx);
    }
    grad
}

/// Intersect the fluid level-set with the complement of the dilated solid
/// to prevent leakage: `max(phi_fluid, -phi_solid - sqrt(N)*dx)`.
pub fn clip_fluid_against_solid<const N: usize, B: GridBackend<f64, N>>(
    fluid: &mut Grid<f64, N, B>,
    solid: &Grid<f64, N, B>,
    dx: f64,
) {
    let margin = (N as f64).sqrt() * dx;
    for c in fluid.serial_actives() {
        let clipped = fluid.sample(c).max(-solid.sample(c) - margin);
        fluid.set(c, &mut |slot, active| {
            *slot = Some(clipped);
            *active = true;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dense::DenseBackend;
    use crate::flip::particle::Particle;

    #[test]
    fn particle_inside_solid_is_pushed_out_and_clamped() {
        let shape = Shape::<2>::new([8, 8]);
        let mut solid = Grid::<f64, 2, DenseBackend<f64, 2>>::new(shape, 10.0);
        for c in shape.iter() {
            // Solid half-plane x < 2: phi negative there.
            let val = c[0] as f64 - 2.0;
            solid.set(c, &mut |slot, a| {
                *slot = Some(val);
                *a = true;
            });
        }
        let mut particles = ParticleSet::<2>::new();
        particles.push(Particle::new([1.5, 3.5], [-1.0, 0.0], 1.0, 0.3));
        resolve_collisions(&mut particles, &solid, 1.0);
        assert!(particles.get(0).position[0] > 1.5);
    }

    #[test]
    fn particle_position_is_clamped_to_domain() {
        let shape = Shape::<2>::new([4, 4]);
        let solid = Grid::<f64, 2, DenseBackend<f64, 2>>::new(shape, 10.0);
        let mut particles = ParticleSet::<2>::new();
        particles.push(Particle::new([-1.0, 10.0], [0.0, 0.0], 1.0, 0.1));
        resolve_collisions(&mut particles, &solid, 1.0);
        assert_eq!(particles.get(0).position, [0.0, 4.0]);
    }
}
