//! Grid→particle velocity update (§4.6.10).

use crate::backend::GridBackend;
use crate::collaborators::interpolate_velocity;
use crate::mac::MacGrid;

use super::particle::ParticleSet;

/// Apply the PIC/FLIP (or APIC) blend to every non-bullet particle; bullets
/// integrate purely ballistically under gravity.
#[allow(clippy::too_many_arguments)]
pub fn update_velocity<const N: usize, B: GridBackend<f64, N>>(
    particles: &mut ParticleSet<N>,
    old_velocity: &MacGrid<f64, N, B>,
    new_velocity: &MacGrid<f64, N, B>,
    dx: f64,
    dt: f64,
    gravity: [f64; N],
    pic_flip: f64,
    apic: bool,
) {
    for p in particles.iter_mut() {
        if p.bullet {
            for d in 0..N {
                p.velocity[d] += dt * gravity[d];
            }
            continue;
        }

        let new_v = interpolate_velocity(new_velocity, p.position, dx);
        if apic {
            p.velocity = new_v;
            recompute_affine(p, new_velocity, dx);
        } else {
            let old_v = interpolate_velocity(old_velocity, p.position, dx);
            for d in 0..N {
                let flip_component = p.velocity[d] + new_v[d] - old_v[d];
                p.velocity[d] = pic_flip * flip_component + (1.0 - pic_flip) * new_v[d];
            }
        }
    }
}

/// Recompute a particle's affine-velocity vectors from the surrounding
/// velocity field, matching the finite-difference layout used by APIC.
fn recompute_affine<const N: usize, B: GridBackend<f64, N>>(
    p: &mut super::particle::Particle<N>,
    velocity: &MacGrid<f64, N, B>,
    dx: f64,
) {
    let jac = crate::collaborators::velocity_jacobian(velocity, p.position, dx);
    p.affine = jac;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dense::DenseBackend;
    use crate::flip::particle::Particle;
    use crate::shape::Shape;

    #[test]
    fn full_flip_preserves_particle_velocity_when_grid_unchanged() {
        let shape = Shape::<2>::new([4, 4]);
        let old_v = MacGrid::<f64, 2, DenseBackend<f64, 2>>::new(shape);
        let new_v = MacGrid::<f64, 2, DenseBackend<f64, 2>>::new(shape);
        let mut particles = ParticleSet::<2>::new();
        particles.push(Particle::new([1.0, 1.0], [1.0, 2.0], 1.0, 0.1));
        update_velocity(&mut particles, &old_v, &new_v, 1.0, 0.1, [0.0, -9.8], 1.0, false);
        // Both grids are empty/inactive everywhere, so interpolation yields
        // 0 and the FLIP delta preserves the original particle velocity.
        assert_eq!(particles.get(0).velocity, [1.0, 2.0]);
    }
}
