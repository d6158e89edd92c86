//! External collaborator interfaces (§4.7, §1 "out of scope").
//!
//! Physics modules, the advection scheme, level-set redistancing, particle
//! rasterization, and surface tracking are production concerns owned by
//! sibling crates; this crate only specifies the trait boundary it calls
//! through, plus the handful of MAC utility functions (interpolation,
//! max-velocity reduction, velocity Jacobian) simple enough to own directly.

use crate::backend::GridBackend;
use crate::mac::MacGrid;

/// Advances a MAC velocity field by one step of the external advection
/// scheme (semi-Lagrangian, BFECC, etc. — not this crate's concern).
pub trait Advector<T, const N: usize, B: GridBackend<T, N>> {
    fn advect(&self, velocity: &mut MacGrid<T, N, B>, dt: f64);
}

/// Advances a scalar field (the fluid level-set) through a MAC velocity
/// field, distinct from `Advector` because the field being carried and the
/// field doing the carrying are no longer the same grid (§4.6.6).
pub trait ScalarAdvector<T, const N: usize, B: GridBackend<T, N>> {
    fn advect_scalar(&self, field: &mut crate::grid::Grid<T, N, B>, velocity: &MacGrid<T, N, B>, dt: f64);
}

/// Re-establishes signed-distance property of a level-set grid.
pub trait Redistancer<T, const N: usize, B: GridBackend<T, N>> {
    fn redistance(&self, levelset: &mut crate::grid::Grid<T, N, B>);
}

/// Rasterizes a particle cloud into a level-set grid.
pub trait Rasterizer<const N: usize, T, B: GridBackend<T, N>> {
    fn rasterize(&self, positions: &[[f64; N]], radii: &[f64], out: &mut crate::grid::Grid<T, N, B>);
}

/// Tracks/extracts an explicit surface (mesh) from a level-set; exposed only
/// as a trait boundary, no implementation is specified here.
pub trait SurfaceTracker<T, const N: usize, B: GridBackend<T, N>> {
    fn track(&self, levelset: &crate::grid::Grid<T, N, B>);
}

/// Trilinear (bilinear in 2D) hat kernel and its gradient (§4.6.1), used by
/// both the collaborator traits above and the FLIP core's own splat/update.
pub fn hat_kernel<const N: usize>(r: [f64; N], dx: f64) -> f64 {
    r.iter().map(|&d| (1.0 - (d / dx).abs()).max(0.0)).product()
}

pub fn hat_kernel_gradient<const N: usize>(r: [f64; N], dx: f64) -> [f64; N] {
    let mut grad = [0.0f64; N];
    for d in 0..N {
        let mut partial = 1.0f64;
        for e in 0..N {
            if e == d {
                continue;
            }
            partial *= (1.0 - (r[e] / dx).abs()).max(0.0);
        }
        // The hat kernel peaks at r_d=0, so its derivative has a sign flip
        // there; the subgradient convention used here is 0 at the center
        // (the average of the left/right derivatives) rather than picking a
        // side arbitrarily.
        let sign = if r[d] > 0.0 {
            -1.0
        } else if r[d] < 0.0 {
            1.0
        } else {
            0.0
        };
        let inside = (r[d] / dx).abs() < 1.0;
        grad[d] = if inside { sign * partial / dx } else { 0.0 };
    }
    grad
}

/// Interpolate a MAC velocity field at world position `p` (cell size `dx`),
/// one axis at a time via the hat kernel over the axis grid's face cells.
pub fn interpolate_velocity<const N: usize, B: GridBackend<f64, N>>(
    velocity: &MacGrid<f64, N, B>,
    p: [f64; N],
    dx: f64,
) -> [f64; N] {
    let mut out = [0.0f64; N];
    for d in 0..N {
        let grid = velocity.axis(d);
        let shape = grid.shape();
        let face_p = p;
        let mut base = [0i64; N];
        for e in 0..N {
            base[e] = (face_p[e] / dx).floor() as i64;
        }
        let mut weight_sum = 0.0;
        let mut value_sum = 0.0;
        let corners = 1usize << N;
        for corner in 0..corners {
            let mut c = base;
            let mut rel = [0.0f64; N];
            for e in 0..N {
                if (corner >> e) & 1 == 1 {
                    c[e] += 1;
                }
                rel[e] = face_p[e] - (c[e] as f64) * dx;
            }
            if !shape.in_bounds(c) {
                continue;
            }
            if let (Some(v), _) = grid.get(c) {
                let w = hat_kernel(rel, dx);
                weight_sum += w;
                value_sum += w * v;
            }
        }
        out[d] = if weight_sum > 0.0 { value_sum / weight_sum } else { 0.0 };
    }
    out
}

/// Reduction over every active face of a MAC grid returning `max|u|`, used
/// to size the level-set advection dilation band (§4.6.6).
pub fn max_velocity_magnitude<const N: usize, B: GridBackend<f64, N>>(velocity: &MacGrid<f64, N, B>) -> f64 {
    let mut max_abs = 0.0f64;
    for d in 0..N {
        for c in velocity.axis(d).serial_actives() {
            let (v, _) = velocity.axis(d).get(c);
            if let Some(v) = v {
                max_abs = max_abs.max(v.abs());
            }
        }
    }
    max_abs
}

/// Finite-difference velocity Jacobian at `p`, used by APIC moment recovery
/// and by position-correction's optional velocity feedback (§4.6.5).
pub fn velocity_jacobian<const N: usize, B: GridBackend<f64, N>>(
    velocity: &MacGrid<f64, N, B>,
    p: [f64; N],
    dx: f64,
) -> [[f64; N]; N] {
    let mut jac = [[0.0f64; N]; N];
    let h = dx * 0.5;
    for axis in 0..N {
        let mut plus = p;
        let mut minus = p;
        plus[axis] += h;
        minus[axis] -= h;
        let vp = interpolate_velocity(velocity, plus, dx);
        let vm = interpolate_velocity(velocity, minus, dx);
        for d in 0..N {
            jac[d][axis] = (vp[d] - vm[d]) / (2.0 * h);
        }
    }
    jac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hat_kernel_is_one_at_center() {
        assert_eq!(hat_kernel([0.0, 0.0], 1.0), 1.0);
    }

    #[test]
    fn hat_kernel_is_zero_past_one_cell() {
        assert_eq!(hat_kernel([1.5, 0.0], 1.0), 0.0);
    }

    #[test]
    fn hat_kernel_gradient_is_zero_at_center_off_axis() {
        let g = hat_kernel_gradient([0.0, 0.0], 1.0);
        assert_eq!(g[0], 0.0);
        assert_eq!(g[1], 0.0);
    }
}
