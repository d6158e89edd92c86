//! MAC (marker-and-cell) staggered grid (§4.2).
//!
//! An ordered tuple of `N` scalar grids, axis `d` shaped `S.face(d)`. The
//! value at coordinate `c` on grid `d` lives on the face of cell `c`
//! perpendicular to axis `d`.

use crate::backend::GridBackend;
use crate::grid::Grid;
use crate::parallel::{for_each_axis, ParallelDriver};
use crate::shape::Shape;

pub struct MacGrid<T, const N: usize, B: GridBackend<T, N>> {
    axes: Vec<Grid<T, N, B>>,
    cell_shape: Shape<N>,
}

impl<T: Clone + PartialEq + Default, const N: usize, B: GridBackend<T, N>> MacGrid<T, N, B> {
    pub fn new(cell_shape: Shape<N>) -> Self {
        let axes = (0..N).map(|d| Grid::new(cell_shape.face(d), T::default())).collect();
        MacGrid { axes, cell_shape }
    }

    pub fn cell_shape(&self) -> Shape<N> {
        self.cell_shape
    }

    pub fn axis(&self, d: usize) -> &Grid<T, N, B> {
        &self.axes[d]
    }

    pub fn axis_mut(&mut self, d: usize) -> &mut Grid<T, N, B> {
        &mut self.axes[d]
    }

    /// Broadcast `op` across every axis grid, one task per axis, run
    /// concurrently when the driver allows it (§4.2).
    pub fn for_each_axis_mut(&mut self, parallel: &dyn ParallelDriver, op: impl Fn(usize, &mut Grid<T, N, B>) + Sync) {
        // Run axes' independent grids with disjoint `&mut` access, one per
        // task; safe because each closure only ever touches its own index.
        // SAFETY: `for_each_axis` calls this closure once per `d` in `0..N`,
        // each indexing a distinct element of `axes`, so no two invocations
        // alias.
        let axes_ptr = unsafe { crate::parallel::DisjointMutPtr::new(self.axes.as_mut_ptr()) };
        for_each_axis::<N>(parallel, &|d, _thread| {
            let grid = unsafe { &mut *axes_ptr.get().add(d) };
            op(d, grid);
        });
    }

    /// Average face values to cell-centered vectors; only cells with all
    /// `2N` faces active are populated.
    pub fn convert_to_full_cell(&self, out: &mut Vec<Option<[T; N]>>)
    where
        T: std::ops::Add<Output = T> + std::ops::Div<f64, Output = T> + Copy,
    {
        out.clear();
        out.resize(self.cell_shape.product(), None);
        for idx in 0..self.cell_shape.product() {
            let c = self.cell_shape.decode(idx);
            let mut components = [T::default(); N];
            let mut all_active = true;
            for d in 0..N {
                let lo = c;
                let mut hi = c;
                hi[d] += 1;
                if !self.axes[d].is_active(lo) || !self.axes[d].is_active(hi) {
                    all_active = false;
                    break;
                }
                let a = *self.axes[d].get(lo).0.unwrap();
                let b = *self.axes[d].get(hi).0.unwrap();
                components[d] = (a + b) / 2.0;
            }
            if all_active {
                out[idx] = Some(components);
            }
        }
    }

    /// Expand to a per-face N-vector: the queried axis comes straight from
    /// the face value, the other `N-1` components are averaged from the
    /// 4-neighbor block of cell-centered values straddling that face,
    /// clamped at domain boundaries (§4.2).
    pub fn convert_to_full_face(&self, axis: usize, out: &mut Vec<Option<[T; N]>>)
    where
        T: std::ops::Add<Output = T> + std::ops::Div<f64, Output = T> + Copy,
    {
        let face_shape = self.axes[axis].shape();
        out.clear();
        out.resize(face_shape.product(), None);

        for idx in 0..face_shape.product() {
            let face_c = face_shape.decode(idx);
            if !self.axes[axis].is_active(face_c) {
                continue;
            }
            let mut components = [T::default(); N];
            components[axis] = *self.axes[axis].get(face_c).0.unwrap();

            for other in 0..N {
                if other == axis {
                    continue;
                }
                // The two cells sharing this face along `other`, each offset
                // by a half-step, sampled from the `other` axis's own face
                // grid at the two faces straddling `face_c` and clamped to
                // stay in bounds at the domain edge.
                let mut lo = face_c;
                let mut hi = face_c;
                if face_c[other] > 0 {
                    lo[other] -= 1;
                }
                let other_shape = self.axes[other].shape();
                if hi[other] + 1 >= other_shape.axis(other) as i64 {
                    // already at the far edge; sample in place below
                } else {
                    hi[other] += 1;
                }

                let a = if self.axes[other].shape().in_bounds(lo) && self.axes[other].is_active(lo) {
                    Some(*self.axes[other].get(lo).0.unwrap())
                } else {
                    None
                };
                let b = if self.axes[other].shape().in_bounds(hi) && self.axes[other].is_active(hi) {
                    Some(*self.axes[other].get(hi).0.unwrap())
                } else {
                    None
                };
                components[other] = match (a, b) {
                    (Some(a), Some(b)) => (a + b) / 2.0,
                    (Some(a), None) => a,
                    (None, Some(b)) => b,
                    (None, None) => T::default(),
                };
            }
            out[idx] = Some(components);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dense::DenseBackend;

    type DenseMac = MacGrid<f64, 3, DenseBackend<f64, 3>>;

    #[test]
    fn face_shapes_match_scenario_4() {
        // §8 scenario 4.
        let cell_shape = Shape::<3>::new([4, 5, 6]);
        let mac = DenseMac::new(cell_shape);
        assert_eq!(mac.axis(0).shape().extent(), [5, 5, 6]);
        assert_eq!(mac.axis(1).shape().extent(), [4, 6, 6]);
        assert_eq!(mac.axis(2).shape().extent(), [4, 5, 7]);
    }

    #[test]
    fn writing_axis_zero_does_not_change_other_axes() {
        let cell_shape = Shape::<3>::new([4, 5, 6]);
        let mut mac = DenseMac::new(cell_shape);
        mac.axis_mut(0).set([0, 0, 0], &mut |slot, a| {
            *slot = Some(1.0);
            *a = true;
        });
        assert!(mac.axis(0).is_active([0, 0, 0]));
        assert!(!mac.axis(1).is_active([0, 0, 0]));
        assert!(!mac.axis(2).is_active([0, 0, 0]));
    }

    #[test]
    fn convert_to_full_face_only_reports_active_faces() {
        let cell_shape = Shape::<3>::new([4, 5, 6]);
        let mut mac = DenseMac::new(cell_shape);
        mac.axis_mut(0).set([1, 1, 1], &mut |slot, a| {
            *slot = Some(2.0);
            *a = true;
        });
        let mut out = Vec::new();
        mac.convert_to_full_face(0, &mut out);
        let face_shape = mac.axis(0).shape();
        let active_idx = face_shape.encode([1, 1, 1]);
        assert!(out[active_idx].is_some());
        assert_eq!(out[active_idx].unwrap()[0], 2.0);
        let inactive_idx = face_shape.encode([0, 0, 0]);
        assert!(out[inactive_idx].is_none());
    }
}
