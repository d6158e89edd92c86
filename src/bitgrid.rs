//! Bit (mask-only) grid variant (§4.1.4).
//!
//! `BitGrid<N, B>` is `Grid<(), N, B>` plus `erode`, the morphological
//! opposite of `dilate`. `Vec<()>` in the backend payload array costs no
//! allocation, so the bit variant really does elide payload storage.

use crate::backend::GridBackend;
use crate::grid::Grid;
use crate::shape::{face_neighbor_offsets, Shape};

pub struct BitGrid<const N: usize, B: GridBackend<(), N>> {
    inner: Grid<(), N, B>,
}

impl<const N: usize, B: GridBackend<(), N>> BitGrid<N, B> {
    pub fn new(shape: Shape<N>) -> Self {
        BitGrid { inner: Grid::new(shape, ()) }
    }

    pub fn new_with_config(shape: Shape<N>, cfg: &crate::config::GridConfig) -> Self {
        BitGrid { inner: Grid::new_with_config(shape, (), cfg) }
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.inner = self.inner.named(name);
        self
    }

    pub fn shape(&self) -> Shape<N> {
        self.inner.shape()
    }

    pub fn count(&self) -> usize {
        self.inner.count()
    }

    pub fn is_active(&self, c: [i64; N]) -> bool {
        self.inner.is_active(c)
    }

    pub fn set(&mut self, c: [i64; N], active: bool) {
        self.inner.set(c, &mut |_, a| *a = active);
    }

    pub fn dilate(&mut self, count: u32) {
        self.inner.dilate(&mut |_, a| *a = true, count);
    }

    /// `erode(F, count)` (bit-grids only, §4.1): each active cell whose
    /// face-neighborhood contains an inactive in-bounds cell is a removal
    /// candidate; `F` decides whether it is actually cleared.
    pub fn erode(&mut self, f: &mut dyn FnMut() -> bool, count: u32) {
        let offsets = face_neighbor_offsets::<N>();
        let shape = self.shape();
        for _ in 0..count {
            let actives = self.inner.serial_actives();
            let mut candidates = Vec::new();
            for c in actives {
                let touches_boundary = offsets.iter().any(|off| {
                    let nc = crate::shape::add(c, *off);
                    !shape.in_bounds(nc) || !self.is_active(nc)
                });
                if touches_boundary {
                    candidates.push(c);
                }
            }
            for c in candidates {
                if f() {
                    self.set(c, false);
                }
            }
        }
    }

    pub fn serial_actives(&self) -> Vec<[i64; N]> {
        self.inner.serial_actives()
    }

    /// Deep copy; the fill mask is never copied (§9 resolved open question).
    pub fn copy(&mut self, other: &Self) {
        self.inner.copy(&other.inner, |_, _| {});
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dense::DenseBackend;

    type DenseBitGrid = BitGrid<2, DenseBackend<(), 2>>;

    #[test]
    fn erode_then_dilate_yields_subset_or_equal() {
        let shape = Shape::<2>::new([6, 6]);
        let mut grid = DenseBitGrid::new(shape);
        for x in 1..=4 {
            for y in 1..=4 {
                grid.set([x, y], true);
            }
        }
        let original: std::collections::HashSet<_> = grid.serial_actives().into_iter().collect();

        grid.erode(&mut || true, 1);
        grid.dilate(1);
        let after: std::collections::HashSet<_> = grid.serial_actives().into_iter().collect();
        assert!(after.is_subset(&original));
    }

    #[test]
    fn dilate_then_erode_yields_superset_or_equal() {
        let shape = Shape::<2>::new([6, 6]);
        let mut grid = DenseBitGrid::new(shape);
        grid.set([3, 3], true);
        let original: std::collections::HashSet<_> = grid.serial_actives().into_iter().collect();

        grid.dilate(1);
        grid.erode(&mut || true, 1);
        let after: std::collections::HashSet<_> = grid.serial_actives().into_iter().collect();
        assert!(original.is_subset(&after));
    }

    #[test]
    fn copy_never_propagates_fill_mask() {
        let shape = Shape::<2>::new([4, 4]);
        let mut src = DenseBitGrid::new(shape);
        src.set([1, 1], true);
        src.inner.set_as_fillable(());
        src.inner.flood_fill(|_| true);
        assert!(src.inner.is_filled([0, 0]));

        let mut dst = DenseBitGrid::new(shape);
        dst.copy(&src);
        assert!(!dst.inner.is_filled([0, 0]));
        assert_eq!(dst.count(), src.count());
    }
}
