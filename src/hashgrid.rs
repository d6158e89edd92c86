//! Point-grid hash collaborator (§4.7).
//!
//! Buckets particle positions into grid cells so splat/correction/reseed
//! can enumerate only the particles near a queried cell or face, instead of
//! scanning the whole particle array.

use std::collections::HashMap;

use crate::shape::Coord;

/// Neighbor query mode: `CellOnly` returns the 3^N block around a cell;
/// `FaceAxis(d)` returns the `2*3^N` block straddling the face of axis `d`.
#[derive(Debug, Clone, Copy)]
pub enum NeighborMode {
    Cell,
    Face(usize),
}

pub trait PointHash<const N: usize> {
    fn sort_points(&mut self, positions: &[[f64; N]]);
    fn points_in_cell(&self, cell: Coord<N>) -> &[u32];
    fn cell_neighbors(&self, cell: Coord<N>, mode: NeighborMode) -> Vec<u32>;
}

/// Cell-size-keyed hash grid: a simple, testable `PointHash` implementation.
/// Buckets are a `HashMap` rather than a dense array since particle
/// distributions are sparse relative to the domain (narrowband-only).
pub struct CellHashGrid<const N: usize> {
    cell_size: f64,
    buckets: HashMap<Coord<N>, Vec<u32>>,
}

impl<const N: usize> CellHashGrid<N> {
    pub fn new(cell_size: f64) -> Self {
        CellHashGrid { cell_size, buckets: HashMap::new() }
    }

    fn cell_of(&self, p: [f64; N]) -> Coord<N> {
        let mut c = [0i64; N];
        for d in 0..N {
            c[d] = (p[d] / self.cell_size).floor() as i64;
        }
        c
    }

    fn empty_slice<'a>() -> &'a [u32] {
        &[]
    }
}

impl<const N: usize> PointHash<N> for CellHashGrid<N> {
    fn sort_points(&mut self, positions: &[[f64; N]]) {
        self.buckets.clear();
        for (i, &p) in positions.iter().enumerate() {
            self.buckets.entry(self.cell_of(p)).or_default().push(i as u32);
        }
    }

    fn points_in_cell(&self, cell: Coord<N>) -> &[u32] {
        self.buckets.get(&cell).map(|v| v.as_slice()).unwrap_or_else(Self::empty_slice)
    }

    fn cell_neighbors(&self, cell: Coord<N>, mode: NeighborMode) -> Vec<u32> {
        let mut offsets: Vec<Coord<N>> = Vec::new();
        let axis_range = match mode {
            NeighborMode::Cell => 0..1,
            NeighborMode::Face(_) => 0..2,
        };
        // Enumerate the 3^N (or 2*3^N for a face query) neighborhood by
        // mixed-radix counting over {-1,0,1}^N, doubled along the queried
        // face's axis for `Face`.
        for face_side in axis_range {
            let total = 3usize.pow(N as u32);
            for code in 0..total {
                let mut rem = code;
                let mut off = [0i64; N];
                for d in 0..N {
                    let digit = rem % 3;
                    rem /= 3;
                    off[d] = digit as i64 - 1;
                }
                if let NeighborMode::Face(axis) = mode {
                    off[axis] += face_side as i64;
                }
                offsets.push(off);
            }
        }

        let mut out = Vec::new();
        for off in offsets {
            let mut nc = [0i64; N];
            for d in 0..N {
                nc[d] = cell[d] + off[d];
            }
            out.extend_from_slice(self.points_in_cell(nc));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_and_query_cell() {
        let mut hg = CellHashGrid::<2>::new(1.0);
        hg.sort_points(&[[0.1, 0.1], [0.9, 0.9], [5.0, 5.0]]);
        assert_eq!(hg.points_in_cell([0, 0]).len(), 2);
        assert_eq!(hg.points_in_cell([5, 5]).len(), 1);
        assert!(hg.points_in_cell([9, 9]).is_empty());
    }

    #[test]
    fn cell_neighbors_covers_3x3_block() {
        let mut hg = CellHashGrid::<2>::new(1.0);
        hg.sort_points(&[[0.0, 0.0], [1.1, 0.0], [-0.9, 0.0]]);
        let found = hg.cell_neighbors([0, 0], NeighborMode::Cell);
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn face_neighbors_cover_double_width_block() {
        let mut hg = CellHashGrid::<2>::new(1.0);
        hg.sort_points(&[[0.0, 0.0], [2.1, 0.0]]);
        let cell_only = hg.cell_neighbors([0, 0], NeighborMode::Cell).len();
        let face = hg.cell_neighbors([0, 0], NeighborMode::Face(0)).len();
        assert!(face >= cell_only);
    }
}
