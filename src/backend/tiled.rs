//! Flat tiled back-end (§4.1.2).
//!
//! The grid is partitioned into axis-aligned tiles of power-of-two side `Z`.
//! Missing tiles are `None` and stand for cells that are all-inactive and
//! either all-unfilled or all-filled, recorded by a per-tile fill-summary bit
//! held on the parent (not inside the absent tile).

use super::tile::TileData;
use super::GridBackend;
use crate::config::DEFAULT_TILE_SIZE;
use crate::popcount;
use crate::shape::Shape;

pub struct TiledBackend<T, const N: usize> {
    shape: Shape<N>,
    tile_size: u32,
    tile_grid: Shape<N>,
    tiles: Vec<Option<Box<TileData<T, N>>>>,
    tile_fill_bits: Vec<u64>,
    active_count: usize,
}

impl<T, const N: usize> TiledBackend<T, N> {
    pub fn with_tile_size(shape: Shape<N>, tile_size: u32) -> Self {
        assert!(tile_size.is_power_of_two(), "tile size must be a power of two");
        let mut tiles_per_axis = [0u32; N];
        for d in 0..N {
            tiles_per_axis[d] = (shape.axis(d) + tile_size - 1) / tile_size;
        }
        let tile_grid = Shape::new(tiles_per_axis);
        let num_tiles = tile_grid.product();
        TiledBackend {
            shape,
            tile_size,
            tile_grid,
            tiles: (0..num_tiles).map(|_| None).collect(),
            tile_fill_bits: vec![0u64; popcount::words_for_bits(num_tiles)],
            active_count: 0,
        }
    }

    fn split(&self, idx: usize) -> (usize, usize) {
        let coord = self.shape.decode(idx);
        let mut tile_coord = [0i64; N];
        let mut local_coord = [0i64; N];
        for d in 0..N {
            let tc = coord[d] as u32 / self.tile_size;
            tile_coord[d] = tc as i64;
            local_coord[d] = coord[d] - (tc * self.tile_size) as i64;
        }
        let tile_idx = self.tile_grid.encode(tile_coord);
        let local_shape = self.local_shape(tile_coord);
        (tile_idx, local_shape.encode(local_coord))
    }

    fn local_shape(&self, tile_coord: [i64; N]) -> Shape<N> {
        let mut extent = [0u32; N];
        for d in 0..N {
            let origin = tile_coord[d] as u32 * self.tile_size;
            extent[d] = self.tile_size.min(self.shape.axis(d) - origin);
        }
        Shape::new(extent)
    }
}

impl<T, const N: usize> GridBackend<T, N> for TiledBackend<T, N> {
    fn new(shape: Shape<N>) -> Self {
        Self::with_tile_size(shape, DEFAULT_TILE_SIZE)
    }

    fn new_with_config(shape: Shape<N>, cfg: &crate::config::GridConfig) -> Self {
        Self::with_tile_size(shape, cfg.tile_size)
    }

    fn shape(&self) -> Shape<N> {
        self.shape
    }

    fn count(&self) -> usize {
        self.active_count
    }

    fn is_active(&self, idx: usize) -> bool {
        let (tile_idx, local) = self.split(idx);
        self.tiles[tile_idx].as_ref().map_or(false, |t| t.is_active(local))
    }

    fn is_filled(&self, idx: usize) -> bool {
        let (tile_idx, local) = self.split(idx);
        match &self.tiles[tile_idx] {
            Some(t) => t.is_filled(local),
            None => popcount::check_bit(&self.tile_fill_bits, tile_idx),
        }
    }

    fn set_filled(&mut self, idx: usize, filled: bool) {
        let (tile_idx, local) = self.split(idx);
        if let Some(tile) = self.tiles[tile_idx].as_mut() {
            tile.set_filled(local, filled);
        } else if filled {
            // Allocate the tile purely to record a per-cell fill bit would be
            // wasteful for an all-inactive tile; instead, mark the whole
            // absent tile filled via the parent summary bit. This matches
            // §4.1.2: fill state of an absent tile is a single parent bit.
            popcount::set_bit(&mut self.tile_fill_bits, tile_idx);
        }
    }

    fn clear_filled(&mut self) {
        for tile in self.tiles.iter_mut().flatten() {
            tile.clear_filled();
        }
        self.tile_fill_bits.iter_mut().for_each(|w| *w = 0);
    }

    fn get(&self, idx: usize) -> Option<&T> {
        let (tile_idx, local) = self.split(idx);
        self.tiles[tile_idx].as_ref().and_then(|t| t.get(local))
    }

    fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        let (tile_idx, local) = self.split(idx);
        self.tiles[tile_idx].as_mut().and_then(|t| t.get_mut(local))
    }

    fn set(&mut self, idx: usize, f: &mut dyn FnMut(&mut Option<T>, &mut bool)) {
        let (tile_idx, local) = self.split(idx);
        let coord = self.shape.decode(idx);
        let mut tile_coord = [0i64; N];
        for d in 0..N {
            tile_coord[d] = coord[d] / self.tile_size as i64;
        }

        if self.tiles[tile_idx].is_none() {
            // Peek: does the functor even want to activate? Avoid allocating
            // a tile for a no-op `set` on an already-absent (inactive) cell.
            let mut active = false;
            let mut probe: Option<T> = None;
            f(&mut probe, &mut active);
            if !active {
                return;
            }
            let local_shape = self.local_shape(tile_coord);
            let mut tile = Box::new(TileData::new(local_shape));
            let parent_filled = popcount::check_bit(&self.tile_fill_bits, tile_idx);
            if parent_filled {
                for i in 0..local_shape.product() {
                    tile.set_filled(i, true);
                }
                popcount::clear_bit(&mut self.tile_fill_bits, tile_idx);
            }
            tile.set(local, &mut |slot, act| {
                *slot = probe.take();
                *act = active;
            });
            self.active_count += 1;
            self.tiles[tile_idx] = Some(tile);
            return;
        }

        let tile = self.tiles[tile_idx].as_mut().unwrap();
        let before = tile.active_count();
        tile.set(local, f);
        let after = tile.active_count();
        if after > before {
            self.active_count += 1;
        } else if after < before {
            self.active_count -= 1;
        }

        if after == 0 {
            let parent_fill_bit = popcount::check_bit(&self.tile_fill_bits, tile_idx);
            if tile.is_deletable(parent_fill_bit) {
                self.tiles[tile_idx] = None;
            }
        }
    }

    fn serial_active_indices(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.active_count);
        for tile_idx in 0..self.tiles.len() {
            let Some(tile) = &self.tiles[tile_idx] else { continue };
            let tile_coord = self.tile_grid.decode(tile_idx);
            let local_shape = tile.shape();
            let mut origin = [0i64; N];
            for d in 0..N {
                origin[d] = tile_coord[d] * self.tile_size as i64;
            }
            for local in tile.serial_active_indices() {
                let local_coord = local_shape.decode(local);
                let mut global_coord = [0i64; N];
                for d in 0..N {
                    global_coord[d] = origin[d] + local_coord[d];
                }
                out.push(self.shape.encode(global_coord));
            }
        }
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_tile_reports_parent_fill_bit() {
        let shape = Shape::<2>::new([32, 32]);
        let mut backend = TiledBackend::<i32, 2>::with_tile_size(shape, 16);
        let idx = shape.encode([20, 20]);
        assert!(!backend.is_filled(idx));
        backend.set_filled(idx, true);
        assert!(backend.is_filled(idx));
        assert!(backend.tiles.iter().all(|t| t.is_none()));
    }

    #[test]
    fn tile_allocated_lazily_on_activation_only() {
        let shape = Shape::<2>::new([32, 32]);
        let mut backend = TiledBackend::<i32, 2>::with_tile_size(shape, 16);
        // A deactivating no-op set on an absent tile must not allocate.
        backend.set(shape.encode([5, 5]), &mut |_, active| *active = false);
        assert!(backend.tiles.iter().all(|t| t.is_none()));

        backend.set(shape.encode([5, 5]), &mut |slot, active| {
            *slot = Some(1);
            *active = true;
        });
        assert_eq!(backend.count(), 1);
        assert!(backend.tiles.iter().any(|t| t.is_some()));
    }

    #[test]
    fn boundary_tile_is_clamped() {
        let shape = Shape::<2>::new([20, 20]);
        let backend = TiledBackend::<i32, 2>::with_tile_size(shape, 16);
        // Tile grid is ceil(20/16) = 2 per axis; the last tile covers only 4
        // cells along each clamped axis.
        assert_eq!(backend.tile_grid.extent(), [2, 2]);
    }

    #[test]
    fn freed_after_last_deactivation() {
        let shape = Shape::<2>::new([32, 32]);
        let mut backend = TiledBackend::<i32, 2>::with_tile_size(shape, 16);
        let idx = shape.encode([5, 5]);
        backend.set(idx, &mut |slot, active| {
            *slot = Some(1);
            *active = true;
        });
        backend.set(idx, &mut |_, active| *active = false);
        assert_eq!(backend.count(), 0);
        let tile_idx = backend.split(idx).0;
        assert!(backend.tiles[tile_idx].is_none());
    }
}
