//! Dense leaf block shared by the flat-tiled and recursive-tree back-ends
//! (§4.1.2, §4.1.3). A tile is itself a tiny dense grid: a local payload
//! array plus active/fill bit-masks sized to the tile's own (possibly
//! boundary-clamped) shape.

use crate::popcount;
use crate::shape::Shape;

pub struct TileData<T, const N: usize> {
    shape: Shape<N>,
    payload: Vec<Option<T>>,
    active_words: Vec<u64>,
    fill_words: Option<Vec<u64>>,
    active_count: usize,
}

impl<T, const N: usize> TileData<T, N> {
    pub fn new(shape: Shape<N>) -> Self {
        let n = shape.product();
        TileData {
            shape,
            payload: (0..n).map(|_| None).collect(),
            active_words: vec![0u64; popcount::words_for_bits(n)],
            fill_words: None,
            active_count: 0,
        }
    }

    #[inline]
    pub fn shape(&self) -> Shape<N> {
        self.shape
    }

    #[inline]
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// True once every cell in the tile is either inactive or unfilled, i.e.
    /// the tile carries no information the parent couldn't represent with a
    /// single summary bit (§4.1.2: "deletability detection").
    pub fn is_deletable(&self, parent_fill_bit: bool) -> bool {
        self.active_count == 0 && !parent_fill_bit && self.fill_words.is_none()
    }

    #[inline]
    pub fn is_active(&self, local: usize) -> bool {
        popcount::check_bit(&self.active_words, local)
    }

    #[inline]
    pub fn is_filled(&self, local: usize) -> bool {
        match &self.fill_words {
            Some(w) => popcount::check_bit(w, local),
            None => false,
        }
    }

    pub fn set_filled(&mut self, local: usize, filled: bool) {
        if filled {
            let words = self
                .fill_words
                .get_or_insert_with(|| vec![0u64; popcount::words_for_bits(self.shape.product())]);
            popcount::set_bit(words, local);
        } else if let Some(words) = &mut self.fill_words {
            popcount::clear_bit(words, local);
        }
    }

    pub fn clear_filled(&mut self) {
        self.fill_words = None;
    }

    #[inline]
    pub fn get(&self, local: usize) -> Option<&T> {
        if self.is_active(local) {
            self.payload[local].as_ref()
        } else {
            None
        }
    }

    #[inline]
    pub fn get_mut(&mut self, local: usize) -> Option<&mut T> {
        if popcount::check_bit(&self.active_words, local) {
            self.payload[local].as_mut()
        } else {
            None
        }
    }

    /// Apply the activation functor to local index `local`. Returns the
    /// active state after the call, for the caller to fold into its own
    /// active-count/mask bookkeeping.
    pub fn set(&mut self, local: usize, f: &mut dyn FnMut(&mut Option<T>, &mut bool)) {
        let mut active = self.is_active(local);
        let was_active = active;
        f(&mut self.payload[local], &mut active);
        if active && !was_active {
            popcount::set_bit(&mut self.active_words, local);
            self.active_count += 1;
        } else if !active && was_active {
            popcount::clear_bit(&mut self.active_words, local);
            self.payload[local] = None;
            self.active_count -= 1;
        }
    }

    /// Ascending local indices of every active cell.
    pub fn serial_active_indices(&self) -> Vec<usize> {
        (0..self.shape.product()).filter(|&i| self.is_active(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_initializes_and_deactivation_drops() {
        let mut tile = TileData::<i32, 2>::new(Shape::new([4, 4]));
        tile.set(5, &mut |slot, active| {
            *slot = Some(7);
            *active = true;
        });
        assert_eq!(tile.get(5), Some(&7));
        assert_eq!(tile.active_count(), 1);

        tile.set(5, &mut |_slot, active| {
            *active = false;
        });
        assert_eq!(tile.get(5), None);
        assert_eq!(tile.active_count(), 0);
    }

    #[test]
    fn deletable_once_empty_and_unfilled() {
        let tile = TileData::<i32, 2>::new(Shape::new([4, 4]));
        assert!(tile.is_deletable(false));
        assert!(!tile.is_deletable(true));
    }
}
