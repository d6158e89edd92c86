//! Dense linear back-end (§4.1.1).
//!
//! One contiguous payload buffer plus a single active bit-mask; the filled
//! mask is allocated lazily on first use since most grids never flood-fill.
//! `set`/`get` are O(1) via the standard `x + y*W (+ z*W*H)` encoding.

use super::GridBackend;
use crate::popcount;
use crate::shape::Shape;

pub struct DenseBackend<T, const N: usize> {
    shape: Shape<N>,
    payload: Vec<Option<T>>,
    active_words: Vec<u64>,
    fill_words: Option<Vec<u64>>,
    active_count: usize,
}

impl<T, const N: usize> GridBackend<T, N> for DenseBackend<T, N> {
    fn new(shape: Shape<N>) -> Self {
        let n = shape.product();
        DenseBackend {
            shape,
            payload: (0..n).map(|_| None).collect(),
            active_words: vec![0u64; popcount::words_for_bits(n)],
            fill_words: None,
            active_count: 0,
        }
    }

    fn shape(&self) -> Shape<N> {
        self.shape
    }

    fn count(&self) -> usize {
        self.active_count
    }

    fn is_active(&self, idx: usize) -> bool {
        popcount::check_bit(&self.active_words, idx)
    }

    fn is_filled(&self, idx: usize) -> bool {
        match &self.fill_words {
            Some(w) => popcount::check_bit(w, idx),
            None => false,
        }
    }

    fn set_filled(&mut self, idx: usize, filled: bool) {
        if filled {
            let words = self
                .fill_words
                .get_or_insert_with(|| vec![0u64; popcount::words_for_bits(self.shape.product())]);
            popcount::set_bit(words, idx);
        } else if let Some(words) = &mut self.fill_words {
            popcount::clear_bit(words, idx);
        }
    }

    fn clear_filled(&mut self) {
        self.fill_words = None;
    }

    fn get(&self, idx: usize) -> Option<&T> {
        if self.is_active(idx) {
            self.payload[idx].as_ref()
        } else {
            None
        }
    }

    fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        if popcount::check_bit(&self.active_words, idx) {
            self.payload[idx].as_mut()
        } else {
            None
        }
    }

    fn set(&mut self, idx: usize, f: &mut dyn FnMut(&mut Option<T>, &mut bool)) {
        let was_active = self.is_active(idx);
        let mut active = was_active;
        f(&mut self.payload[idx], &mut active);
        if active && !was_active {
            popcount::set_bit(&mut self.active_words, idx);
            self.active_count += 1;
        } else if !active && was_active {
            popcount::clear_bit(&mut self.active_words, idx);
            self.payload[idx] = None;
            self.active_count -= 1;
        }
    }

    fn serial_active_indices(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.active_count);
        for (word_idx, &word) in self.active_words.iter().enumerate() {
            if word == 0 {
                continue;
            }
            let mut w = word;
            while w != 0 {
                let bit = w.trailing_zeros() as usize;
                out.push(word_idx * 64 + bit);
                w &= w - 1;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_grid_round_trip_scenario() {
        // §8 scenario 1: 4x4 int grid, background handled by the Grid
        // front-end; here we only check the backend's raw active/payload
        // contract.
        let shape = Shape::<2>::new([4, 4]);
        let mut backend = DenseBackend::<i32, 2>::new(shape);
        let i11 = shape.encode([1, 1]);
        let i23 = shape.encode([2, 3]);
        backend.set(i11, &mut |slot, active| {
            *slot = Some(7);
            *active = true;
        });
        backend.set(i23, &mut |slot, active| {
            *slot = Some(-3);
            *active = true;
        });
        assert_eq!(backend.count(), 2);
        assert_eq!(backend.get(i11), Some(&7));
        assert_eq!(backend.get(i23), Some(&-3));
        assert_eq!(backend.get(shape.encode([0, 0])), None);
    }

    #[test]
    fn active_indices_are_ascending() {
        let shape = Shape::<2>::new([4, 4]);
        let mut backend = DenseBackend::<i32, 2>::new(shape);
        for c in [[3, 3], [0, 0], [1, 2]] {
            let idx = shape.encode(c);
            backend.set(idx, &mut |slot, active| {
                *slot = Some(1);
                *active = true;
            });
        }
        let indices = backend.serial_active_indices();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
    }
}
