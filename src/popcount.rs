//! Bit-population count helper (§4.5).
//!
//! Leaf utility, correct under concurrent read-only access (it only reads),
//! with an optional parallel driver for chunked summation over large masks.
//! Mirrors the teacher's word-at-a-time bitset convention (`bitset.rs`): one
//! `u64` covers 64 cells, `count_ones` does the per-word work.

use crate::parallel::ParallelDriver;

/// Count set bits across the whole mask, serially.
#[inline]
pub fn count_set_bits(words: &[u64]) -> usize {
    words.iter().map(|w| w.count_ones() as usize).sum()
}

/// Count set bits, splitting the word array into chunks processed by the
/// parallel driver and reduced on return.
pub fn count_set_bits_parallel(words: &[u64], parallel: &dyn ParallelDriver) -> usize {
    if words.is_empty() {
        return 0;
    }
    let threads = parallel.num_threads().max(1);
    let chunk = (words.len() + threads - 1) / threads;
    let num_chunks = (words.len() + chunk - 1) / chunk;
    let partials = std::sync::Mutex::new(vec![0usize; num_chunks]);
    parallel.for_each(num_chunks, &|i, _thread| {
        let start = i * chunk;
        let end = (start + chunk).min(words.len());
        let sum = count_set_bits(&words[start..end]);
        partials.lock().unwrap()[i] = sum;
    });
    partials.into_inner().unwrap().into_iter().sum()
}

/// Set bit `idx` within a tightly packed word array, no-op if out of range.
#[inline]
pub fn set_bit(words: &mut [u64], idx: usize) {
    let word = idx >> 6;
    let bit = idx & 63;
    if word < words.len() {
        words[word] |= 1u64 << bit;
    }
}

/// Clear bit `idx`, no-op if out of range.
#[inline]
pub fn clear_bit(words: &mut [u64], idx: usize) {
    let word = idx >> 6;
    let bit = idx & 63;
    if word < words.len() {
        words[word] &= !(1u64 << bit);
    }
}

/// Test bit `idx`; out of range reads as unset.
#[inline]
pub fn check_bit(words: &[u64], idx: usize) -> bool {
    let word = idx >> 6;
    let bit = idx & 63;
    word < words.len() && (words[word] & (1u64 << bit)) != 0
}

/// Number of `u64` words needed to store `num_bits` bits.
#[inline]
pub fn words_for_bits(num_bits: usize) -> usize {
    (num_bits + 63) / 64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SerialDriver;

    #[test]
    fn counts_scattered_bits() {
        let mut words = vec![0u64; 3];
        set_bit(&mut words, 0);
        set_bit(&mut words, 63);
        set_bit(&mut words, 64);
        set_bit(&mut words, 130);
        assert_eq!(count_set_bits(&words), 4);
    }

    #[test]
    fn parallel_matches_serial() {
        let mut words = vec![0u64; 20];
        for i in (0..20 * 64).step_by(7) {
            set_bit(&mut words, i);
        }
        let serial = count_set_bits(&words);
        let parallel = count_set_bits_parallel(&words, &SerialDriver);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn clear_bit_reverses_set_bit() {
        let mut words = vec![0u64; 1];
        set_bit(&mut words, 5);
        assert!(check_bit(&words, 5));
        clear_bit(&mut words, 5);
        assert!(!check_bit(&words, 5));
    }

    #[test]
    fn out_of_range_is_noop_not_panic() {
        let mut words = vec![0u64; 1];
        set_bit(&mut words, 1000);
        assert!(!check_bit(&words, 1000));
    }
}
