//! Shared grid pool (§4.3).
//!
//! A process-wide keyed cache of transient grid instances, so the FLIP core
//! can borrow scratch grids (a widened level-set, a splat buffer) instead of
//! reallocating one per step. Keyed by `(shape, element size, back-end name,
//! type)`; guarded by a `Mutex` per §5 ("serializes borrow/return").

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    extent: Vec<u32>,
    element_size: usize,
    backend_name: &'static str,
    type_id: TypeId,
}

struct Slot {
    value: Box<dyn Any + Send>,
    idle: bool,
}

/// Process-wide pool. One instance is typically stored behind a `static` or
/// passed down from the solver; it has no size cap and is purely a reuse
/// cache (§4.3).
#[derive(Default)]
pub struct GridPool {
    slots: Mutex<HashMap<PoolKey, Vec<Slot>>>,
}

impl GridPool {
    pub fn new() -> Self {
        GridPool { slots: Mutex::new(HashMap::new()) }
    }

    /// Borrow an idle instance matching `key`, or call `alloc_fn` to create
    /// one. The returned `PooledGrid` marks the slot idle again on drop.
    pub fn borrow<T: Any + Send + 'static>(
        &self,
        extent: &[u32],
        element_size: usize,
        backend_name: &'static str,
        alloc_fn: impl FnOnce() -> T,
    ) -> PooledGrid<T> {
        let key = PoolKey { extent: extent.to_vec(), element_size, backend_name, type_id: TypeId::of::<T>() };
        let mut slots = self.slots.lock().unwrap();
        let bucket = slots.entry(key.clone()).or_default();
        if let Some(pos) = bucket.iter().position(|s| s.idle) {
            bucket[pos].idle = false;
            let value = std::mem::replace(&mut bucket[pos].value, Box::new(())).downcast::<T>();
            let value = match value {
                Ok(v) => *v,
                Err(_) => unreachable!("pool key/type mismatch"),
            };
            return PooledGrid { value: Some(value), key, pool: self };
        }
        drop(slots);
        let value = alloc_fn();
        PooledGrid { value: Some(value), key, pool: self }
    }

    fn put_back<T: Any + Send + 'static>(&self, key: PoolKey, value: T) {
        let mut slots = self.slots.lock().unwrap();
        let bucket = slots.entry(key).or_default();
        bucket.push(Slot { value: Box::new(value), idle: true });
    }

    /// Drop every pooled instance, in-use or idle.
    pub fn clear(&self) {
        self.slots.lock().unwrap().clear();
    }

    pub fn idle_count(&self) -> usize {
        self.slots.lock().unwrap().values().map(|b| b.iter().filter(|s| s.idle).count()).sum()
    }
}

/// RAII borrow from a [`GridPool`]. Returns the grid to the pool (marked
/// idle) when dropped.
pub struct PooledGrid<'a, T: Any + Send + 'static> {
    value: Option<T>,
    key: PoolKey,
    pool: &'a GridPool,
}

impl<'a, T: Any + Send + 'static> std::ops::Deref for PooledGrid<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value.as_ref().unwrap()
    }
}

impl<'a, T: Any + Send + 'static> std::ops::DerefMut for PooledGrid<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().unwrap()
    }
}

impl<'a, T: Any + Send + 'static> Drop for PooledGrid<'a, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.put_back(self.key.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrow_reuses_returned_instance() {
        let pool = GridPool::new();
        let mut allocs = 0;
        {
            let _g = pool.borrow::<Vec<i32>>(&[4, 4], 4, "dense", || {
                allocs += 1;
                vec![0; 16]
            });
        }
        assert_eq!(pool.idle_count(), 1);
        let _g2 = pool.borrow::<Vec<i32>>(&[4, 4], 4, "dense", || {
            allocs += 1;
            vec![0; 16]
        });
        assert_eq!(allocs, 1);
    }

    #[test]
    fn concurrent_borrows_are_never_the_same_instance() {
        let pool = GridPool::new();
        let a = pool.borrow::<Vec<i32>>(&[4, 4], 4, "dense", || vec![1; 16]);
        let b = pool.borrow::<Vec<i32>>(&[4, 4], 4, "dense", || vec![2; 16]);
        assert_ne!(*a, *b);
    }

    #[test]
    fn clear_drops_in_use_bookkeeping() {
        let pool = GridPool::new();
        let _g = pool.borrow::<Vec<i32>>(&[2, 2], 4, "dense", || vec![0; 4]);
        pool.clear();
        assert_eq!(pool.idle_count(), 0);
    }
}
