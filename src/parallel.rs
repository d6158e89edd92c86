//! Parallel driver collaborator (§4.7, §5).
//!
//! Every back-end expresses its parallelism through this trait instead of
//! calling `rayon` directly, so a deterministic serial fake can stand in for
//! tests. The production implementation (`RayonDriver`, behind the
//! `parallel` feature, mirroring the teacher's `#[cfg(feature = "parallel")]`
//! gating of its own rayon usage) wraps rayon's global thread pool.

/// Fork-join work dispatcher. `body` invocations are independent and make no
/// ordering guarantee relative to each other, and may run on any worker
/// thread concurrently — hence the `Fn + Sync` bound rather than `FnMut`.
/// Callers that need to accumulate results across invocations do so with
/// per-thread state or their own interior-mutable accumulator (an atomic, a
/// mutex around just the reduction, or rayon's own `fold`/`reduce`), not by
/// capturing a shared `&mut`.
pub trait ParallelDriver: Sync {
    /// Run `body(i, thread_index)` for `i` in `0..count`.
    fn for_each(&self, count: usize, body: &(dyn Fn(usize, usize) + Sync));

    /// Number of worker threads this driver can use.
    fn num_threads(&self) -> usize;
}

/// Runs everything on the calling thread, in order. Used by tests that need
/// deterministic iteration order or that run under `loom`-style scrutiny.
pub struct SerialDriver;

impl ParallelDriver for SerialDriver {
    fn for_each(&self, count: usize, body: &(dyn Fn(usize, usize) + Sync)) {
        for i in 0..count {
            body(i, 0);
        }
    }

    fn num_threads(&self) -> usize {
        1
    }
}

/// Production driver backed by rayon's global thread pool.
#[cfg(feature = "parallel")]
pub struct RayonDriver;

#[cfg(feature = "parallel")]
impl ParallelDriver for RayonDriver {
    fn for_each(&self, count: usize, body: &(dyn Fn(usize, usize) + Sync)) {
        use rayon::prelude::*;
        (0..count).into_par_iter().for_each(|i| {
            let thread = rayon::current_thread_index().unwrap_or(0);
            body(i, thread);
        });
    }

    fn num_threads(&self) -> usize {
        rayon::current_num_threads()
    }
}

/// Run `body` once per axis `0..N`, concurrently when the driver allows it.
/// Used by the MAC grid to broadcast a per-scalar-grid operation across axes
/// (§4.2: "parallel helpers launch one scan per axis and may run them
/// concurrently").
pub fn for_each_axis<const N: usize>(parallel: &dyn ParallelDriver, body: &(dyn Fn(usize, usize) + Sync)) {
    parallel.for_each(N, body);
}

/// Wraps a raw pointer so it can cross into the `Sync` bodies
/// `ParallelDriver::for_each` requires. Constructing one is unsafe: the
/// caller must guarantee that, within a single `for_each` pass, every
/// dereference made through it targets a distinct element, so no two
/// concurrent invocations ever alias the same memory.
pub(crate) struct DisjointMutPtr<T>(*mut T);

impl<T> DisjointMutPtr<T> {
    /// SAFETY: see the type's own doc comment — every use across one
    /// `for_each` pass must touch disjoint elements.
    pub(crate) unsafe fn new(ptr: *mut T) -> Self {
        DisjointMutPtr(ptr)
    }

    pub(crate) fn get(&self) -> *mut T {
        self.0
    }
}

// SAFETY: disjoint-element access is the caller's obligation (see `new`);
// the wrapper itself only ever hands back the raw pointer.
unsafe impl<T> Send for DisjointMutPtr<T> {}
unsafe impl<T> Sync for DisjointMutPtr<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_driver_visits_every_index_once() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let seen: Vec<AtomicBool> = (0..10).map(|_| AtomicBool::new(false)).collect();
        SerialDriver.for_each(10, &|i, _| seen[i].store(true, Ordering::Relaxed));
        assert!(seen.iter().all(|b| b.load(Ordering::Relaxed)));
    }

    #[test]
    fn serial_driver_is_single_threaded() {
        assert_eq!(SerialDriver.num_threads(), 1);
    }
}
