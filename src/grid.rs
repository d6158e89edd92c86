//! Generic grid front-end (§4.1).
//!
//! `Grid<T, N, B>` owns the background/fill values and level-set/fillable
//! mode and drives the back-end storage strategy `B: GridBackend<T, N>`
//! through its common contract. Dilate, flood-fill, and the iteration
//! variants are implemented once here, generically, rather than per
//! back-end.

use std::ops::ControlFlow;

use crate::backend::GridBackend;
use crate::diag;
use crate::parallel::ParallelDriver;
use crate::shape::{face_neighbor_offsets, Coord, Shape};

/// How a grid's inactive-but-filled cells are classified by `flood_fill`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Not configured; `flood_fill` is a caller bug (§7).
    Unconfigured,
    /// `value < 0` counts as inside.
    LevelSet,
    /// `value == fill` counts as inside.
    Fillable,
}

pub struct Grid<T, const N: usize, B: GridBackend<T, N>> {
    backend: B,
    background: T,
    fill: T,
    mode: FillMode,
    name: &'static str,
}

impl<T: Clone + PartialEq, const N: usize, B: GridBackend<T, N>> Grid<T, N, B> {
    pub fn new(shape: Shape<N>, background: T) -> Self {
        Grid {
            fill: background.clone(),
            backend: B::new(shape),
            background,
            mode: FillMode::Unconfigured,
            name: "grid",
        }
    }

    /// Construct honoring `cfg`'s `TileSize`/`MaxDepth`/`EnableCache` (§6);
    /// the dense back-end has no such knobs and ignores `cfg`.
    pub fn new_with_config(shape: Shape<N>, background: T, cfg: &crate::config::GridConfig) -> Self {
        Grid {
            fill: background.clone(),
            backend: B::new_with_config(shape, cfg),
            background,
            mode: FillMode::Unconfigured,
            name: "grid",
        }
    }

    /// Attach a human-readable name used only in diagnostic log lines.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn shape(&self) -> Shape<N> {
        self.backend.shape()
    }

    pub fn count(&self) -> usize {
        self.backend.count()
    }

    /// Configure level-set mode: background/fill are given explicitly by the
    /// caller (§3: background=+half-band, fill=-half-band).
    pub fn set_as_levelset(&mut self, background: T, fill: T) {
        self.background = background;
        self.fill = fill;
        self.mode = FillMode::LevelSet;
    }

    /// Configure fillable mode: a single fill value, inside = equals it.
    pub fn set_as_fillable(&mut self, fill: T) {
        self.fill = fill;
        self.mode = FillMode::Fillable;
    }

    fn idx(&self, c: Coord<N>) -> usize {
        assert!(self.shape().in_bounds(c), "coordinate {:?} out of bounds", c);
        self.shape().encode(c)
    }

    /// Read the cell: payload reference if active, else `None`; `filled` is
    /// always reported independently.
    pub fn get(&self, c: Coord<N>) -> (Option<&T>, bool) {
        let idx = self.idx(c);
        (self.backend.get(idx), self.backend.is_filled(idx))
    }

    pub fn get_mut(&mut self, c: Coord<N>) -> Option<&mut T> {
        let idx = self.idx(c);
        self.backend.get_mut(idx)
    }

    /// Read with background/fill substitution — the value a caller actually
    /// wants when not inspecting active/filled flags directly.
    pub fn sample(&self, c: Coord<N>) -> T {
        let idx = self.idx(c);
        if let Some(v) = self.backend.get(idx) {
            return v.clone();
        }
        if self.backend.is_filled(idx) {
            self.fill.clone()
        } else {
            self.background.clone()
        }
    }

    pub fn is_active(&self, c: Coord<N>) -> bool {
        self.backend.is_active(self.idx(c))
    }

    pub fn is_filled(&self, c: Coord<N>) -> bool {
        self.backend.is_filled(self.idx(c))
    }

    /// Activate/mutate/deactivate a single cell (§4.1): `f` observes the
    /// current payload and active flag and may flip the latter.
    pub fn set(&mut self, c: Coord<N>, f: &mut dyn FnMut(&mut Option<T>, &mut bool)) {
        let idx = self.idx(c);
        self.backend.set(idx, f);
    }

    /// Deep-copy `other` into `self` using `copy_fn(&mut T, &T)` for active
    /// payloads. Fill mask is never copied for the generic value grid (bit
    /// grids additionally never copy it even when `self` is fillable — see
    /// `BitGrid::copy`).
    pub fn copy(&mut self, other: &Self, mut copy_fn: impl FnMut(&mut T, &T)) {
        assert_eq!(self.shape(), other.shape(), "copy requires matching shapes");
        for idx in 0..self.shape().product() {
            let c = self.shape().decode(idx);
            match other.backend.get(idx) {
                Some(src) => {
                    self.set(c, &mut |slot, active| {
                        if slot.is_none() {
                            *slot = Some(src.clone());
                        } else if let Some(dst) = slot {
                            copy_fn(dst, src);
                        }
                        *active = true;
                    });
                }
                None => {
                    self.set(c, &mut |_, active| *active = false);
                }
            }
        }
    }

    /// `dilate(F, count)` (§4.1): repeatedly grows the active set by one
    /// face-hop, `count` times. `F` may write the new cell's payload and
    /// must decide whether it actually activates.
    pub fn dilate(&mut self, f: &mut dyn FnMut(&mut Option<T>, &mut bool), count: u32) {
        let offsets = face_neighbor_offsets::<N>();
        let shape = self.shape();
        for _ in 0..count {
            let actives = self.backend.serial_active_indices();
            let mut candidates: Vec<usize> = Vec::new();
            let mut seen = vec![false; shape.product()];
            for idx in actives {
                let c = shape.decode(idx);
                for off in &offsets {
                    let nc = crate::shape::add(c, *off);
                    if !shape.in_bounds(nc) {
                        continue;
                    }
                    let nidx = shape.encode(nc);
                    if self.backend.is_active(nidx) || seen[nidx] {
                        continue;
                    }
                    seen[nidx] = true;
                    candidates.push(nidx);
                }
            }
            candidates.sort_unstable();
            for nidx in candidates {
                let nc = shape.decode(nidx);
                self.set(nc, f);
            }
        }
    }

    /// Flood-fill classification (§4.4). Fatal if the grid has no fill mode
    /// configured — reads of `filled` afterwards would be meaningless.
    pub fn flood_fill(&mut self, inside: impl Fn(&T) -> bool) {
        if self.mode == FillMode::Unconfigured {
            diag::fatal_unconfigured_flood_fill(self.name);
        }
        self.backend.clear_filled();
        let shape = self.shape();
        let offsets = face_neighbor_offsets::<N>();
        let mut frontier: Vec<usize> = Vec::new();

        for idx in 0..shape.product() {
            if let Some(v) = self.backend.get(idx) {
                if inside(v) {
                    self.backend.set_filled(idx, true);
                    frontier.push(idx);
                }
            }
        }

        // Seed-and-spread BFS: forward the filled bit through inactive cells
        // whose neighborhood touches an already-filled cell.
        while let Some(idx) = frontier.pop() {
            let c = shape.decode(idx);
            for off in &offsets {
                let nc = crate::shape::add(c, *off);
                if !shape.in_bounds(nc) {
                    continue;
                }
                let nidx = shape.encode(nc);
                if self.backend.is_active(nidx) || self.backend.is_filled(nidx) {
                    continue;
                }
                self.backend.set_filled(nidx, true);
                frontier.push(nidx);
            }
        }

        diag::step_counters(self.name, &[("filled", popcount_filled(self))]);
    }

    pub fn serial_actives(&self) -> Vec<Coord<N>> {
        self.backend.serial_active_indices().into_iter().map(|i| self.shape().decode(i)).collect()
    }

    pub fn parallel_actives(&self, parallel: &dyn ParallelDriver, visit: impl Fn(Coord<N>, &T) + Sync)
    where
        B: Sync,
    {
        let indices = self.backend.serial_active_indices();
        let shape = self.shape();
        let backend = &self.backend;
        parallel.for_each(indices.len(), &|i, _thread| {
            let idx = indices[i];
            if let Some(v) = backend.get(idx) {
                visit(shape.decode(idx), v);
            }
        });
    }

    pub fn serial_all(&self) -> impl Iterator<Item = Coord<N>> {
        self.shape().iter()
    }

    /// Interruptible serial scan over active cells. Stops and returns early
    /// when `visit` signals `ControlFlow::Break`.
    pub fn interruptible_serial_actives(&self, mut visit: impl FnMut(Coord<N>, &T) -> ControlFlow<()>) {
        let shape = self.shape();
        for idx in self.backend.serial_active_indices() {
            if let Some(v) = self.backend.get(idx) {
                if visit(shape.decode(idx), v).is_break() {
                    return;
                }
            }
        }
    }

    pub fn serial_inside(&self) -> Vec<Coord<N>> {
        let shape = self.shape();
        (0..shape.product()).filter(|&i| self.backend.is_filled(i)).map(|i| shape.decode(i)).collect()
    }

    /// Serial mutable scan over active cells. `visit` may mutate the
    /// payload in place but, per §4.1, must not flip the active flag —
    /// use `set`/`dilate` for that.
    pub fn actives_mut(&mut self, mut visit: impl FnMut(Coord<N>, &mut T)) {
        let shape = self.shape();
        for idx in self.backend.serial_active_indices() {
            if let Some(v) = self.backend.get_mut(idx) {
                visit(shape.decode(idx), v);
            }
        }
    }

    /// Parallel mutable scan over active cells. Each index is visited by at
    /// most one call to `visit`, so disjoint-cell mutation is race-free
    /// (§5: "each thread touches disjoint cells").
    pub fn parallel_actives_mut(&mut self, parallel: &dyn ParallelDriver, visit: impl Fn(Coord<N>, &mut T) + Sync) {
        let indices = self.backend.serial_active_indices();
        let shape = self.shape();
        // SAFETY: `indices` lists each active slot once, so the `get_mut`
        // calls this pass makes through the pointer — one per `i` — never
        // target the same cell twice.
        let backend = unsafe { crate::parallel::DisjointMutPtr::new(&mut self.backend as *mut B) };
        parallel.for_each(indices.len(), &|i, _thread| {
            let idx = indices[i];
            let backend = unsafe { &mut *backend.get() };
            if let Some(v) = backend.get_mut(idx) {
                visit(shape.decode(idx), v);
            }
        });
    }

    /// Interruptible serial mutable scan over active cells (§5
    /// "interruptible_*_serial_*").
    pub fn interruptible_serial_actives_mut(&mut self, mut visit: impl FnMut(Coord<N>, &mut T) -> ControlFlow<()>) {
        let shape = self.shape();
        for idx in self.backend.serial_active_indices() {
            if let Some(v) = self.backend.get_mut(idx) {
                if visit(shape.decode(idx), v).is_break() {
                    return;
                }
            }
        }
    }

    /// Serial read-only scan over every cell in the domain, active or not.
    pub fn serial_all_read(&self, mut visit: impl FnMut(Coord<N>, Option<&T>)) {
        let shape = self.shape();
        for idx in 0..shape.product() {
            visit(shape.decode(idx), self.backend.get(idx));
        }
    }

    /// Parallel read-only scan over every cell in the domain.
    pub fn parallel_all(&self, parallel: &dyn ParallelDriver, visit: impl Fn(Coord<N>, Option<&T>) + Sync)
    where
        B: Sync,
    {
        let shape = self.shape();
        let backend = &self.backend;
        parallel.for_each(shape.product(), &|idx, _thread| {
            visit(shape.decode(idx), backend.get(idx));
        });
    }

    /// Serial mutable scan over every cell in the domain; `visit` sees
    /// `None` for inactive cells and must not activate them.
    pub fn all_mut(&mut self, mut visit: impl FnMut(Coord<N>, Option<&mut T>)) {
        let shape = self.shape();
        for idx in 0..shape.product() {
            visit(shape.decode(idx), self.backend.get_mut(idx));
        }
    }

    /// Parallel mutable scan over every cell in the domain. Indices are
    /// disjoint by construction (one `idx` per call), so this never aliases.
    pub fn parallel_all_mut(&mut self, parallel: &dyn ParallelDriver, visit: impl Fn(Coord<N>, Option<&mut T>) + Sync) {
        let shape = self.shape();
        // SAFETY: each `idx` in `0..shape.product()` is handed to exactly one
        // invocation, so the `get_mut` calls made through this pointer never
        // alias.
        let backend = unsafe { crate::parallel::DisjointMutPtr::new(&mut self.backend as *mut B) };
        parallel.for_each(shape.product(), &|idx, _thread| {
            let backend = unsafe { &mut *backend.get() };
            visit(shape.decode(idx), backend.get_mut(idx));
        });
    }

    /// Interruptible serial scan over every cell in the domain.
    pub fn interruptible_serial_all(&self, mut visit: impl FnMut(Coord<N>, Option<&T>) -> ControlFlow<()>) {
        let shape = self.shape();
        for idx in 0..shape.product() {
            if visit(shape.decode(idx), self.backend.get(idx)).is_break() {
                return;
            }
        }
    }

    /// Interruptible serial mutable scan over every cell in the domain.
    pub fn interruptible_serial_all_mut(&mut self, mut visit: impl FnMut(Coord<N>, Option<&mut T>) -> ControlFlow<()>) {
        let shape = self.shape();
        for idx in 0..shape.product() {
            if visit(shape.decode(idx), self.backend.get_mut(idx)).is_break() {
                return;
            }
        }
    }

    /// Parallel read-only scan over filled cells.
    pub fn parallel_inside(&self, parallel: &dyn ParallelDriver, visit: impl Fn(Coord<N>, Option<&T>) + Sync)
    where
        B: Sync,
    {
        let indices: Vec<usize> = (0..self.shape().product()).filter(|&i| self.backend.is_filled(i)).collect();
        let shape = self.shape();
        let backend = &self.backend;
        parallel.for_each(indices.len(), &|i, _thread| {
            let idx = indices[i];
            visit(shape.decode(idx), backend.get(idx));
        });
    }

    /// Serial mutable scan over filled cells.
    pub fn inside_mut(&mut self, mut visit: impl FnMut(Coord<N>, Option<&mut T>)) {
        let indices: Vec<usize> = (0..self.shape().product()).filter(|&i| self.backend.is_filled(i)).collect();
        let shape = self.shape();
        for idx in indices {
            visit(shape.decode(idx), self.backend.get_mut(idx));
        }
    }

    /// Parallel mutable scan over filled cells.
    pub fn parallel_inside_mut(&mut self, parallel: &dyn ParallelDriver, visit: impl Fn(Coord<N>, Option<&mut T>) + Sync) {
        let indices: Vec<usize> = (0..self.shape().product()).filter(|&i| self.backend.is_filled(i)).collect();
        let shape = self.shape();
        // SAFETY: `indices` lists each filled slot once, so the `get_mut`
        // calls this pass makes through the pointer never alias.
        let backend = unsafe { crate::parallel::DisjointMutPtr::new(&mut self.backend as *mut B) };
        parallel.for_each(indices.len(), &|i, _thread| {
            let idx = indices[i];
            let backend = unsafe { &mut *backend.get() };
            visit(shape.decode(idx), backend.get_mut(idx));
        });
    }

    /// Interruptible serial scan over filled cells.
    pub fn interruptible_serial_inside(&self, mut visit: impl FnMut(Coord<N>, Option<&T>) -> ControlFlow<()>) {
        let shape = self.shape();
        for idx in 0..shape.product() {
            if self.backend.is_filled(idx) && visit(shape.decode(idx), self.backend.get(idx)).is_break() {
                return;
            }
        }
    }

    /// Interruptible serial mutable scan over filled cells.
    pub fn interruptible_serial_inside_mut(&mut self, mut visit: impl FnMut(Coord<N>, Option<&mut T>) -> ControlFlow<()>) {
        let shape = self.shape();
        for idx in 0..shape.product() {
            if self.backend.is_filled(idx) && visit(shape.decode(idx), self.backend.get_mut(idx)).is_break() {
                return;
            }
        }
    }
}

fn popcount_filled<T: Clone + PartialEq, const N: usize, B: GridBackend<T, N>>(grid: &Grid<T, N, B>) -> u64 {
    grid.shape().iter().filter(|&c| grid.is_filled(c)).count() as u64
}
