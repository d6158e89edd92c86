//! Recursive-tree back-end (§4.1.3).
//!
//! A tree of branching factor `Z` per axis per depth; intermediate nodes are
//! allocated lazily, leaves hold a dense [`TileData`] block sized to the
//! remainder at the domain boundary. Concurrent readers/writers carry a
//! per-thread cache that remembers the most recently visited node so
//! repeated nearby accesses avoid re-walking from the root.
//!
//! Arena slots are never reused after a prune frees them (the index is
//! retired, not recycled) which doubles as the cache's staleness check: a
//! cached index pointing at a `None` slot is self-evidently stale, with no
//! separate generation counter needed (§9 "Cyclic/shared ownership").

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::tile::TileData;
use super::GridBackend;
use crate::config::DEFAULT_TILE_SIZE;
use crate::popcount;
use crate::shape::{Coord, Shape};

thread_local! {
    static CACHE: RefCell<HashMap<u64, usize>> = RefCell::new(HashMap::new());
}

static NEXT_GRID_ID: AtomicU64 = AtomicU64::new(1);

enum NodeKind<T, const N: usize> {
    Internal { children: Vec<Option<usize>>, child_fill_bits: Vec<u64> },
    Leaf { tile: TileData<T, N> },
}

struct TreeNode<T, const N: usize> {
    parent: Option<usize>,
    origin: Coord<N>,
    /// Distance from the leaf level: leaves are level 0, the root is `depth`.
    level: u32,
    /// Side length of the cube this node covers, i.e. `branch^level`.
    side: u32,
    active_count: usize,
    kind: NodeKind<T, N>,
}

pub struct TreeBackend<T, const N: usize> {
    grid_id: u64,
    shape: Shape<N>,
    branch: u32,
    depth: u32,
    nodes: Vec<Option<TreeNode<T, N>>>,
    active_count: usize,
    /// `EnableCache` (§6): when false, every access climbs from the root
    /// instead of from the per-thread cached node.
    cache_enabled: bool,
}

impl<T, const N: usize> TreeBackend<T, N> {
    pub fn with_branch(shape: Shape<N>, branch: u32) -> Self {
        Self::with_branch_and_depth_cap(shape, branch, u32::MAX, true)
    }

    /// Construct with an explicit branching factor, a `MaxDepth` cap (§6),
    /// and the `EnableCache` toggle (§6). Panics if the domain needs more
    /// levels than `max_depth` allows — a caller configuration error, not a
    /// recoverable runtime condition (§7 mirrors the out-of-range-coordinate
    /// assertion here).
    pub fn with_branch_and_depth_cap(shape: Shape<N>, branch: u32, max_depth: u32, cache_enabled: bool) -> Self {
        assert!(branch.is_power_of_two(), "tree branching factor must be a power of two");
        let max_extent = shape.extent().into_iter().max().unwrap_or(1).max(1);
        let mut depth = 0u32;
        let mut side = 1u32;
        while side < max_extent {
            side *= branch;
            depth += 1;
        }
        let depth = depth.max(1);
        assert!(depth <= max_depth, "domain requires tree depth {depth} but MaxDepth caps it at {max_depth}");
        let side = branch.pow(depth);
        let n_children = branch.pow(N as u32) as usize;

        let root = TreeNode {
            parent: None,
            origin: [0i64; N],
            level: depth,
            side,
            active_count: 0,
            kind: NodeKind::Internal {
                children: vec![None; n_children],
                child_fill_bits: vec![0u64; popcount::words_for_bits(n_children)],
            },
        };

        TreeBackend {
            grid_id: NEXT_GRID_ID.fetch_add(1, Ordering::Relaxed),
            shape,
            branch,
            depth,
            nodes: vec![Some(root)],
            active_count: 0,
            cache_enabled,
        }
    }

    fn node(&self, idx: usize) -> &TreeNode<T, N> {
        self.nodes[idx].as_ref().expect("stale tree node index")
    }

    fn node_mut(&mut self, idx: usize) -> &mut TreeNode<T, N> {
        self.nodes[idx].as_mut().expect("stale tree node index")
    }

    fn cached_node(&self) -> Option<usize> {
        if !self.cache_enabled {
            return None;
        }
        CACHE.with(|c| c.borrow().get(&self.grid_id).copied())
    }

    fn remember(&self, idx: usize) {
        if !self.cache_enabled {
            return;
        }
        CACHE.with(|c| {
            c.borrow_mut().insert(self.grid_id, idx);
        });
    }

    fn forget_if(&self, idx: usize) {
        CACHE.with(|c| {
            let mut map = c.borrow_mut();
            if map.get(&self.grid_id) == Some(&idx) {
                map.remove(&self.grid_id);
            }
        });
    }

    fn covers(&self, node_idx: usize, coord: Coord<N>) -> bool {
        let node = self.node(node_idx);
        (0..N).all(|d| {
            let rel = coord[d] - node.origin[d];
            rel >= 0 && (rel as u32) < node.side
        })
    }

    /// Bounded climb: walk parent links from `start` until the node's cube
    /// contains `coord` (the root always does).
    fn climb_to_ancestor(&self, start: usize, coord: Coord<N>) -> usize {
        let mut idx = start;
        while !self.covers(idx, coord) {
            match self.node(idx).parent {
                Some(p) => idx = p,
                None => break,
            }
        }
        idx
    }

    /// Child slot index (mixed-radix base `branch`) for `coord` within the
    /// cube covered by the internal node at `node_idx`.
    fn child_slot(&self, node_idx: usize, coord: Coord<N>) -> usize {
        let node = self.node(node_idx);
        let child_side = self.branch.pow(node.level - 1);
        let mut slot = 0usize;
        let mut stride = 1usize;
        for d in 0..N {
            let rel = (coord[d] - node.origin[d]) as u32;
            let c = (rel / child_side) as usize;
            slot += c * stride;
            stride *= self.branch as usize;
        }
        slot
    }

    fn child_origin(&self, node_idx: usize, slot: usize) -> Coord<N> {
        let node = self.node(node_idx);
        let child_side = self.branch.pow(node.level - 1);
        let mut rem = slot;
        let mut origin = node.origin;
        for d in 0..N {
            let c = rem % self.branch as usize;
            rem /= self.branch as usize;
            origin[d] += (c as u32 * child_side) as i64;
        }
        origin
    }

    /// Descend from `node_idx` towards `coord`, reading only (never
    /// allocating). Returns `Ok(leaf_idx)` if a leaf exists on the path, or
    /// `Err(fill_bit)` at the first absent child, carrying that subtree's
    /// summarized fill state.
    fn descend_readonly(&self, mut node_idx: usize, coord: Coord<N>) -> Result<usize, bool> {
        loop {
            match &self.node(node_idx).kind {
                NodeKind::Leaf { .. } => return Ok(node_idx),
                NodeKind::Internal { children, child_fill_bits } => {
                    let slot = self.child_slot(node_idx, coord);
                    match children[slot] {
                        Some(child) => node_idx = child,
                        None => return Err(popcount::check_bit(child_fill_bits, slot)),
                    }
                }
            }
        }
    }

    /// Descend from `node_idx` towards `coord`, materializing intermediate
    /// nodes and the leaf as needed. Propagates an absent subtree's fill bit
    /// down into freshly created nodes so "everything here was filled"
    /// survives materialization.
    fn descend_or_create(&mut self, mut node_idx: usize, coord: Coord<N>) -> usize {
        loop {
            if let NodeKind::Leaf { .. } = self.node(node_idx).kind {
                return node_idx;
            }
            let slot = self.child_slot(node_idx, coord);
            let existing = match &self.node(node_idx).kind {
                NodeKind::Internal { children, .. } => children[slot],
                NodeKind::Leaf { .. } => unreachable!(),
            };
            if let Some(child) = existing {
                node_idx = child;
                continue;
            }

            let inherited_fill = match &self.node(node_idx).kind {
                NodeKind::Internal { child_fill_bits, .. } => popcount::check_bit(child_fill_bits, slot),
                NodeKind::Leaf { .. } => unreachable!(),
            };
            let child_origin = self.child_origin(node_idx, slot);
            let child_level = self.node(node_idx).level - 1;
            let new_idx = self.nodes.len();

            let new_node = if child_level == 0 {
                let mut local_extent = [0u32; N];
                for d in 0..N {
                    let remaining = self.shape.axis(d) as i64 - child_origin[d];
                    local_extent[d] = remaining.clamp(0, self.branch as i64) as u32;
                }
                let mut tile = TileData::new(Shape::new(local_extent));
                if inherited_fill {
                    for i in 0..tile.shape().product() {
                        tile.set_filled(i, true);
                    }
                }
                TreeNode {
                    parent: Some(node_idx),
                    origin: child_origin,
                    level: 0,
                    side: self.branch,
                    active_count: 0,
                    kind: NodeKind::Leaf { tile },
                }
            } else {
                let n_children = self.branch.pow(N as u32) as usize;
                let mut child_fill_bits = vec![0u64; popcount::words_for_bits(n_children)];
                if inherited_fill {
                    for w in child_fill_bits.iter_mut() {
                        *w = !0u64;
                    }
                }
                TreeNode {
                    parent: Some(node_idx),
                    origin: child_origin,
                    level: child_level,
                    side: self.branch.pow(child_level),
                    active_count: 0,
                    kind: NodeKind::Internal {
                        children: vec![None; n_children],
                        child_fill_bits,
                    },
                }
            };
            self.nodes.push(Some(new_node));

            match &mut self.node_mut(node_idx).kind {
                NodeKind::Internal { children, child_fill_bits } => {
                    children[slot] = Some(new_idx);
                    popcount::clear_bit(child_fill_bits, slot);
                }
                NodeKind::Leaf { .. } => unreachable!(),
            }
            node_idx = new_idx;
        }
    }

    fn bump_active_count(&mut self, leaf_idx: usize, delta: i64) {
        let mut cur = Some(leaf_idx);
        while let Some(idx) = cur {
            let node = self.node_mut(idx);
            node.active_count = (node.active_count as i64 + delta) as usize;
            cur = node.parent;
        }
    }

    /// Recursively delete nodes with zero active descendants and no
    /// materialized children, folding their fill state up into the parent's
    /// summary bit. Conservative: a node with non-uniform child fill state
    /// below it is left materialized.
    pub fn prune(&mut self) {
        self.prune_from(0);
    }

    fn prune_from(&mut self, node_idx: usize) {
        let child_indices: Vec<usize> = match &self.node(node_idx).kind {
            NodeKind::Internal { children, .. } => children.iter().filter_map(|c| *c).collect(),
            NodeKind::Leaf { .. } => return,
        };
        for child in child_indices {
            self.prune_from(child);
        }

        let Some(parent_idx) = self.node(node_idx).parent else { return };
        if self.node(node_idx).active_count != 0 {
            return;
        }

        let own_origin = self.node(node_idx).origin;
        let slot_in_parent = self.child_slot(parent_idx, own_origin);
        let parent_fill_bit = match &self.node(parent_idx).kind {
            NodeKind::Internal { child_fill_bits, .. } => {
                popcount::check_bit(child_fill_bits, slot_in_parent)
            }
            NodeKind::Leaf { .. } => unreachable!(),
        };

        let (collapsible, uniform_fill) = match &self.node(node_idx).kind {
            NodeKind::Internal { children, child_fill_bits } => {
                let all_absent = children.iter().all(|c| c.is_none());
                let n = children.len();
                let all_zero = (0..n).all(|i| !popcount::check_bit(child_fill_bits, i));
                let all_one = (0..n).all(|i| popcount::check_bit(child_fill_bits, i));
                (all_absent && (all_zero || all_one), all_one)
            }
            NodeKind::Leaf { tile } => (tile.is_deletable(parent_fill_bit), parent_fill_bit),
        };

        if collapsible {
            let origin = self.node(node_idx).origin;
            let slot = self.child_slot(parent_idx, origin);
            self.nodes[node_idx] = None;
            self.forget_if(node_idx);
            match &mut self.node_mut(parent_idx).kind {
                NodeKind::Internal { children, child_fill_bits } => {
                    children[slot] = None;
                    if uniform_fill {
                        popcount::set_bit(child_fill_bits, slot);
                    } else {
                        popcount::clear_bit(child_fill_bits, slot);
                    }
                }
                NodeKind::Leaf { .. } => unreachable!(),
            }
        }
    }

    fn local_coord(&self, leaf_idx: usize, coord: Coord<N>) -> Coord<N> {
        let origin = self.node(leaf_idx).origin;
        let mut local = [0i64; N];
        for d in 0..N {
            local[d] = coord[d] - origin[d];
        }
        local
    }

    fn collect_active(&self, node_idx: usize, out: &mut Vec<usize>) {
        if self.node(node_idx).active_count == 0 {
            return;
        }
        match &self.node(node_idx).kind {
            NodeKind::Leaf { tile } => {
                let origin = self.node(node_idx).origin;
                let local_shape = tile.shape();
                for local in tile.serial_active_indices() {
                    let local_coord = local_shape.decode(local);
                    let mut global = [0i64; N];
                    for d in 0..N {
                        global[d] = origin[d] + local_coord[d];
                    }
                    out.push(self.shape.encode(global));
                }
            }
            NodeKind::Internal { children, .. } => {
                for child in children.iter().flatten() {
                    self.collect_active(*child, out);
                }
            }
        }
    }
}

impl<T, const N: usize> GridBackend<T, N> for TreeBackend<T, N> {
    fn new(shape: Shape<N>) -> Self {
        Self::with_branch(shape, DEFAULT_TILE_SIZE)
    }

    fn new_with_config(shape: Shape<N>, cfg: &crate::config::GridConfig) -> Self {
        Self::with_branch_and_depth_cap(shape, cfg.tile_size, cfg.max_depth, cfg.enable_cache)
    }

    fn shape(&self) -> Shape<N> {
        self.shape
    }

    fn count(&self) -> usize {
        self.active_count
    }

    fn is_active(&self, idx: usize) -> bool {
        let coord = self.shape.decode(idx);
        let start = self.cached_node().filter(|&i| self.nodes[i].is_some()).unwrap_or(0);
        let start = self.climb_to_ancestor(start, coord);
        match self.descend_readonly(start, coord) {
            Ok(leaf) => {
                self.remember(leaf);
                match &self.node(leaf).kind {
                    NodeKind::Leaf { tile } => {
                        let local = tile.shape().encode(self.local_coord(leaf, coord));
                        tile.is_active(local)
                    }
                    _ => unreachable!(),
                }
            }
            Err(_) => false,
        }
    }

    fn is_filled(&self, idx: usize) -> bool {
        let coord = self.shape.decode(idx);
        match self.descend_readonly(0, coord) {
            Ok(leaf) => match &self.node(leaf).kind {
                NodeKind::Leaf { tile } => {
                    let local = tile.shape().encode(self.local_coord(leaf, coord));
                    tile.is_filled(local)
                }
                _ => unreachable!(),
            },
            Err(fill_bit) => fill_bit,
        }
    }

    fn set_filled(&mut self, idx: usize, filled: bool) {
        let coord = self.shape.decode(idx);
        let leaf = self.descend_or_create(0, coord);
        let local_coord = self.local_coord(leaf, coord);
        match &mut self.node_mut(leaf).kind {
            NodeKind::Leaf { tile } => {
                let local = tile.shape().encode(local_coord);
                tile.set_filled(local, filled);
            }
            _ => unreachable!(),
        }
    }

    fn clear_filled(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            match &mut node.kind {
                NodeKind::Leaf { tile } => tile.clear_filled(),
                NodeKind::Internal { child_fill_bits, .. } => {
                    child_fill_bits.iter_mut().for_each(|w| *w = 0)
                }
            }
        }
    }

    fn get(&self, idx: usize) -> Option<&T> {
        let coord = self.shape.decode(idx);
        let start = self.cached_node().filter(|&i| self.nodes[i].is_some()).unwrap_or(0);
        let start = self.climb_to_ancestor(start, coord);
        match self.descend_readonly(start, coord) {
            Ok(leaf) => {
                self.remember(leaf);
                match &self.node(leaf).kind {
                    NodeKind::Leaf { tile } => {
                        let local = tile.shape().encode(self.local_coord(leaf, coord));
                        tile.get(local)
                    }
                    _ => unreachable!(),
                }
            }
            Err(_) => None,
        }
    }

    fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        let coord = self.shape.decode(idx);
        let start = self.cached_node().filter(|&i| self.nodes[i].is_some()).unwrap_or(0);
        let start = self.climb_to_ancestor(start, coord);
        match self.descend_readonly(start, coord) {
            Ok(leaf) => {
                self.remember(leaf);
                let local_coord = self.local_coord(leaf, coord);
                match &mut self.node_mut(leaf).kind {
                    NodeKind::Leaf { tile } => {
                        let local = tile.shape().encode(local_coord);
                        tile.get_mut(local)
                    }
                    _ => unreachable!(),
                }
            }
            Err(_) => None,
        }
    }

    fn set(&mut self, idx: usize, f: &mut dyn FnMut(&mut Option<T>, &mut bool)) {
        let coord = self.shape.decode(idx);
        let start = self.cached_node().filter(|&i| self.nodes[i].is_some()).unwrap_or(0);
        let ancestor = self.climb_to_ancestor(start, coord);
        let leaf = self.descend_or_create(ancestor, coord);
        let local_coord = self.local_coord(leaf, coord);

        let before = match &self.node(leaf).kind {
            NodeKind::Leaf { tile } => tile.active_count(),
            _ => unreachable!(),
        };
        match &mut self.node_mut(leaf).kind {
            NodeKind::Leaf { tile } => {
                let local = tile.shape().encode(local_coord);
                tile.set(local, f);
            }
            _ => unreachable!(),
        }
        let after = match &self.node(leaf).kind {
            NodeKind::Leaf { tile } => tile.active_count(),
            _ => unreachable!(),
        };

        if after > before {
            self.active_count += 1;
            self.bump_active_count(leaf, 1);
        } else if after < before {
            self.active_count -= 1;
            self.bump_active_count(leaf, -1);
        }
        self.remember(leaf);
    }

    fn serial_active_indices(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.active_count);
        self.collect_active(0, &mut out);
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_lazy_nodes() {
        let shape = Shape::<2>::new([64, 64]);
        let mut backend = TreeBackend::<i32, 2>::with_branch(shape, 4);
        let idx = shape.encode([50, 13]);
        backend.set(idx, &mut |slot, active| {
            *slot = Some(42);
            *active = true;
        });
        assert_eq!(backend.get(idx), Some(&42));
        assert_eq!(backend.count(), 1);
    }

    #[test]
    fn deactivate_then_prune_frees_nodes_and_cache_self_heals() {
        let shape = Shape::<2>::new([64, 64]);
        let mut backend = TreeBackend::<i32, 2>::with_branch(shape, 4);
        let idx = shape.encode([50, 13]);
        backend.set(idx, &mut |slot, active| {
            *slot = Some(1);
            *active = true;
        });
        backend.set(idx, &mut |_, active| *active = false);
        backend.prune();
        assert_eq!(backend.count(), 0);
        // Cache may still reference a freed leaf; subsequent access must not
        // panic and must fall back to the root.
        assert_eq!(backend.get(idx), None);
    }

    #[test]
    fn active_indices_sorted_across_subtrees() {
        let shape = Shape::<3>::new([32, 32, 32]);
        let mut backend = TreeBackend::<i32, 3>::with_branch(shape, 4);
        for c in [[31, 31, 31], [0, 0, 0], [15, 16, 1]] {
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
        assert_eq!(indices.len(), 3);
    }

    #[test]
    #[should_panic(expected = "MaxDepth")]
    fn max_depth_cap_rejects_domains_that_need_more_levels() {
        let shape = Shape::<2>::new([64, 64]);
        // branch=4 needs depth 3 for a 64-wide domain; cap it at 2.
        TreeBackend::<i32, 2>::with_branch_and_depth_cap(shape, 4, 2, true);
    }

    #[test]
    fn cache_disabled_still_finds_active_cells() {
        let shape = Shape::<2>::new([64, 64]);
        let mut backend = TreeBackend::<i32, 2>::with_branch_and_depth_cap(shape, 4, u32::MAX, false);
        let idx = shape.encode([50, 13]);
        backend.set(idx, &mut |slot, active| {
            *slot = Some(7);
            *active = true;
        });
        assert_eq!(backend.get(idx), Some(&7));
        assert!(backend.cached_node().is_none());
    }

    #[test]
    fn fill_bit_on_absent_subtree_is_inherited_on_materialization() {
        let shape = Shape::<2>::new([64, 64]);
        let mut backend = TreeBackend::<i32, 2>::with_branch(shape, 4);
        let idx = shape.encode([50, 13]);
        backend.set_filled(idx, true);
        assert!(backend.is_filled(idx));
        // A neighboring, still-absent cell in a different subtree must not
        // be affected.
        let other = shape.encode([2, 2]);
        assert!(!backend.is_filled(other));
    }
}
