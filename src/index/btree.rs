//! Disk B+Tree engine
//!
//! ## Shape
//! - Every node lives in one block of the table file and is read and written
//!   through the [`BlockStore`], so each change is logged before it reaches a
//!   page.
//! - Separators route with "ties go right": the child followed for a key is
//!   the number of separators `<=` that key.
//! - Leaves form a doubly linked list from `head` to `tail` in key order.
//! - Parent pointers are rewritten on every split, borrow and merge. A cached
//!   pointer that does not list its child is re-derived by descending from
//!   the root ([`BPlusTree::repair_parent`]); when even that fails the
//!   rebalance is skipped and counted as orphaned.
//!
//! ```text
//!                 [root: 5 | 8]
//!               /       |       \
//!   [1 2 3 4] <-> [5 6 7] <-> [8 9]     head .. tail
//! ```

use super::node::{InternalNode, LeafNode, Node, NodeLayout, Side};
use crate::storage::{BlockId, BlockStore, BlockType};
use crate::types::Key;
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::ops::{Bound, RangeBounds};
use tracing::{debug, warn};

/// Entry points of a tree, persisted in the table header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMeta {
    pub root: Option<BlockId>,
    pub head: Option<BlockId>,
    pub tail: Option<BlockId>,
    /// Levels including the leaf level (0 for an empty tree)
    pub depth: u32,
}

/// Tree shape and rebalancing counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub depth: u32,
    pub internal_nodes: usize,
    pub leaves: usize,
    pub keys: usize,
    /// Borrow rebalances since this handle was opened
    pub borrows: u64,
    /// Merge rebalances since this handle was opened
    pub merges: u64,
    /// Underflows left unrepaired because no sibling could be found
    pub orphaned_rebalances: u64,
}

/// What an underflow check did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rebalance {
    Balanced,
    Borrowed,
    Merged,
    /// The root was emptied or lost a level
    Collapsed,
    Orphaned,
}

/// A pending node in [`BPlusTree::check_tree`]
struct Visit {
    block: BlockId,
    parent: Option<BlockId>,
    low: Option<Key>,
    high: Option<Key>,
    level: u32,
}

pub struct BPlusTree {
    store: BlockStore,
    file: String,
    layout: NodeLayout,
    meta: TreeMeta,
    borrows: u64,
    merges: u64,
    orphaned_rebalances: u64,
}

impl BPlusTree {
    pub fn new(store: BlockStore, file: impl Into<String>, layout: NodeLayout, meta: TreeMeta) -> Self {
        Self {
            store,
            file: file.into(),
            layout,
            meta,
            borrows: 0,
            merges: 0,
            orphaned_rebalances: 0,
        }
    }

    pub fn meta(&self) -> TreeMeta {
        self.meta
    }

    /// Point the handle back at previously committed entry points
    pub fn reset_meta(&mut self, meta: TreeMeta) {
        self.meta = meta;
    }

    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn is_empty(&self) -> bool {
        self.meta.root.is_none()
    }

    fn corrupt(&self, msg: String) -> StorageError {
        StorageError::Corruption(format!("tree '{}': {}", self.file, msg))
    }

    fn check_key(&self, key: &Key) -> Result<()> {
        if key.fits(self.layout.key_type) {
            Ok(())
        } else {
            Err(StorageError::TypeMismatch(format!(
                "key {} ({}) for a {} tree",
                key,
                key.data_type_name(),
                self.layout.key_type.name()
            )))
        }
    }

    // ==================== Node I/O ====================

    fn load(&self, block: BlockId) -> Result<Node> {
        let page = self.store.page(&self.file, block)?;
        let node = Node::deserialize(block, &page.read(), &self.layout);
        node
    }

    fn load_internal(&self, block: BlockId) -> Result<InternalNode> {
        match self.load(block)? {
            Node::Internal(node) => Ok(node),
            Node::Leaf(_) => Err(self.corrupt(format!("block {} is a leaf, expected internal", block))),
        }
    }

    fn load_leaf(&self, block: BlockId) -> Result<LeafNode> {
        match self.load(block)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(self.corrupt(format!("block {} is internal, expected a leaf", block))),
        }
    }

    fn save_internal(&self, node: &InternalNode) -> Result<()> {
        let image = node.serialize(&self.layout)?;
        self.store.update_block(&self.file, node.block, &image)
    }

    fn save_leaf(&self, leaf: &LeafNode) -> Result<()> {
        let image = leaf.serialize(&self.layout)?;
        self.store.update_block(&self.file, leaf.block, &image)
    }

    fn save(&self, node: &Node) -> Result<()> {
        match node {
            Node::Internal(n) => self.save_internal(n),
            Node::Leaf(n) => self.save_leaf(n),
        }
    }

    /// Allocate and write an empty leaf
    fn new_leaf(&self) -> Result<LeafNode> {
        let block = self.store.allocate_block(&self.file, BlockType::Leaf)?;
        let leaf = LeafNode::new(block, self.layout.order);
        self.store
            .write_block(&self.file, block, &leaf.serialize(&self.layout)?)?;
        Ok(leaf)
    }

    /// Allocate and write an empty internal node
    fn new_internal(&self) -> Result<InternalNode> {
        let block = self.store.allocate_block(&self.file, BlockType::Internal)?;
        let node = InternalNode::new(block, self.layout.order);
        self.store
            .write_block(&self.file, block, &node.serialize(&self.layout)?)?;
        Ok(node)
    }

    fn free_node(&self, block: BlockId) -> Result<()> {
        self.store.release_block(&self.file, block)
    }

    fn set_parent(&self, block: BlockId, parent: Option<BlockId>) -> Result<()> {
        let mut node = self.load(block)?;
        if node.parent() != parent {
            node.set_parent(parent);
            self.save(&node)?;
        }
        Ok(())
    }

    // ==================== Descent ====================

    /// Leaf whose key range covers `key`
    fn find_leaf(&self, key: &Key) -> Result<Option<LeafNode>> {
        let Some(mut block) = self.meta.root else {
            return Ok(None);
        };
        for _ in 0..self.meta.depth {
            match self.load(block)? {
                Node::Leaf(leaf) => return Ok(Some(leaf)),
                Node::Internal(node) => {
                    block = *node.children.get(node.child_index(key)).ok_or_else(|| {
                        self.corrupt(format!("internal node {} has no children", node.block))
                    })?;
                }
            }
        }
        Err(self.corrupt(format!("no leaf within {} levels", self.meta.depth)))
    }

    /// Smallest key stored under `block`
    fn subtree_min(&self, mut block: BlockId) -> Result<Key> {
        for _ in 0..self.meta.depth {
            match self.load(block)? {
                Node::Internal(node) => {
                    block = *node.children.first().ok_or_else(|| {
                        self.corrupt(format!("internal node {} has no children", node.block))
                    })?;
                }
                Node::Leaf(leaf) => {
                    return leaf
                        .first_key()
                        .cloned()
                        .ok_or_else(|| self.corrupt(format!("leaf {} is empty", leaf.block)));
                }
            }
        }
        Err(self.corrupt(format!("no leaf under block {}", block)))
    }

    /// Parent of `child`. The cached pointer is trusted only if that node
    /// really lists `child`; otherwise the parent is re-derived from the
    /// root. Returns None for the root and for orphans.
    fn resolve_parent(
        &self,
        child: BlockId,
        cached: Option<BlockId>,
        route: &Key,
    ) -> Result<Option<InternalNode>> {
        if Some(child) == self.meta.root {
            return Ok(None);
        }
        if let Some(parent) = cached {
            // A cached block that no longer decodes as internal is stale too.
            if let Ok(Node::Internal(node)) = self.load(parent) {
                if node.position_of(child).is_some() {
                    return Ok(Some(node));
                }
            }
        }
        self.repair_parent(child, route)
    }

    /// Find the internal node listing `child` by descending from the root
    /// along `route`, a key stored under `child`.
    pub fn repair_parent(&self, child: BlockId, route: &Key) -> Result<Option<InternalNode>> {
        let Some(mut block) = self.meta.root else {
            return Ok(None);
        };
        for _ in 0..self.meta.depth {
            let Node::Internal(node) = self.load(block)? else {
                break;
            };
            if node.position_of(child).is_some() {
                debug!(file = %self.file, child, parent = node.block, "parent pointer re-derived");
                return Ok(Some(node));
            }
            match node.children.get(node.child_index(route)) {
                Some(next) => block = *next,
                None => break,
            }
        }
        Ok(None)
    }

    /// Nearest sibling of `child`: the right one, or the left one for the
    /// last child. Also returns `child`'s index in `parent`.
    fn sibling_of(parent: &InternalNode, child: BlockId) -> Option<(usize, Side, BlockId)> {
        let idx = parent.position_of(child)?;
        if let Some(right) = parent.children.get(idx + 1) {
            return Some((idx, Side::Right, *right));
        }
        let left = *parent.children.get(idx.checked_sub(1)?)?;
        Some((idx, Side::Left, left))
    }

    fn orphaned(&mut self, block: BlockId) -> Rebalance {
        self.orphaned_rebalances += 1;
        warn!(file = %self.file, block, "no sibling found, node left underfull");
        Rebalance::Orphaned
    }

    // ==================== Search ====================

    /// Record block stored for `key`
    pub fn search(&self, key: &Key) -> Result<Option<BlockId>> {
        self.check_key(key)?;
        Ok(self.find_leaf(key)?.and_then(|leaf| leaf.find(key)))
    }

    pub fn contains_key(&self, key: &Key) -> Result<bool> {
        Ok(self.search(key)?.is_some())
    }

    /// Entries with keys inside `range`, ascending
    pub fn range<R: RangeBounds<Key>>(&self, range: R) -> Result<Vec<(Key, BlockId)>> {
        let mut current = match range.start_bound() {
            Bound::Included(key) | Bound::Excluded(key) => {
                self.check_key(key)?;
                self.find_leaf(key)?
            }
            Bound::Unbounded => self.meta.head.map(|b| self.load_leaf(b)).transpose()?,
        };

        let mut entries = Vec::new();
        let mut hops = 0usize;
        while let Some(leaf) = current {
            for (key, record) in leaf.keys.iter().zip(&leaf.records) {
                if range.contains(key) {
                    entries.push((key.clone(), *record));
                } else if past_end(range.end_bound(), key) {
                    return Ok(entries);
                }
            }
            hops += 1;
            if hops > self.store.max_blocks() {
                return Err(self.corrupt("leaf chain loops".into()));
            }
            current = leaf.next.map(|b| self.load_leaf(b)).transpose()?;
        }
        Ok(entries)
    }

    /// All entries, ascending
    pub fn scan(&self) -> Result<Vec<(Key, BlockId)>> {
        self.range(..)
    }

    pub fn min_key(&self) -> Result<Option<Key>> {
        let head = self.meta.head.map(|b| self.load_leaf(b)).transpose()?;
        Ok(head.and_then(|leaf| leaf.keys.first().cloned()))
    }

    pub fn max_key(&self) -> Result<Option<Key>> {
        let tail = self.meta.tail.map(|b| self.load_leaf(b)).transpose()?;
        Ok(tail.and_then(|leaf| leaf.keys.last().cloned()))
    }

    // ==================== Insert ====================

    /// Map `key` to `record`. An existing key is rejected with
    /// `DuplicateKey` before anything is written.
    pub fn insert(&mut self, key: Key, record: BlockId) -> Result<()> {
        self.check_key(&key)?;
        let Some(mut leaf) = self.find_leaf(&key)? else {
            let mut leaf = self.new_leaf()?;
            leaf.insert(key, record);
            self.save_leaf(&leaf)?;
            self.meta = TreeMeta {
                root: Some(leaf.block),
                head: Some(leaf.block),
                tail: Some(leaf.block),
                depth: 1,
            };
            return Ok(());
        };
        if leaf.find(&key).is_some() {
            return Err(StorageError::DuplicateKey(key.to_string()));
        }
        if leaf.insert(key.clone(), record) {
            return self.save_leaf(&leaf);
        }

        let mut sibling = self.new_leaf()?;
        let separator = leaf.split(&mut sibling);
        sibling.parent = leaf.parent;
        if key < separator {
            leaf.insert(key, record);
        } else {
            sibling.insert(key, record);
        }
        match sibling.next {
            Some(next) => {
                let mut next = self.load_leaf(next)?;
                next.prev = Some(sibling.block);
                self.save_leaf(&next)?;
            }
            None => self.meta.tail = Some(sibling.block),
        }
        self.save_leaf(&leaf)?;
        self.save_leaf(&sibling)?;
        debug!(file = %self.file, left = leaf.block, right = sibling.block, %separator, "leaf split");

        self.insert_internal(leaf.block, leaf.parent, separator, sibling.block)
    }

    /// Hang `right` beside `left` in `left`'s parent under `key`, splitting
    /// upwards as needed and growing a new root at the top.
    fn insert_internal(
        &mut self,
        left: BlockId,
        left_parent: Option<BlockId>,
        key: Key,
        right: BlockId,
    ) -> Result<()> {
        if Some(left) == self.meta.root {
            let mut root = self.new_internal()?;
            root.keys.push(key);
            root.children.extend([left, right]);
            self.save_internal(&root)?;
            self.set_parent(left, Some(root.block))?;
            self.set_parent(right, Some(root.block))?;
            self.meta.root = Some(root.block);
            self.meta.depth += 1;
            debug!(file = %self.file, root = root.block, depth = self.meta.depth, "new root");
            return Ok(());
        }

        // `key` lies in the range `left` covered before the split.
        let mut node = self
            .resolve_parent(left, left_parent, &key)?
            .ok_or_else(|| self.corrupt(format!("block {} has no parent", left)))?;
        if node.insert(key.clone(), right) {
            self.save_internal(&node)?;
            return self.set_parent(right, Some(node.block));
        }

        let mut brother = self.new_internal()?;
        brother.parent = node.parent;
        let up = node.split(&mut brother, &key);
        if brother.needs_first_child() {
            brother.children.insert(0, right);
        } else if key < up {
            node.insert(key, right);
        } else {
            brother.insert(key, right);
        }
        self.save_internal(&node)?;
        self.save_internal(&brother)?;
        for child in &brother.children {
            self.set_parent(*child, Some(brother.block))?;
        }
        if node.position_of(right).is_some() {
            self.set_parent(right, Some(node.block))?;
        }
        debug!(file = %self.file, left = node.block, right = brother.block, %up, "internal split");

        self.insert_internal(node.block, node.parent, up, brother.block)
    }

    // ==================== Delete ====================

    /// Remove `key` and free its record block. Returns false if absent.
    pub fn delete(&mut self, key: &Key) -> Result<bool> {
        self.check_key(key)?;
        let Some(mut leaf) = self.find_leaf(key)? else {
            return Ok(false);
        };
        let was_min = leaf.first_key() == Some(key);
        let Some(record) = leaf.delete(key) else {
            return Ok(false);
        };
        self.store.release_block(&self.file, record)?;

        let outcome = self.rebalance_leaf(leaf, key, was_min)?;
        if outcome != Rebalance::Balanced {
            debug!(file = %self.file, %key, ?outcome, "rebalanced after delete");
        }
        Ok(true)
    }

    /// Persist a leaf that just lost `route` and restore the fill invariant
    fn rebalance_leaf(&mut self, mut leaf: LeafNode, route: &Key, was_min: bool) -> Result<Rebalance> {
        let order = self.layout.order;
        if Some(leaf.block) == self.meta.root {
            if leaf.keys.is_empty() {
                self.free_node(leaf.block)?;
                self.meta = TreeMeta::default();
                return Ok(Rebalance::Collapsed);
            }
            self.save_leaf(&leaf)?;
            return Ok(Rebalance::Balanced);
        }

        let Some(mut parent) = self.resolve_parent(leaf.block, leaf.parent, route)? else {
            self.save_leaf(&leaf)?;
            return Ok(self.orphaned(leaf.block));
        };
        leaf.parent = Some(parent.block);

        if leaf.count() >= order {
            self.save_leaf(&leaf)?;
            if was_min {
                if let Some(first) = leaf.first_key().cloned() {
                    self.refresh_separator(parent, route, first)?;
                }
            }
            return Ok(Rebalance::Balanced);
        }

        let Some((idx, side, sibling_block)) = Self::sibling_of(&parent, leaf.block) else {
            self.save_leaf(&leaf)?;
            return Ok(self.orphaned(leaf.block));
        };
        let mut sibling = self.load_leaf(sibling_block)?;

        if sibling.count() > order && leaf.move_one_element(&mut sibling, side) {
            match side {
                Side::Right => parent.keys[idx] = sibling.keys[0].clone(),
                Side::Left => parent.keys[idx - 1] = leaf.keys[0].clone(),
            }
            self.save_leaf(&leaf)?;
            self.save_leaf(&sibling)?;
            self.save_internal(&parent)?;
            self.borrows += 1;
            return Ok(Rebalance::Borrowed);
        }

        // Merge into whichever of the two holds the smaller keys.
        let (mut left, right) = match side {
            Side::Right => (leaf, sibling),
            Side::Left => (sibling, leaf),
        };
        if !left.combine(&right) {
            return Err(self.corrupt(format!(
                "leaves {} and {} do not fit in one node",
                left.block, right.block
            )));
        }
        left.next = right.next;
        match right.next {
            Some(next) => {
                let mut next = self.load_leaf(next)?;
                next.prev = Some(left.block);
                self.save_leaf(&next)?;
            }
            None => self.meta.tail = Some(left.block),
        }
        self.save_leaf(&left)?;
        self.free_node(right.block)?;
        self.merges += 1;

        self.delete_internal(parent, right.block, route)?;
        Ok(Rebalance::Merged)
    }

    /// Replace the separator equal to `old` above a leaf whose minimum moved
    /// from `old` to `new`.
    fn refresh_separator(&mut self, mut node: InternalNode, old: &Key, new: Key) -> Result<()> {
        for _ in 0..self.meta.depth {
            if let Some(slot) = node.keys.iter().position(|k| k == old) {
                node.keys[slot] = new;
                return self.save_internal(&node);
            }
            match self.resolve_parent(node.block, node.parent, &new)? {
                Some(parent) => node = parent,
                None => break,
            }
        }
        Ok(())
    }

    /// Drop the child `removed` (already merged away) from `node` and
    /// rebalance `node` in turn.
    fn delete_internal(&mut self, mut node: InternalNode, removed: BlockId, route: &Key) -> Result<Rebalance> {
        let order = self.layout.order;
        node.remove_child(removed);

        if Some(node.block) == self.meta.root {
            if !node.keys.is_empty() {
                self.save_internal(&node)?;
                return Ok(Rebalance::Balanced);
            }
            let child = *node
                .children
                .first()
                .ok_or_else(|| self.corrupt(format!("root {} has no children", node.block)))?;
            self.set_parent(child, None)?;
            self.free_node(node.block)?;
            self.meta.root = Some(child);
            self.meta.depth = self.meta.depth.saturating_sub(1);
            debug!(file = %self.file, root = child, depth = self.meta.depth, "root collapsed");
            return Ok(Rebalance::Collapsed);
        }

        let Some(mut parent) = self.resolve_parent(node.block, node.parent, route)? else {
            self.save_internal(&node)?;
            return Ok(self.orphaned(node.block));
        };
        node.parent = Some(parent.block);

        if node.count() >= order {
            self.save_internal(&node)?;
            return Ok(Rebalance::Balanced);
        }

        let Some((idx, side, sibling_block)) = Self::sibling_of(&parent, node.block) else {
            self.save_internal(&node)?;
            return Ok(self.orphaned(node.block));
        };
        let mut sibling = self.load_internal(sibling_block)?;

        if sibling.count() > order {
            let moved = match side {
                Side::Right => {
                    let separator = self.subtree_min(sibling.children[0])?;
                    let moved = node
                        .move_one_element(&mut sibling, Side::Right, separator)
                        .ok_or_else(|| self.corrupt(format!("cannot borrow from {}", sibling.block)))?;
                    parent.keys[idx] = self.subtree_min(sibling.children[0])?;
                    moved
                }
                Side::Left => {
                    let separator = self.subtree_min(node.children[0])?;
                    let moved = node
                        .move_one_element(&mut sibling, Side::Left, separator)
                        .ok_or_else(|| self.corrupt(format!("cannot borrow from {}", sibling.block)))?;
                    parent.keys[idx - 1] = self.subtree_min(moved)?;
                    moved
                }
            };
            self.save_internal(&node)?;
            self.save_internal(&sibling)?;
            self.save_internal(&parent)?;
            self.set_parent(moved, Some(node.block))?;
            self.borrows += 1;
            return Ok(Rebalance::Borrowed);
        }

        let (mut left, right) = match side {
            Side::Right => (node, sibling),
            Side::Left => (sibling, node),
        };
        let first = *right
            .children
            .first()
            .ok_or_else(|| self.corrupt(format!("internal node {} has no children", right.block)))?;
        let separator = self.subtree_min(first)?;
        if !left.combine(&right, separator) {
            return Err(self.corrupt(format!(
                "internal nodes {} and {} do not fit in one node",
                left.block, right.block
            )));
        }
        self.save_internal(&left)?;
        for child in &right.children {
            self.set_parent(*child, Some(left.block))?;
        }
        self.free_node(right.block)?;
        self.merges += 1;
        debug!(file = %self.file, into = left.block, absorbed = right.block, "internal merge");

        self.delete_internal(parent, right.block, route)?;
        Ok(Rebalance::Merged)
    }

    // ==================== Whole tree ====================

    /// Free every node and record block, leaving an empty tree. Returns the
    /// number of records freed.
    ///
    /// The tree is detached first, so a failure part way leaks blocks but
    /// never leaves the header pointing at freed nodes.
    pub fn clear(&mut self) -> Result<usize> {
        let mut pending: Vec<BlockId> = self.meta.root.into_iter().collect();
        self.meta = TreeMeta::default();

        let mut freed = 0;
        while let Some(block) = pending.pop() {
            match self.load(block)? {
                Node::Internal(node) => pending.extend(node.children),
                Node::Leaf(leaf) => {
                    for record in leaf.records {
                        self.store.release_block(&self.file, record)?;
                        freed += 1;
                    }
                }
            }
            self.free_node(block)?;
        }
        debug!(file = %self.file, freed, "tree cleared");
        Ok(freed)
    }

    /// Shape counters from a full traversal
    pub fn stats(&self) -> Result<TreeStats> {
        let mut stats = self.empty_stats();
        let mut pending: Vec<BlockId> = self.meta.root.into_iter().collect();
        while let Some(block) = pending.pop() {
            match self.load(block)? {
                Node::Internal(node) => {
                    stats.internal_nodes += 1;
                    pending.extend(node.children);
                }
                Node::Leaf(leaf) => {
                    stats.leaves += 1;
                    stats.keys += leaf.count();
                }
            }
            if stats.internal_nodes + stats.leaves > self.store.max_blocks() {
                return Err(self.corrupt("node graph loops".into()));
            }
        }
        Ok(stats)
    }

    fn empty_stats(&self) -> TreeStats {
        TreeStats {
            depth: self.meta.depth,
            borrows: self.borrows,
            merges: self.merges,
            orphaned_rebalances: self.orphaned_rebalances,
            ..Default::default()
        }
    }

    /// Verify ordering, separator bounds, fill factor, uniform leaf depth,
    /// parent pointers, block tags and the leaf chain. The first violation
    /// is returned as `Corruption`.
    pub fn check_tree(&self) -> Result<TreeStats> {
        let mut stats = self.empty_stats();
        let Some(root) = self.meta.root else {
            if self.meta.head.is_some() || self.meta.tail.is_some() || self.meta.depth != 0 {
                return Err(self.corrupt(format!("empty tree with meta {:?}", self.meta)));
            }
            return Ok(stats);
        };

        let graph = self.store.read_graph(&self.file)?;
        let order = self.layout.order;
        let mut leaves: Vec<LeafNode> = Vec::new();
        let mut pending = vec![Visit {
            block: root,
            parent: None,
            low: None,
            high: None,
            level: 1,
        }];

        while let Some(visit) = pending.pop() {
            if visit.level > self.meta.depth {
                return Err(self.corrupt(format!(
                    "block {} sits below depth {}",
                    visit.block, self.meta.depth
                )));
            }
            let node = self.load(visit.block)?;
            if node.parent() != visit.parent {
                return Err(self.corrupt(format!(
                    "node {} records parent {:?}, expected {:?}",
                    visit.block,
                    node.parent(),
                    visit.parent
                )));
            }
            let keys = node.keys();
            if keys.windows(2).any(|w| w[0] >= w[1]) {
                return Err(self.corrupt(format!("node {} keys out of order", visit.block)));
            }
            if let (Some(low), Some(first)) = (&visit.low, keys.first()) {
                if first < low {
                    return Err(self.corrupt(format!(
                        "node {} key {} below separator {}",
                        visit.block, first, low
                    )));
                }
            }
            if let (Some(high), Some(last)) = (&visit.high, keys.last()) {
                if last >= high {
                    return Err(self.corrupt(format!(
                        "node {} key {} not below separator {}",
                        visit.block, last, high
                    )));
                }
            }
            let is_root = visit.block == root;

            match node {
                Node::Internal(node) => {
                    if graph.get(node.block) != BlockType::Internal {
                        return Err(self.corrupt(format!(
                            "internal node {} tagged {:?}",
                            node.block,
                            graph.get(node.block)
                        )));
                    }
                    if node.keys.is_empty() || (!is_root && node.count() < order) {
                        return Err(self.corrupt(format!(
                            "internal node {} holds {} keys, minimum is {}",
                            node.block,
                            node.count(),
                            if is_root { 1 } else { order }
                        )));
                    }
                    stats.internal_nodes += 1;
                    // Pushed right to left so leaves come off the stack in order.
                    for i in (0..node.children.len()).rev() {
                        pending.push(Visit {
                            block: node.children[i],
                            parent: Some(node.block),
                            low: if i == 0 {
                                visit.low.clone()
                            } else {
                                Some(node.keys[i - 1].clone())
                            },
                            high: node.keys.get(i).cloned().or_else(|| visit.high.clone()),
                            level: visit.level + 1,
                        });
                    }
                }
                Node::Leaf(leaf) => {
                    if graph.get(leaf.block) != BlockType::Leaf {
                        return Err(self.corrupt(format!(
                            "leaf {} tagged {:?}",
                            leaf.block,
                            graph.get(leaf.block)
                        )));
                    }
                    if visit.level != self.meta.depth {
                        return Err(self.corrupt(format!(
                            "leaf {} at level {}, depth is {}",
                            leaf.block, visit.level, self.meta.depth
                        )));
                    }
                    let minimum = if is_root { 1 } else { order };
                    if leaf.count() < minimum {
                        return Err(self.corrupt(format!(
                            "leaf {} holds {} keys, minimum is {}",
                            leaf.block,
                            leaf.count(),
                            minimum
                        )));
                    }
                    if let Some(record) = leaf.records.iter().find(|r| graph.get(**r) != BlockType::Record) {
                        return Err(self.corrupt(format!(
                            "leaf {} points at block {} tagged {:?}",
                            leaf.block,
                            record,
                            graph.get(*record)
                        )));
                    }
                    stats.leaves += 1;
                    stats.keys += leaf.count();
                    leaves.push(leaf);
                }
            }
        }

        self.check_leaf_chain(&leaves)?;
        Ok(stats)
    }

    fn check_leaf_chain(&self, leaves: &[LeafNode]) -> Result<()> {
        let first = leaves.first().map(|l| l.block);
        let last = leaves.last().map(|l| l.block);
        if self.meta.head != first || self.meta.tail != last {
            return Err(self.corrupt(format!(
                "head/tail {:?}/{:?}, leaves run {:?}..{:?}",
                self.meta.head, self.meta.tail, first, last
            )));
        }
        for (i, leaf) in leaves.iter().enumerate() {
            let prev = i.checked_sub(1).map(|p| leaves[p].block);
            let next = leaves.get(i + 1).map(|l| l.block);
            if leaf.prev != prev || leaf.next != next {
                return Err(self.corrupt(format!(
                    "leaf {} links {:?}/{:?}, expected {:?}/{:?}",
                    leaf.block, leaf.prev, leaf.next, prev, next
                )));
            }
        }
        for pair in leaves.windows(2) {
            if let (Some(max), Some(min)) = (pair[0].keys.last(), pair[1].keys.first()) {
                if max >= min {
                    return Err(self.corrupt(format!(
                        "leaf {} ends at {}, next leaf starts at {}",
                        pair[0].block, max, min
                    )));
                }
            }
        }
        Ok(())
    }
}

fn past_end(end: Bound<&Key>, key: &Key) -> bool {
    match end {
        Bound::Included(last) => key > last,
        Bound::Excluded(last) => key >= last,
        Bound::Unbounded => false,
    }
}
