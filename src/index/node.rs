//! B+Tree node layout and per-node mutation primitives
//!
//! Every node occupies exactly one block:
//!
//! ```text
//! [node_type:1][count:4][self:8][parent:8][prev:8][next:8]   header (37 bytes)
//! [key slot; 2V]                                              keys, fixed width
//! [u64; 2V+1] (internal children) | [u64; 2V] (leaf records)  pointers
//! ```
//!
//! Unused key slots hold the key type's sentinel, unused pointers are 0.
//! Block 0 is the table header, so 0 doubles as the "no block" marker.
//!
//! Primitives here are purely in-memory. Parent pointers of moved children,
//! leaf neighbours outside the two nodes involved and block allocation are
//! the engine's job.

use crate::storage::BlockId;
use crate::types::{DataType, Key, Value};
use crate::{Result, StorageError};

/// On-disk marker for "no block"
pub const NIL_BLOCK: BlockId = 0;

const NODE_INTERNAL: u8 = 1;
const NODE_LEAF: u8 = 2;

const HEADER_LEN: usize = 1 + 4 + 8 * 4;

fn to_block(ptr: Option<BlockId>) -> BlockId {
    ptr.unwrap_or(NIL_BLOCK)
}

fn from_block(raw: BlockId) -> Option<BlockId> {
    (raw != NIL_BLOCK).then_some(raw)
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// Shape parameters shared by every node of one tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    /// Order V
    pub order: usize,
    pub key_type: DataType,
    pub block_size: usize,
}

impl NodeLayout {
    /// Fails if a full node would not fit in one block
    pub fn new(order: usize, key_type: DataType, block_size: usize) -> Result<Self> {
        if order == 0 {
            return Err(StorageError::InvalidArgument("order must be at least 1".into()));
        }
        let layout = Self {
            order,
            key_type,
            block_size,
        };
        if layout.node_size() > block_size {
            return Err(StorageError::InvalidArgument(format!(
                "order {} with {} keys needs {} bytes per node, block is {}",
                order,
                key_type.name(),
                layout.node_size(),
                block_size
            )));
        }
        Ok(layout)
    }

    pub fn max_keys(&self) -> usize {
        2 * self.order
    }

    /// Minimum fill of a non-root node
    pub fn min_keys(&self) -> usize {
        self.order
    }

    fn pointers_offset(&self) -> usize {
        HEADER_LEN + self.max_keys() * self.key_type.width()
    }

    /// Bytes used by a node (internal nodes are the larger kind)
    pub fn node_size(&self) -> usize {
        self.pointers_offset() + (self.max_keys() + 1) * 8
    }
}

/// Internal node: `keys.len() + 1 == children.len()` for any non-empty node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    pub block: BlockId,
    pub parent: Option<BlockId>,
    pub keys: Vec<Key>,
    pub children: Vec<BlockId>,
    order: usize,
}

/// Which side a sibling is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl InternalNode {
    pub fn new(block: BlockId, order: usize) -> Self {
        Self {
            block,
            parent: None,
            keys: Vec::with_capacity(2 * order),
            children: Vec::with_capacity(2 * order + 1),
            order,
        }
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() >= 2 * self.order
    }

    /// Child to follow for `key`: the number of separators <= key
    /// (ties go right).
    pub fn child_index(&self, key: &Key) -> usize {
        self.keys.partition_point(|k| k <= key)
    }

    pub fn position_of(&self, child: BlockId) -> Option<usize> {
        self.children.iter().position(|c| *c == child)
    }

    /// Insert `key` with `child` as its right-hand pointer.
    ///
    /// Returns false when the node is full (split first). The caller records
    /// this node as the child's parent.
    pub fn insert(&mut self, key: Key, child: BlockId) -> bool {
        if self.is_full() {
            return false;
        }
        let i = self.child_index(&key);
        self.keys.insert(i, key);
        self.children.insert(i + 1, child);
        true
    }

    /// Remove the separator routing `key` together with its right-hand child.
    /// Returns the removed child, or None if `key` routes to the first child.
    pub fn delete(&mut self, key: &Key) -> Option<BlockId> {
        let i = self.child_index(key);
        if i == 0 {
            return None;
        }
        self.keys.remove(i - 1);
        Some(self.children.remove(i))
    }

    /// Remove `child` and the separator bounding it (its left one, or the
    /// first key when it is the first child). Returns the removed separator.
    pub fn remove_child(&mut self, child: BlockId) -> Option<Key> {
        let idx = self.position_of(child)?;
        self.children.remove(idx);
        if self.keys.is_empty() {
            return None;
        }
        Some(self.keys.remove(idx.saturating_sub(1)))
    }

    /// Split a full node around `inserting` (which is not yet in the node).
    ///
    /// - `inserting` strictly between keys V and V+1: even V/V split and
    ///   `inserting` itself is returned for the parent.
    /// - otherwise key V (inserting smaller) or key V+1 (inserting larger) is
    ///   pulled out and returned; the side left with V-1 keys receives the
    ///   new key afterwards.
    ///
    /// In the even case `new_node` gets V keys and only V children: the
    /// caller attaches the new right child as its first pointer.
    pub fn split(&mut self, new_node: &mut InternalNode, inserting: &Key) -> Key {
        let v = self.order;
        if self.keys[v - 1] < *inserting && *inserting < self.keys[v] {
            new_node.keys = self.keys.split_off(v);
            new_node.children = self.children.split_off(v + 1);
            return inserting.clone();
        }
        // 0-based index of the key pushed up
        let pos = if *inserting < self.keys[v - 1] { v - 1 } else { v };
        new_node.keys = self.keys.split_off(pos + 1);
        new_node.children = self.children.split_off(pos + 1);
        self.keys.pop().unwrap_or_else(|| inserting.clone())
    }

    /// After an even split the new node holds V keys but only V children
    /// until the caller attaches the pending right child in front.
    pub fn needs_first_child(&self) -> bool {
        !self.keys.is_empty() && self.children.len() == self.keys.len()
    }

    /// Absorb `other` (the right neighbour), with `separator` (the smallest
    /// key under `other`) between the two key runs. Fails if over capacity.
    pub fn combine(&mut self, other: &InternalNode, separator: Key) -> bool {
        if self.count() + other.count() + 1 > 2 * self.order {
            return false;
        }
        self.keys.push(separator);
        self.keys.extend(other.keys.iter().cloned());
        self.children.extend(other.children.iter().copied());
        true
    }

    /// Borrow one child from `sibling`.
    ///
    /// From the left the sibling's last child becomes this node's first, and
    /// `separator` (smallest key under this node's old first child) goes in
    /// front. From the right the sibling's first child is appended behind
    /// `separator` (smallest key under the moved child). Returns the moved
    /// child.
    pub fn move_one_element(
        &mut self,
        sibling: &mut InternalNode,
        side: Side,
        separator: Key,
    ) -> Option<BlockId> {
        if sibling.keys.is_empty() || self.is_full() {
            return None;
        }
        match side {
            Side::Left => {
                let moved = sibling.children.pop()?;
                sibling.keys.pop();
                self.children.insert(0, moved);
                self.keys.insert(0, separator);
                Some(moved)
            }
            Side::Right => {
                let moved = sibling.children.remove(0);
                sibling.keys.remove(0);
                self.keys.push(separator);
                self.children.push(moved);
                Some(moved)
            }
        }
    }
}

/// Leaf node: sorted (key, record block) pairs plus neighbour links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    pub block: BlockId,
    pub parent: Option<BlockId>,
    pub keys: Vec<Key>,
    pub records: Vec<BlockId>,
    pub prev: Option<BlockId>,
    pub next: Option<BlockId>,
    order: usize,
}

impl LeafNode {
    pub fn new(block: BlockId, order: usize) -> Self {
        Self {
            block,
            parent: None,
            keys: Vec::with_capacity(2 * order),
            records: Vec::with_capacity(2 * order),
            prev: None,
            next: None,
            order,
        }
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() >= 2 * self.order
    }

    pub fn first_key(&self) -> Option<&Key> {
        self.keys.first()
    }

    pub fn find(&self, key: &Key) -> Option<BlockId> {
        self.keys
            .binary_search(key)
            .ok()
            .map(|i| self.records[i])
    }

    /// Sorted insert. Duplicates are not checked here.
    pub fn insert(&mut self, key: Key, record: BlockId) -> bool {
        if self.is_full() {
            return false;
        }
        let i = self.keys.partition_point(|k| k <= &key);
        self.keys.insert(i, key);
        self.records.insert(i, record);
        true
    }

    /// Remove `key`, returning its record block so the caller can free it
    pub fn delete(&mut self, key: &Key) -> Option<BlockId> {
        let i = self.keys.iter().position(|k| k == key)?;
        self.keys.remove(i);
        Some(self.records.remove(i))
    }

    /// Move the upper V entries into `new_leaf`, link it in after this leaf
    /// and return its first key as the separator. The old successor's `prev`
    /// link must be fixed by the caller.
    pub fn split(&mut self, new_leaf: &mut LeafNode) -> Key {
        let at = self.keys.len() - self.order.min(self.keys.len());
        new_leaf.keys = self.keys.split_off(at);
        new_leaf.records = self.records.split_off(at);
        new_leaf.prev = Some(self.block);
        new_leaf.next = self.next;
        self.next = Some(new_leaf.block);
        new_leaf.keys[0].clone()
    }

    /// Absorb all entries of `other`. Fails if over capacity.
    pub fn combine(&mut self, other: &LeafNode) -> bool {
        if self.count() + other.count() > 2 * self.order {
            return false;
        }
        for (key, record) in other.keys.iter().zip(&other.records) {
            self.insert(key.clone(), *record);
        }
        true
    }

    /// Borrow one entry from `sibling`: its last entry from the left or its
    /// first entry from the right.
    pub fn move_one_element(&mut self, sibling: &mut LeafNode, side: Side) -> bool {
        if sibling.keys.is_empty() || self.is_full() {
            return false;
        }
        let (key, record) = match side {
            Side::Left => match (sibling.keys.pop(), sibling.records.pop()) {
                (Some(k), Some(r)) => (k, r),
                _ => return false,
            },
            Side::Right => (sibling.keys.remove(0), sibling.records.remove(0)),
        };
        self.insert(key, record)
    }
}

/// Header fields shared by both node kinds
struct NodeHeader {
    node_type: u8,
    block: BlockId,
    parent: Option<BlockId>,
    prev: Option<BlockId>,
    next: Option<BlockId>,
}

fn encode_node(
    layout: &NodeLayout,
    header: NodeHeader,
    keys: &[Key],
    pointers: &[BlockId],
    pointer_slots: usize,
) -> Result<Vec<u8>> {
    if keys.len() > layout.max_keys() || pointers.len() > pointer_slots {
        return Err(StorageError::Corruption(format!(
            "node {} holds {} keys, capacity is {}",
            header.block,
            keys.len(),
            layout.max_keys()
        )));
    }
    let mut buf = vec![0u8; layout.block_size];
    buf[0] = header.node_type;
    buf[1..5].copy_from_slice(&(keys.len() as u32).to_le_bytes());
    buf[5..13].copy_from_slice(&header.block.to_le_bytes());
    buf[13..21].copy_from_slice(&to_block(header.parent).to_le_bytes());
    buf[21..29].copy_from_slice(&to_block(header.prev).to_le_bytes());
    buf[29..37].copy_from_slice(&to_block(header.next).to_le_bytes());

    let width = layout.key_type.width();
    let sentinel = layout.key_type.sentinel();
    for slot in 0..layout.max_keys() {
        let key = keys.get(slot).unwrap_or(&sentinel);
        let offset = HEADER_LEN + slot * width;
        key.encode_into(layout.key_type, &mut buf[offset..offset + width])?;
    }

    let base = layout.pointers_offset();
    for (slot, ptr) in pointers.iter().enumerate() {
        let offset = base + slot * 8;
        buf[offset..offset + 8].copy_from_slice(&ptr.to_le_bytes());
    }
    Ok(buf)
}

impl InternalNode {
    pub fn serialize(&self, layout: &NodeLayout) -> Result<Vec<u8>> {
        if !self.keys.is_empty() && self.children.len() != self.keys.len() + 1 {
            return Err(StorageError::Corruption(format!(
                "internal node {} has {} keys and {} children",
                self.block,
                self.keys.len(),
                self.children.len()
            )));
        }
        let header = NodeHeader {
            node_type: NODE_INTERNAL,
            block: self.block,
            parent: self.parent,
            prev: None,
            next: None,
        };
        encode_node(layout, header, &self.keys, &self.children, layout.max_keys() + 1)
    }
}

impl LeafNode {
    pub fn serialize(&self, layout: &NodeLayout) -> Result<Vec<u8>> {
        let header = NodeHeader {
            node_type: NODE_LEAF,
            block: self.block,
            parent: self.parent,
            prev: self.prev,
            next: self.next,
        };
        encode_node(layout, header, &self.keys, &self.records, layout.max_keys())
    }
}

/// A decoded node block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl Node {
    pub fn block(&self) -> BlockId {
        match self {
            Node::Internal(n) => n.block,
            Node::Leaf(n) => n.block,
        }
    }

    pub fn parent(&self) -> Option<BlockId> {
        match self {
            Node::Internal(n) => n.parent,
            Node::Leaf(n) => n.parent,
        }
    }

    pub fn set_parent(&mut self, parent: Option<BlockId>) {
        match self {
            Node::Internal(n) => n.parent = parent,
            Node::Leaf(n) => n.parent = parent,
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Node::Internal(n) => n.count(),
            Node::Leaf(n) => n.count(),
        }
    }

    pub fn keys(&self) -> &[Key] {
        match self {
            Node::Internal(n) => &n.keys,
            Node::Leaf(n) => &n.keys,
        }
    }

    /// Encode into a full block image
    pub fn serialize(&self, layout: &NodeLayout) -> Result<Vec<u8>> {
        match self {
            Node::Internal(n) => n.serialize(layout),
            Node::Leaf(n) => n.serialize(layout),
        }
    }

    /// Decode the node stored in `block`
    pub fn deserialize(block: BlockId, buf: &[u8], layout: &NodeLayout) -> Result<Node> {
        if buf.len() < layout.node_size() {
            return Err(StorageError::Corruption(format!(
                "node block {} is only {} bytes",
                block,
                buf.len()
            )));
        }
        let node_type = buf[0];
        let count = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if count > layout.max_keys() {
            return Err(StorageError::Corruption(format!(
                "node {} claims {} keys, capacity is {}",
                block,
                count,
                layout.max_keys()
            )));
        }
        let stored_self = read_u64(buf, 5);
        if stored_self != block {
            return Err(StorageError::Corruption(format!(
                "block {} holds node for block {}",
                block, stored_self
            )));
        }
        let parent = from_block(read_u64(buf, 13));

        let width = layout.key_type.width();
        let keys = (0..count)
            .map(|slot| {
                let offset = HEADER_LEN + slot * width;
                Value::decode(layout.key_type, &buf[offset..offset + width])
            })
            .collect::<Result<Vec<_>>>()?;

        let base = layout.pointers_offset();
        let pointer = |slot: usize| read_u64(buf, base + slot * 8);

        match node_type {
            NODE_INTERNAL => {
                let children = if count == 0 {
                    // A root left with one child mid-merge
                    match pointer(0) {
                        NIL_BLOCK => Vec::new(),
                        child => vec![child],
                    }
                } else {
                    (0..=count).map(pointer).collect()
                };
                Ok(Node::Internal(InternalNode {
                    block,
                    parent,
                    keys,
                    children,
                    order: layout.order,
                }))
            }
            NODE_LEAF => Ok(Node::Leaf(LeafNode {
                block,
                parent,
                keys,
                records: (0..count).map(pointer).collect(),
                prev: from_block(read_u64(buf, 21)),
                next: from_block(read_u64(buf, 29)),
                order: layout.order,
            })),
            other => Err(StorageError::Corruption(format!(
                "block {} has unknown node type {}",
                block, other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_layout() -> NodeLayout {
        NodeLayout::new(2, DataType::Int, 512).unwrap()
    }

    fn keys(values: &[i32]) -> Vec<Key> {
        values.iter().map(|v| Value::Int(*v)).collect()
    }

    fn internal(block: BlockId, ks: &[i32], children: &[BlockId]) -> InternalNode {
        let mut node = InternalNode::new(block, 2);
        node.keys = keys(ks);
        node.children = children.to_vec();
        node
    }

    fn leaf(block: BlockId, ks: &[i32]) -> LeafNode {
        let mut node = LeafNode::new(block, 2);
        for k in ks {
            node.insert(Value::Int(*k), 100 + *k as BlockId);
        }
        node
    }

    #[test]
    fn test_layout_sizes() {
        let layout = int_layout();
        assert_eq!(layout.max_keys(), 4);
        assert_eq!(layout.min_keys(), 2);
        assert_eq!(layout.node_size(), 37 + 4 * 4 + 5 * 8);
        assert!(NodeLayout::new(0, DataType::Int, 512).is_err());
        assert!(NodeLayout::new(100, DataType::Str(64), 512).is_err());
    }

    #[test]
    fn test_round_trip_leaf() {
        let layout = NodeLayout::new(2, DataType::Str(6), 512).unwrap();
        let mut node = LeafNode::new(7, 2);
        node.insert(Value::from("pear"), 11);
        node.insert(Value::from("apple"), 12);
        node.insert(Value::from("fig"), 13);
        node.parent = Some(3);
        node.prev = Some(5);
        node.next = None;

        let node = Node::Leaf(node);
        let bytes = node.serialize(&layout).unwrap();
        assert_eq!(bytes.len(), 512);
        let back = Node::deserialize(7, &bytes, &layout).unwrap();
        assert_eq!(back, node);
        assert_eq!(back.keys(), &[Value::from("apple"), Value::from("fig"), Value::from("pear")]);
    }

    #[test]
    fn test_round_trip_internal() {
        let layout = NodeLayout::new(2, DataType::BigInt, 512).unwrap();
        let mut node = InternalNode::new(9, 2);
        node.keys = vec![Value::BigInt(-5), Value::BigInt(1 << 40)];
        node.children = vec![2, 3, 4];
        let node = Node::Internal(node);

        let back = Node::deserialize(9, &node.serialize(&layout).unwrap(), &layout).unwrap();
        assert_eq!(back, node);
        assert_eq!(back.parent(), None);
    }

    #[test]
    fn test_unused_slots_hold_sentinels() {
        let layout = int_layout();
        let bytes = Node::Leaf(leaf(4, &[1])).serialize(&layout).unwrap();
        let second_slot = &bytes[37 + 4..37 + 8];
        assert_eq!(second_slot, &i32::MIN.to_le_bytes());
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let layout = int_layout();
        let mut bytes = Node::Leaf(leaf(4, &[1, 2])).serialize(&layout).unwrap();
        assert!(Node::deserialize(5, &bytes, &layout).is_err());

        bytes[1] = 9;
        assert!(Node::deserialize(4, &bytes, &layout).is_err());

        let zeroed = vec![0u8; 512];
        assert!(Node::deserialize(0, &zeroed, &layout).is_err());
    }

    #[test]
    fn test_internal_insert_and_routing() {
        let mut node = internal(1, &[10, 20], &[2, 3, 4]);
        assert_eq!(node.child_index(&Value::Int(5)), 0);
        assert_eq!(node.child_index(&Value::Int(10)), 1);
        assert_eq!(node.child_index(&Value::Int(25)), 2);

        assert!(node.insert(Value::Int(15), 9));
        assert_eq!(node.keys, keys(&[10, 15, 20]));
        assert_eq!(node.children, vec![2, 3, 9, 4]);

        assert!(node.insert(Value::Int(30), 8));
        assert!(node.is_full());
        assert!(!node.insert(Value::Int(40), 7));
    }

    #[test]
    fn test_internal_delete() {
        let mut node = internal(1, &[10, 20, 30], &[2, 3, 4, 5]);
        assert_eq!(node.delete(&Value::Int(21)), Some(4));
        assert_eq!(node.keys, keys(&[10, 30]));
        assert_eq!(node.children, vec![2, 3, 5]);
        assert_eq!(node.delete(&Value::Int(1)), None);

        assert_eq!(node.remove_child(2), Some(Value::Int(10)));
        assert_eq!(node.children, vec![3, 5]);
        assert_eq!(node.remove_child(99), None);
    }

    #[test]
    fn test_internal_split_even() {
        // keys 10 20 | 30 40, inserting 25 falls between 2nd and 3rd key
        let mut node = internal(1, &[10, 20, 30, 40], &[2, 3, 4, 5, 6]);
        let mut brother = InternalNode::new(7, 2);
        let up = node.split(&mut brother, &Value::Int(25));
        assert_eq!(up, Value::Int(25));
        assert_eq!(node.keys, keys(&[10, 20]));
        assert_eq!(node.children, vec![2, 3, 4]);
        assert_eq!(brother.keys, keys(&[30, 40]));
        assert_eq!(brother.children, vec![5, 6]);
        assert!(brother.needs_first_child());
        brother.children.insert(0, 9);
        assert!(!brother.needs_first_child());
    }

    #[test]
    fn test_internal_split_low() {
        let mut node = internal(1, &[10, 20, 30, 40], &[2, 3, 4, 5, 6]);
        let mut brother = InternalNode::new(7, 2);
        let up = node.split(&mut brother, &Value::Int(5));
        assert_eq!(up, Value::Int(20));
        assert_eq!(node.keys, keys(&[10]));
        assert_eq!(node.children, vec![2, 3]);
        assert_eq!(brother.keys, keys(&[30, 40]));
        assert_eq!(brother.children, vec![4, 5, 6]);
        // smaller side takes the new key
        assert!(node.insert(Value::Int(5), 9));
        assert_eq!(node.children, vec![2, 9, 3]);
    }

    #[test]
    fn test_internal_split_high() {
        let mut node = internal(1, &[10, 20, 30, 40], &[2, 3, 4, 5, 6]);
        let mut brother = InternalNode::new(7, 2);
        let up = node.split(&mut brother, &Value::Int(35));
        assert_eq!(up, Value::Int(30));
        assert_eq!(node.keys, keys(&[10, 20]));
        assert_eq!(node.children, vec![2, 3, 4]);
        assert_eq!(brother.keys, keys(&[40]));
        assert_eq!(brother.children, vec![5, 6]);
        assert!(!brother.needs_first_child());
    }

    #[test]
    fn test_internal_combine_and_borrow() {
        let mut left = internal(1, &[10], &[2, 3]);
        let right = internal(8, &[40], &[5, 6]);
        assert!(left.combine(&right, Value::Int(30)));
        assert_eq!(left.keys, keys(&[10, 30, 40]));
        assert_eq!(left.children, vec![2, 3, 5, 6]);

        let too_big = internal(9, &[50, 60], &[7, 8, 9]);
        assert!(!left.combine(&too_big, Value::Int(45)));

        // Borrow from the left: left's last child moves in front
        let mut node = internal(10, &[80], &[11, 12]);
        let moved = node.move_one_element(&mut left, Side::Left, Value::Int(70));
        assert_eq!(moved, Some(6));
        assert_eq!(left.keys, keys(&[10, 30]));
        assert_eq!(left.children, vec![2, 3, 5]);
        assert_eq!(node.keys, keys(&[70, 80]));
        assert_eq!(node.children, vec![6, 11, 12]);

        // Borrow from the right: right's first child is appended
        let mut right = internal(13, &[95, 97], &[14, 15, 16]);
        let moved = node.move_one_element(&mut right, Side::Right, Value::Int(90));
        assert_eq!(moved, Some(14));
        assert_eq!(node.keys, keys(&[70, 80, 90]));
        assert_eq!(node.children, vec![6, 11, 12, 14]);
        assert_eq!(right.keys, keys(&[97]));
        assert_eq!(right.children, vec![15, 16]);
    }

    #[test]
    fn test_leaf_insert_delete_find() {
        let mut node = leaf(3, &[5, 1, 3]);
        assert_eq!(node.keys, keys(&[1, 3, 5]));
        assert_eq!(node.find(&Value::Int(3)), Some(103));
        assert_eq!(node.find(&Value::Int(4)), None);

        assert_eq!(node.delete(&Value::Int(3)), Some(103));
        assert_eq!(node.delete(&Value::Int(3)), None);
        assert_eq!(node.keys, keys(&[1, 5]));
        assert_eq!(node.records, vec![101, 105]);
    }

    #[test]
    fn test_leaf_split_links() {
        let mut node = leaf(3, &[1, 2, 3, 4]);
        node.next = Some(20);
        let mut new_leaf = LeafNode::new(8, 2);
        let sep = node.split(&mut new_leaf);
        assert_eq!(sep, Value::Int(3));
        assert_eq!(node.keys, keys(&[1, 2]));
        assert_eq!(new_leaf.keys, keys(&[3, 4]));
        assert_eq!(new_leaf.records, vec![103, 104]);
        assert_eq!(node.next, Some(8));
        assert_eq!(new_leaf.prev, Some(3));
        assert_eq!(new_leaf.next, Some(20));
    }

    #[test]
    fn test_leaf_combine_and_borrow() {
        let mut left = leaf(3, &[1, 2]);
        let right = leaf(4, &[5]);
        assert!(left.combine(&right));
        assert_eq!(left.keys, keys(&[1, 2, 5]));
        assert!(!left.combine(&leaf(5, &[7, 8])));

        let mut node = leaf(6, &[9]);
        assert!(node.move_one_element(&mut left, Side::Left));
        assert_eq!(node.keys, keys(&[5, 9]));
        assert_eq!(left.keys, keys(&[1, 2]));

        let mut right = leaf(7, &[20, 21, 22]);
        assert!(node.move_one_element(&mut right, Side::Right));
        assert_eq!(node.keys, keys(&[5, 9, 20]));
        assert_eq!(right.keys, keys(&[21, 22]));
    }
}
