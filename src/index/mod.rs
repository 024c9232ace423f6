//! Disk B+Tree index: node layout and the tree engine

pub mod btree;
pub mod node;

pub use btree::{BPlusTree, TreeMeta, TreeStats};
pub use node::{InternalNode, LeafNode, Node, NodeLayout, Side, NIL_BLOCK};
