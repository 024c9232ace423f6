//! Row filtering: predicates, connectors and assignments

pub mod predicate;

pub use predicate::{evaluate, Assignment, CompareOp, Logic, Predicate};
