//! A red-black ordered tree keyed by any totally ordered scalar.
//!
//! Insert, lookup and erase run in `O(log n)`. Equal keys are accepted and are placed in the
//! left subtree of an equal node on insertion.

pub mod data_structures;

pub use data_structures::rbtree::{Color, InvariantViolation, NodeRef, RBTree, TreeError};
