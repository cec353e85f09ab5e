use std::ptr::NonNull;

use super::node::{Color, Link, Node};
use super::RBTree;

/// A structural rule of the red-black tree that does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("the root is red")]
    RedRoot,

    #[error("a red node has a red child")]
    RedChildOfRed,

    #[error("black height differs between paths: {left} on the left, {right} on the right")]
    BlackHeightMismatch { left: usize, right: usize },

    #[error("in-order key sequence decreases")]
    OutOfOrder,

    #[error("a child does not point back at its parent")]
    BrokenParentLink,

    #[error("tree reports {reported} nodes but holds {counted}")]
    LengthMismatch { reported: usize, counted: usize },
}

impl<K: Ord> RBTree<K> {
    /// Walks the whole tree and checks every red-black rule, the ordering of keys, parent
    /// back-pointers and the node count.
    ///
    /// Returns the black height of the root (0 for an empty tree).
    pub fn check_invariants(&self) -> Result<usize, InvariantViolation> {
        if Node::color_of(self.root) == Color::Red {
            return Err(InvariantViolation::RedRoot);
        }
        if let Some(root) = self.root {
            if unsafe { (*root.as_ptr()).parent.is_some() } {
                return Err(InvariantViolation::BrokenParentLink);
            }
        }

        let mut counted = 0;
        let mut previous: Option<&K> = None;
        let black_height = Self::check_subtree(self.root, &mut counted, &mut previous)?;

        if counted != self.len {
            return Err(InvariantViolation::LengthMismatch {
                reported: self.len,
                counted,
            });
        }
        Ok(black_height)
    }

    /// In-order walk returning the black height of `link`, counting `link` itself when black.
    fn check_subtree<'a>(
        link: Link<K>,
        counted: &mut usize,
        previous: &mut Option<&'a K>,
    ) -> Result<usize, InvariantViolation>
    where
        K: 'a,
    {
        let Some(node) = link else {
            return Ok(0);
        };
        let (left, right, color) = unsafe {
            let n = node.as_ptr();
            ((*n).left, (*n).right, (*n).color)
        };

        for child in [left, right].into_iter().flatten() {
            if Self::parent_of(child) != Some(node) {
                return Err(InvariantViolation::BrokenParentLink);
            }
            if color == Color::Red && Node::color_of(Some(child)) == Color::Red {
                return Err(InvariantViolation::RedChildOfRed);
            }
        }

        let left_height = Self::check_subtree(left, counted, previous)?;

        let key: &'a K = unsafe { &(*node.as_ptr()).key };
        if previous.is_some_and(|previous| previous > key) {
            return Err(InvariantViolation::OutOfOrder);
        }
        *previous = Some(key);
        *counted += 1;

        let right_height = Self::check_subtree(right, counted, previous)?;

        if left_height != right_height {
            return Err(InvariantViolation::BlackHeightMismatch {
                left: left_height,
                right: right_height,
            });
        }
        Ok(left_height + usize::from(color == Color::Black))
    }

    fn parent_of(node: NonNull<Node<K>>) -> Link<K> {
        unsafe { (*node.as_ptr()).parent }
    }
}
