use std::alloc::{alloc, Layout};
use std::ptr::NonNull;

use log::{error, trace};

use super::TreeError;

pub(super) type Link<K> = Option<NonNull<Node<K>>>;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Color {
    Red,
    Black,
}

/// Which child slot of a parent a node occupies.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(super) enum Side {
    Left,
    Right,
}

impl Side {
    pub(super) fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// A tree node. `left` and `right` own their subtrees; `parent` is a back-pointer and never
/// owns anything.
///
/// Every function taking a `NonNull<Node<K>>` expects a node that is currently linked into a
/// live tree, so all of its links are either absent or point at live nodes.
pub(super) struct Node<K> {
    pub(super) key: K,
    pub(super) color: Color,
    pub(super) parent: Link<K>,
    pub(super) left: Link<K>,
    pub(super) right: Link<K>,
}

impl<K> Node<K> {
    /// Allocates a detached red leaf. Nothing references it until the caller links it in.
    pub(super) fn new(key: K) -> Result<NonNull<Node<K>>, TreeError> {
        let layout = Layout::new::<Node<K>>();
        let raw = unsafe { alloc(layout) } as *mut Node<K>;
        let Some(node) = NonNull::new(raw) else {
            error!("allocation of {} bytes for a tree node failed", layout.size());
            return Err(TreeError::AllocationError);
        };
        unsafe {
            node.as_ptr().write(Node {
                key,
                color: Color::Red,
                parent: None,
                left: None,
                right: None,
            });
        }
        Ok(node)
    }

    /// Releases a node that has already been unlinked and hands back its key. Children are not
    /// visited.
    pub(super) fn free(node: NonNull<Node<K>>) -> K {
        // `new` allocated with the global allocator and the layout of `Node<K>`, which is
        // exactly what `Box` expects.
        let boxed = unsafe { Box::from_raw(node.as_ptr()) };
        boxed.key
    }

    /// Absent children count as black.
    pub(super) fn color_of(link: Link<K>) -> Color {
        match link {
            Some(node) => unsafe { (*node.as_ptr()).color },
            None => Color::Black,
        }
    }

    pub(super) fn child(node: NonNull<Node<K>>, side: Side) -> Link<K> {
        unsafe {
            match side {
                Side::Left => (*node.as_ptr()).left,
                Side::Right => (*node.as_ptr()).right,
            }
        }
    }

    pub(super) fn set_child(node: NonNull<Node<K>>, side: Side, child: Link<K>) {
        unsafe {
            match side {
                Side::Left => (*node.as_ptr()).left = child,
                Side::Right => (*node.as_ptr()).right = child,
            }
        }
    }

    /// The side of `parent` that `child` hangs from. `child` may be absent, in which case the
    /// first empty slot is reported.
    pub(super) fn side_of(parent: NonNull<Node<K>>, child: Link<K>) -> Side {
        if Self::child(parent, Side::Left) == child {
            Side::Left
        } else {
            Side::Right
        }
    }

    /// Follows `side` links from `node` until there is nowhere left to go.
    pub(super) fn extreme(mut node: NonNull<Node<K>>, side: Side) -> NonNull<Node<K>> {
        while let Some(next) = Self::child(node, side) {
            node = next;
        }
        node
    }

    /// Points whatever referenced `old` (its parent's child slot, or the root) at `new`.
    /// `new`'s own parent pointer is left to the caller.
    pub(super) fn replace_in_parent(
        root: &mut Link<K>,
        parent: Link<K>,
        old: NonNull<Node<K>>,
        new: Link<K>,
    ) {
        match parent {
            None => *root = new,
            Some(parent) => {
                let side = Self::side_of(parent, Some(old));
                Self::set_child(parent, side, new);
            }
        }
    }

    /// Rotates `node` down toward `side`. Its child on the opposite side rises into its place
    /// and is returned; the in-order sequence is unchanged.
    pub(super) fn rotate(
        root: &mut Link<K>,
        node: NonNull<Node<K>>,
        side: Side,
    ) -> NonNull<Node<K>> {
        let Some(pivot) = Self::child(node, side.opposite()) else {
            unreachable!("rotation requires a child on the rising side");
        };
        trace!("rotating {:?} at {:p}", side, node);
        unsafe {
            let inner = Self::child(pivot, side);
            Self::set_child(node, side.opposite(), inner);
            if let Some(inner) = inner {
                (*inner.as_ptr()).parent = Some(node);
            }

            let parent = (*node.as_ptr()).parent;
            (*pivot.as_ptr()).parent = parent;
            Self::replace_in_parent(root, parent, node, Some(pivot));

            Self::set_child(pivot, side, Some(node));
            (*node.as_ptr()).parent = Some(pivot);
        }
        pivot
    }

    pub(super) fn swap_colors(a: NonNull<Node<K>>, b: NonNull<Node<K>>) {
        unsafe {
            let color = (*a.as_ptr()).color;
            (*a.as_ptr()).color = (*b.as_ptr()).color;
            (*b.as_ptr()).color = color;
        }
    }
}
