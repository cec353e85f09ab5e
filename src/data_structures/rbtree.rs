//! Red-black tree over raw, individually allocated nodes.
//!
//! Child links own their subtrees and parent links are plain back-pointers. Equal keys are
//! accepted: on insertion a key that compares equal to a node descends into that node's left
//! subtree. Which of several equal nodes [`RBTree::find`] reports is unspecified.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

use log::{debug, trace};

#[cfg(test)]
mod alloc_failure;
mod error;
mod node;
mod validate;

pub use error::TreeError;
pub use node::Color;
pub use validate::InvariantViolation;

use node::{Link, Node, Side};

pub struct RBTree<K: Ord> {
    root: Link<K>,
    len: usize,
    _owns: PhantomData<Box<Node<K>>>,
}

// The tree owns its nodes outright and has no interior mutability, so it is as thread-safe as
// its keys. Callers that share it across threads serialise access themselves.
unsafe impl<K: Ord + Send> Send for RBTree<K> {}
unsafe impl<K: Ord + Sync> Sync for RBTree<K> {}

/// A handle to a node, as returned by [`RBTree::insert`], [`RBTree::find`], [`RBTree::min`] and
/// [`RBTree::max`].
///
/// The handle keeps its own copy of the key and remembers which node it came from. The node
/// address is only ever compared, never followed, so holding a handle past the node's removal
/// is harmless: [`RBTree::erase`] looks the key up again before touching anything.
#[derive(Clone)]
pub struct NodeRef<K> {
    key: K,
    node: NonNull<Node<K>>,
}

unsafe impl<K: Send> Send for NodeRef<K> {}
unsafe impl<K: Sync> Sync for NodeRef<K> {}

impl<K> NodeRef<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn into_key(self) -> K {
        self.key
    }

    /// Whether both handles were taken from the same node.
    pub fn same_node(&self, other: &NodeRef<K>) -> bool {
        self.node == other.node
    }
}

impl<K: fmt::Debug> fmt::Debug for NodeRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("key", &self.key)
            .field("node", &self.node)
            .finish()
    }
}

impl<K: Ord> RBTree<K> {
    pub fn new() -> Self {
        Self {
            root: None,
            len: 0,
            _owns: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Releases every node, leaving an empty tree.
    ///
    /// Nodes are visited post-order with an explicit stack, so teardown never recurses no matter
    /// how the tree is shaped.
    pub fn clear(&mut self) {
        let Some(root) = self.root.take() else {
            return;
        };
        debug!("tearing down tree of {} nodes", self.len);

        let mut stack = vec![(root, false)];
        while let Some((node, children_done)) = stack.pop() {
            if children_done {
                Node::free(node);
                continue;
            }
            stack.push((node, true));
            unsafe {
                if let Some(right) = (*node.as_ptr()).right {
                    stack.push((right, false));
                }
                if let Some(left) = (*node.as_ptr()).left {
                    stack.push((left, false));
                }
            }
        }
        self.len = 0;
    }

    /// Returns a node holding `key`, if there is one.
    pub fn find(&self, key: &K) -> Option<NodeRef<K>>
    where
        K: Clone,
    {
        self.find_node(key).map(Self::handle)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.find_node(key).is_some()
    }

    pub fn min(&self) -> Option<NodeRef<K>>
    where
        K: Clone,
    {
        self.root.map(|root| Self::handle(Node::extreme(root, Side::Left)))
    }

    pub fn max(&self) -> Option<NodeRef<K>>
    where
        K: Clone,
    {
        self.root.map(|root| Self::handle(Node::extreme(root, Side::Right)))
    }

    /// Inserts `key` and returns a handle to its node. Duplicates are kept.
    ///
    /// The node is allocated before anything is linked, so an
    /// [`AllocationError`](TreeError::AllocationError) leaves the tree exactly as it was.
    pub fn insert(&mut self, key: K) -> Result<NodeRef<K>, TreeError>
    where
        K: Clone,
    {
        let mut parent = None;
        let mut side = Side::Left;
        let mut cur = self.root;
        while let Some(current) = cur {
            // Equal keys go left.
            let current_key = unsafe { &(*current.as_ptr()).key };
            side = if &key <= current_key {
                Side::Left
            } else {
                Side::Right
            };
            parent = cur;
            cur = Node::child(current, side);
        }

        let node = Node::new(key.clone())?;
        unsafe { (*node.as_ptr()).parent = parent };
        match parent {
            None => self.root = Some(node),
            Some(parent) => Node::set_child(parent, side, Some(node)),
        }
        self.len += 1;

        self.fix_after_insert(node);

        Ok(NodeRef { key, node })
    }

    /// Removes the node `node` refers to and returns its key.
    ///
    /// The key is looked up afresh. If the referenced node is still in the tree it is the one
    /// removed; otherwise any node with an equal key is. Fails with
    /// [`NotFound`](TreeError::NotFound), leaving the tree untouched, when no node holds the key.
    pub fn erase(&mut self, node: &NodeRef<K>) -> Result<K, TreeError> {
        let Some(target) = self.locate(&node.key, node.node) else {
            debug!("erase found no node for the requested key");
            return Err(TreeError::NotFound);
        };
        Ok(self.remove_node(target))
    }

    /// Removes one node holding `key` and returns the stored key.
    pub fn remove(&mut self, key: &K) -> Result<K, TreeError> {
        let Some(target) = self.find_node(key) else {
            debug!("remove found no node for the requested key");
            return Err(TreeError::NotFound);
        };
        Ok(self.remove_node(target))
    }

    /// Collects up to `limit` keys in ascending order.
    pub fn to_sorted_vec(&self, limit: usize) -> Vec<K>
    where
        K: Clone,
    {
        let mut keys = Vec::with_capacity(limit.min(self.len));
        self.walk_in_order(|key| {
            if keys.len() == limit {
                return false;
            }
            keys.push(key.clone());
            true
        });
        keys
    }

    /// Fills `out` with the smallest keys in ascending order and returns how many were written,
    /// which is the smaller of `out.len()` and the tree's length.
    pub fn to_sorted_slice(&self, out: &mut [K]) -> usize
    where
        K: Clone,
    {
        let mut written = 0;
        self.walk_in_order(|key| {
            let Some(slot) = out.get_mut(written) else {
                return false;
            };
            *slot = key.clone();
            written += 1;
            true
        });
        written
    }

    fn handle(node: NonNull<Node<K>>) -> NodeRef<K>
    where
        K: Clone,
    {
        NodeRef {
            key: unsafe { (*node.as_ptr()).key.clone() },
            node,
        }
    }

    fn find_node(&self, key: &K) -> Link<K> {
        let mut cur = self.root;
        while let Some(node) = cur {
            match key.cmp(unsafe { &(*node.as_ptr()).key }) {
                Ordering::Less => cur = Node::child(node, Side::Left),
                Ordering::Greater => cur = Node::child(node, Side::Right),
                Ordering::Equal => return cur,
            }
        }
        None
    }

    /// Finds `wanted` among the nodes whose key equals `key`, falling back to the first equal
    /// node met. Equal keys may sit on either side of each other after rebalancing, so every
    /// equal node's subtrees are searched.
    fn locate(&self, key: &K, wanted: NonNull<Node<K>>) -> Link<K> {
        let mut fallback = None;
        let mut stack: Vec<NonNull<Node<K>>> = self.root.into_iter().collect();
        while let Some(node) = stack.pop() {
            match key.cmp(unsafe { &(*node.as_ptr()).key }) {
                Ordering::Less => stack.extend(Node::child(node, Side::Left)),
                Ordering::Greater => stack.extend(Node::child(node, Side::Right)),
                Ordering::Equal => {
                    if node == wanted {
                        return Some(node);
                    }
                    fallback.get_or_insert(node);
                    stack.extend(Node::child(node, Side::Right));
                    stack.extend(Node::child(node, Side::Left));
                }
            }
        }
        fallback
    }

    /// Visits keys in ascending order until `visit` returns false.
    fn walk_in_order<'a, F>(&'a self, mut visit: F)
    where
        F: FnMut(&'a K) -> bool,
    {
        let mut stack = Vec::new();
        let mut cur = self.root;
        loop {
            while let Some(node) = cur {
                stack.push(node);
                cur = Node::child(node, Side::Left);
            }
            let Some(node) = stack.pop() else {
                return;
            };
            if !visit(unsafe { &(*node.as_ptr()).key }) {
                return;
            }
            cur = Node::child(node, Side::Right);
        }
    }

    /// Restores the red-black rules after `node` was attached as a red leaf.
    fn fix_after_insert(&mut self, mut node: NonNull<Node<K>>) {
        unsafe {
            loop {
                let Some(parent) = (*node.as_ptr()).parent else {
                    // Reached the root
                    (*node.as_ptr()).color = Color::Black;
                    return;
                };
                if (*parent.as_ptr()).color == Color::Black {
                    return;
                }
                let Some(grandparent) = (*parent.as_ptr()).parent else {
                    unreachable!("the root is always black, so a red parent has a parent");
                };

                let parent_side = Node::side_of(grandparent, Some(parent));
                let uncle = Node::child(grandparent, parent_side.opposite());

                if Node::color_of(uncle) == Color::Red {
                    trace!("insert fix-up: red uncle, recolouring and moving up");
                    (*parent.as_ptr()).color = Color::Black;
                    if let Some(uncle) = uncle {
                        (*uncle.as_ptr()).color = Color::Black;
                    }
                    (*grandparent.as_ptr()).color = Color::Red;
                    node = grandparent;
                    continue;
                }

                // Zig-zag: turn it into a straight line first, after which the old child sits
                // where the parent was.
                let top = if Node::child(parent, parent_side.opposite()) == Some(node) {
                    trace!("insert fix-up: black uncle, inner child");
                    Node::rotate(&mut self.root, parent, parent_side)
                } else {
                    trace!("insert fix-up: black uncle, outer child");
                    parent
                };
                Node::swap_colors(top, grandparent);
                Node::rotate(&mut self.root, grandparent, parent_side.opposite());
                return;
            }
        }
    }

    /// Unlinks `target`, rebalances and frees exactly one node. Returns the key `target` held.
    fn remove_node(&mut self, target: NonNull<Node<K>>) -> K {
        unsafe {
            // With two children the in-order successor gives up its node instead: the keys are
            // exchanged and the successor, which has no left child, is spliced out.
            let spliced = match ((*target.as_ptr()).left, (*target.as_ptr()).right) {
                (Some(_), Some(right)) => {
                    let successor = Node::extreme(right, Side::Left);
                    mem::swap(
                        &mut (*target.as_ptr()).key,
                        &mut (*successor.as_ptr()).key,
                    );
                    successor
                }
                _ => target,
            };

            let child = (*spliced.as_ptr()).left.or((*spliced.as_ptr()).right);
            let parent = (*spliced.as_ptr()).parent;
            let removed_color = (*spliced.as_ptr()).color;

            if let Some(child) = child {
                (*child.as_ptr()).parent = parent;
            }
            Node::replace_in_parent(&mut self.root, parent, spliced, child);
            self.len -= 1;

            if removed_color == Color::Black {
                self.fix_after_erase(child, parent);
            }
            Node::free(spliced)
        }
    }

    /// Pushes the missing black at `node` (which may be absent, hanging below `parent`) up the
    /// tree until it is absorbed.
    fn fix_after_erase(&mut self, mut node: Link<K>, mut parent: Link<K>) {
        unsafe {
            while node != self.root && Node::color_of(node) == Color::Black {
                let Some(p) = parent else {
                    break;
                };
                let side = Node::side_of(p, node);
                let Some(mut sibling) = Node::child(p, side.opposite()) else {
                    unreachable!("a doubly black position always has a sibling");
                };

                if (*sibling.as_ptr()).color == Color::Red {
                    trace!("erase fix-up: red sibling");
                    (*sibling.as_ptr()).color = Color::Black;
                    (*p.as_ptr()).color = Color::Red;
                    Node::rotate(&mut self.root, p, side);
                    let Some(next) = Node::child(p, side.opposite()) else {
                        unreachable!("a red sibling has black children of the same height");
                    };
                    sibling = next;
                }

                let near = Node::child(sibling, side);
                let far = Node::child(sibling, side.opposite());

                if Node::color_of(near) == Color::Black && Node::color_of(far) == Color::Black {
                    trace!("erase fix-up: black sibling with black children, moving up");
                    (*sibling.as_ptr()).color = Color::Red;
                    node = Some(p);
                    parent = (*p.as_ptr()).parent;
                    continue;
                }

                if Node::color_of(far) == Color::Black {
                    trace!("erase fix-up: black sibling with red near child");
                    if let Some(near) = near {
                        (*near.as_ptr()).color = Color::Black;
                    }
                    (*sibling.as_ptr()).color = Color::Red;
                    sibling = Node::rotate(&mut self.root, sibling, side.opposite());
                }

                trace!("erase fix-up: black sibling with red far child");
                (*sibling.as_ptr()).color = (*p.as_ptr()).color;
                (*p.as_ptr()).color = Color::Black;
                if let Some(far) = Node::child(sibling, side.opposite()) {
                    (*far.as_ptr()).color = Color::Black;
                }
                Node::rotate(&mut self.root, p, side);
                node = self.root;
                break;
            }

            if let Some(node) = node {
                (*node.as_ptr()).color = Color::Black;
            }
        }
    }
}

impl<K: Ord> Default for RBTree<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord> Drop for RBTree<K> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<K: Ord + fmt::Debug> fmt::Debug for RBTree<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        self.walk_in_order(|key| {
            list.entry(key);
            true
        });
        list.finish()
    }
}

/// Draws the tree sideways, one node per line with its colour and the side it hangs from.
impl<K: Ord + fmt::Debug> fmt::Display for RBTree<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root {
            Some(root) => Self::draw(f, root, "", true, ""),
            None => writeln!(f, "(empty)"),
        }
    }
}

impl<K: Ord + fmt::Debug> RBTree<K> {
    fn draw(
        f: &mut fmt::Formatter<'_>,
        node: NonNull<Node<K>>,
        indent: &str,
        is_final: bool,
        append: &str,
    ) -> fmt::Result {
        unsafe {
            let n = node.as_ptr();
            writeln!(f, "{indent}+- {append}{:?} # {:?}", (*n).key, (*n).color)?;
            let new_indent = format!("{indent}{}", if is_final { "   " } else { "|  " });
            if let Some(left) = (*n).left {
                Self::draw(f, left, &new_indent, (*n).right.is_none(), "L: ")?;
            }
            if let Some(right) = (*n).right {
                Self::draw(f, right, &new_indent, true, "R: ")?;
            }
        }
        Ok(())
    }
}
