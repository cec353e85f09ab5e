//! Test-only global allocator that can be told to refuse the next allocation made on the
//! current thread, and that counts allocations of one watched layout.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use simplelog::{Config, LevelFilter, TestLogger};

use super::node::Node;
use super::{RBTree, TreeError};

struct FailingAlloc;

thread_local! {
    static FAIL_NEXT: Cell<bool> = const { Cell::new(false) };
    static WATCHED: Cell<Option<Layout>> = const { Cell::new(None) };
    static WATCHED_COUNT: Cell<usize> = const { Cell::new(0) };
}

unsafe impl GlobalAlloc for FailingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // `try_with` so allocations during thread teardown never observe a destroyed slot.
        if FAIL_NEXT.try_with(|fail| fail.replace(false)).unwrap_or(false) {
            return ptr::null_mut();
        }
        let _ = WATCHED.try_with(|watched| {
            if watched.get() == Some(layout) {
                WATCHED_COUNT.with(|count| count.set(count.get() + 1));
            }
        });
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: FailingAlloc = FailingAlloc;

fn fail_next_allocation() {
    FAIL_NEXT.with(|fail| fail.set(true));
}

/// Starts counting allocations of a `Node<K>` made on this thread.
fn watch_nodes<K>() {
    WATCHED.with(|watched| watched.set(Some(Layout::new::<Node<K>>())));
    WATCHED_COUNT.with(|count| count.set(0));
}

fn watched_allocations() -> usize {
    WATCHED_COUNT.with(Cell::get)
}

/// A key whose comparisons panic when either side is poisoned. Padded so its node layout is
/// unlike anything the panic machinery allocates.
#[derive(Clone)]
struct Touchy {
    key: i32,
    poisoned: bool,
    _pad: [u64; 31],
}

impl Touchy {
    fn new(key: i32, poisoned: bool) -> Self {
        Self {
            key,
            poisoned,
            _pad: [0; 31],
        }
    }
}

impl PartialEq for Touchy {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Touchy {}

impl PartialOrd for Touchy {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Touchy {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.poisoned || other.poisoned {
            panic!("poisoned key compared");
        }
        self.key.cmp(&other.key)
    }
}

#[test]
fn node_allocation_failure_is_reported() {
    fail_next_allocation();
    assert_eq!(Node::new(7u64).err(), Some(TreeError::AllocationError));
}

#[test]
fn failed_insert_leaves_tree_unchanged() {
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
    let mut tree = RBTree::new();
    for key in [1, 2, 3] {
        tree.insert(key).unwrap();
    }
    let before = tree.to_string();

    fail_next_allocation();
    assert_eq!(tree.insert(4).err(), Some(TreeError::AllocationError));

    assert_eq!(tree.to_string(), before);
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.check_invariants(), Ok(1));
    assert!(!tree.contains(&4));

    // The tree stays usable once memory is available again.
    tree.insert(4).unwrap();
    assert_eq!(tree.to_sorted_vec(8), vec![1, 2, 3, 4]);
    tree.check_invariants().unwrap();
}

#[test]
fn panicking_comparison_allocates_no_node() {
    let mut tree = RBTree::new();
    for key in 0..8 {
        tree.insert(Touchy::new(key, false)).unwrap();
    }

    watch_nodes::<Touchy>();
    let result = panic::catch_unwind(AssertUnwindSafe(|| tree.insert(Touchy::new(3, true))));
    assert!(result.is_err());
    assert_eq!(watched_allocations(), 0);

    assert_eq!(tree.len(), 8);
    tree.check_invariants().unwrap();

    tree.insert(Touchy::new(3, false)).unwrap();
    assert_eq!(watched_allocations(), 1);
    let keys: Vec<i32> = tree.to_sorted_vec(16).iter().map(|t| t.key).collect();
    assert_eq!(keys, vec![0, 1, 2, 3, 3, 4, 5, 6, 7]);
}
