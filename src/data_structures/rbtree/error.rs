#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// The global allocator could not provide memory for a new node. The tree is untouched.
    #[error("failed to allocate a tree node")]
    AllocationError,

    /// No node in the tree holds the requested key.
    #[error("key is not present in the tree")]
    NotFound,
}
