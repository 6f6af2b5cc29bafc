/*!
 * Memory Traits
 * Ownership capabilities shared by objects, vectors and lifecycle hooks
 */

/// Shared-ownership capability
///
/// `retain` produces an additional owner, `release` consumes one. The last
/// release deallocates through whatever backing the implementor uses.
pub trait RefCounted: Sized {
    /// Add an owner
    fn retain(&self) -> Self;

    /// Remove an owner; true when this deallocated the object
    fn release(self) -> bool;

    /// Whether the object is shared beyond its original owner
    fn is_copied(&self) -> bool;
}

/// Object that can sit on an auto-release stack
pub trait AutoRelease {
    /// Give up the registered ownership
    fn release(self: Box<Self>);
}

/// Process-wide lifecycle hooks around fork and exit
///
/// Every hook defaults to a no-op.
pub trait ExitObject: Send + Sync {
    /// Before `fork` in the calling process
    fn prepare(&self) {}

    /// After `fork`, in the parent
    fn parent(&self) {}

    /// After `fork`, in the child
    fn child(&self) {}

    /// At process exit
    fn exit(&self) {}
}
