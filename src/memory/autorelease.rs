/*!
 * Auto-Release Stacks
 * Deterministic release of registered objects at scope or thread teardown
 *
 * A [`ReleaseStack`] is an intrusive singly linked stack. Objects pushed on
 * it are released top-down when the stack is swept or dropped. Objects can
 * leave early from any depth with [`ReleaseStack::delist`].
 *
 * Each thread also owns a stack behind [`register_local`]; it is swept
 * exactly once when the thread's local storage is torn down.
 */

use super::object::Object;
use super::traits::AutoRelease;
use super::types::ReleaseId;
use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

static NEXT_RELEASE_ID: AtomicU64 = AtomicU64::new(1);

struct Node {
    id: ReleaseId,
    object: Box<dyn AutoRelease>,
    prev: Option<Box<Node>>,
}

/// Stack of objects awaiting release
#[derive(Default)]
pub struct ReleaseStack {
    top: Option<Box<Node>>,
    depth: usize,
}

impl ReleaseStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an object; it will be released by the next sweep
    pub fn register<A: AutoRelease + 'static>(&mut self, object: A) -> ReleaseId {
        self.register_boxed(Box::new(object))
    }

    pub fn register_boxed(&mut self, object: Box<dyn AutoRelease>) -> ReleaseId {
        let id = ReleaseId(NEXT_RELEASE_ID.fetch_add(1, Ordering::Relaxed));
        self.top = Some(Box::new(Node {
            id,
            object,
            prev: self.top.take(),
        }));
        self.depth += 1;
        trace!(id = %id, depth = self.depth, "Registered auto-release object");
        id
    }

    /// Splice an object out of the stack without releasing it
    ///
    /// O(depth): scans from the top.
    pub fn delist(&mut self, id: ReleaseId) -> Option<Box<dyn AutoRelease>> {
        let mut link = &mut self.top;
        while link.as_ref().is_some_and(|node| node.id != id) {
            link = match link {
                Some(node) => &mut node.prev,
                None => break,
            };
        }

        let mut node = link.take()?;
        *link = node.prev.take();
        self.depth -= 1;
        trace!(id = %id, depth = self.depth, "Delisted auto-release object");
        Some(node.object)
    }

    /// Delist and release one object now
    pub fn release(&mut self, id: ReleaseId) -> bool {
        match self.delist(id) {
            Some(object) => {
                object.release();
                true
            }
            None => false,
        }
    }

    /// Release everything, newest first; returns how many were released
    pub fn sweep(&mut self) -> usize {
        let mut released = 0;
        while let Some(mut node) = self.top.take() {
            self.top = node.prev.take();
            self.depth -= 1;
            node.object.release();
            released += 1;
        }
        if released > 0 {
            debug!(released = released, "Swept auto-release stack");
        }
        released
    }

    pub fn contains(&self, id: ReleaseId) -> bool {
        let mut cursor = self.top.as_deref();
        while let Some(node) = cursor {
            if node.id == id {
                return true;
            }
            cursor = node.prev.as_deref();
        }
        false
    }

    pub fn len(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }
}

impl Drop for ReleaseStack {
    fn drop(&mut self) {
        self.sweep();
    }
}

impl fmt::Debug for ReleaseStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseStack")
            .field("depth", &self.depth)
            .finish()
    }
}

/// Closure run when released
pub struct Deferred<F: FnOnce()> {
    action: F,
}

impl<F: FnOnce()> Deferred<F> {
    pub fn new(action: F) -> Self {
        Self { action }
    }
}

impl<F: FnOnce()> AutoRelease for Deferred<F> {
    fn release(self: Box<Self>) {
        (self.action)();
    }
}

impl<T> AutoRelease for Object<T> {
    fn release(self: Box<Self>) {
        Object::release(*self);
    }
}

// Per-thread stack; its destructor sweeps at thread teardown
thread_local! {
    static LOCAL_STACK: RefCell<ReleaseStack> = RefCell::new(ReleaseStack::new());
}

/// Register an object on the calling thread's stack
///
/// Returns `None` when the thread is already tearing its stack down; the
/// object is released immediately in that case.
pub fn register_local<A: AutoRelease + 'static>(object: A) -> Option<ReleaseId> {
    let mut pending: Option<Box<dyn AutoRelease>> = Some(Box::new(object));
    let id = LOCAL_STACK
        .try_with(|cell| {
            let mut stack = cell.try_borrow_mut().ok()?;
            pending.take().map(|object| stack.register_boxed(object))
        })
        .ok()
        .flatten();

    if let Some(object) = pending {
        warn!("Thread release stack unavailable, releasing immediately");
        object.release();
    }
    id
}

/// Remove an object from the calling thread's stack without releasing it
pub fn delist_local(id: ReleaseId) -> Option<Box<dyn AutoRelease>> {
    LOCAL_STACK
        .try_with(|cell| cell.try_borrow_mut().ok()?.delist(id))
        .ok()
        .flatten()
}

/// Delist and release one object from the calling thread's stack
pub fn release_local(id: ReleaseId) -> bool {
    // Release outside the borrow so the object may touch the stack
    match delist_local(id) {
        Some(object) => {
            object.release();
            true
        }
        None => false,
    }
}

/// Sweep the calling thread's stack now
pub fn sweep_local() -> usize {
    let stack = LOCAL_STACK
        .try_with(|cell| cell.try_borrow_mut().map(|mut s| mem::take(&mut *s)).ok())
        .ok()
        .flatten();

    match stack {
        Some(mut stack) => stack.sweep(),
        None => 0,
    }
}

/// Depth of the calling thread's stack
pub fn local_depth() -> usize {
    LOCAL_STACK
        .try_with(|cell| cell.try_borrow().map(|s| s.len()).unwrap_or(0))
        .unwrap_or(0)
}
