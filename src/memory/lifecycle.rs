/*!
 * Process Lifecycle Hooks
 * Process-wide registry of exit objects notified around fork and exit
 *
 * Pools and arenas that must stay consistent across process duplication
 * register an [`ExitObject`]. The global registry installs `pthread_atfork`
 * and `atexit` handlers once, on first registration.
 */

use super::traits::ExitObject;
use parking_lot::Mutex;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once, OnceLock};
use tracing::{debug, warn};

static NEXT_EXIT_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by [`ExitRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitId(u64);

/// Lifecycle phase being dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Parent,
    Child,
    Exit,
}

/// Registry of exit objects, newest first
///
/// Between [`ExitRegistry::prepare_fork`] and the matching
/// `parent_after_fork`/`child_after_fork` the registry lock stays held, so
/// no other thread can be mid-update when the process is duplicated.
#[derive(Default)]
pub struct ExitRegistry {
    objects: Mutex<Vec<(ExitId, Arc<dyn ExitObject>)>>,
    /// Set while `prepare_fork` holds the lock
    fork_locked: AtomicBool,
}

impl ExitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, object: Arc<dyn ExitObject>) -> ExitId {
        let id = ExitId(NEXT_EXIT_ID.fetch_add(1, Ordering::Relaxed));
        self.objects.lock().push((id, object));
        id
    }

    pub fn unregister(&self, id: ExitId) -> bool {
        let mut objects = self.objects.lock();
        let before = objects.len();
        objects.retain(|(entry, _)| *entry != id);
        objects.len() != before
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Run one phase on every registered object, newest first
    ///
    /// The list is snapshotted so hooks may register or unregister.
    pub fn dispatch(&self, phase: Phase) -> usize {
        let snapshot: Vec<Arc<dyn ExitObject>> = self
            .objects
            .lock()
            .iter()
            .rev()
            .map(|(_, object)| Arc::clone(object))
            .collect();

        for object in &snapshot {
            match phase {
                Phase::Prepare => object.prepare(),
                Phase::Parent => object.parent(),
                Phase::Child => object.child(),
                Phase::Exit => object.exit(),
            }
        }
        snapshot.len()
    }

    /// Run prepare hooks, then hold the registry lock across the fork
    ///
    /// Must be followed by `parent_after_fork` or `child_after_fork` on the
    /// same thread; registry calls in between block.
    pub fn prepare_fork(&self) -> usize {
        let notified = self.dispatch(Phase::Prepare);
        mem::forget(self.objects.lock());
        self.fork_locked.store(true, Ordering::Release);
        notified
    }

    pub fn parent_after_fork(&self) -> usize {
        self.release_fork_lock();
        self.dispatch(Phase::Parent)
    }

    /// In the child, the lock copied from the parent is held on behalf of
    /// the forking thread, which is the only thread left
    pub fn child_after_fork(&self) -> usize {
        self.release_fork_lock();
        self.dispatch(Phase::Child)
    }

    fn release_fork_lock(&self) {
        if self.fork_locked.swap(false, Ordering::AcqRel) {
            // SAFETY: prepare_fork acquired the lock and forgot its guard
            unsafe { self.objects.force_unlock() };
        }
    }

    pub fn run_exit(&self) -> usize {
        let notified = self.dispatch(Phase::Exit);
        if notified > 0 {
            debug!(objects = notified, "Ran exit hooks");
        }
        notified
    }
}

impl std::fmt::Debug for ExitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitRegistry")
            .field("objects", &self.len())
            .finish()
    }
}

static GLOBAL_REGISTRY: OnceLock<ExitRegistry> = OnceLock::new();
static HOOKS: Once = Once::new();

/// Process-wide registry; OS hooks are installed on first registration
pub fn exit_registry() -> &'static ExitRegistry {
    GLOBAL_REGISTRY.get_or_init(ExitRegistry::new)
}

/// Register with the process-wide registry
pub fn register_exit(object: Arc<dyn ExitObject>) -> ExitId {
    install_hooks();
    exit_registry().register(object)
}

pub fn unregister_exit(id: ExitId) -> bool {
    exit_registry().unregister(id)
}

fn install_hooks() {
    HOOKS.call_once(|| {
        #[cfg(unix)]
        {
            use nix::libc;

            extern "C" fn on_prepare() {
                exit_registry().prepare_fork();
            }
            extern "C" fn on_parent() {
                exit_registry().parent_after_fork();
            }
            extern "C" fn on_child() {
                exit_registry().child_after_fork();
            }
            extern "C" fn on_exit() {
                exit_registry().run_exit();
            }

            // SAFETY: handlers are plain extern "C" functions with 'static lifetime
            let fork_rc =
                unsafe { libc::pthread_atfork(Some(on_prepare), Some(on_parent), Some(on_child)) };
            if fork_rc != 0 {
                warn!(code = fork_rc, "pthread_atfork registration failed");
            }
            // SAFETY: as above
            let exit_rc = unsafe { libc::atexit(on_exit) };
            if exit_rc != 0 {
                warn!(code = exit_rc, "atexit registration failed");
            }
            debug!("Installed process lifecycle hooks");
        }
    });
}
