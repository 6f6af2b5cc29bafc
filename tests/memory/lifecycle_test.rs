/*!
 * Lifecycle Tests
 * Process-wide exit registry dispatch
 */

use memory_kernel::memory::{exit_registry, register_exit, unregister_exit, ExitObject};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::Arc;

#[derive(Default)]
struct Counter {
    prepared: Mutex<usize>,
    children: Mutex<usize>,
}

impl ExitObject for Counter {
    fn prepare(&self) {
        *self.prepared.lock() += 1;
    }

    fn child(&self) {
        *self.children.lock() += 1;
    }
}

#[test]
#[serial]
fn test_global_registration_roundtrip() {
    let counter = Arc::new(Counter::default());
    let before = exit_registry().len();

    let id = register_exit(counter.clone());
    assert_eq!(exit_registry().len(), before + 1);

    exit_registry().prepare_fork();
    exit_registry().child_after_fork();
    assert_eq!(*counter.prepared.lock(), 1);
    assert_eq!(*counter.children.lock(), 1);

    assert!(unregister_exit(id));
    assert_eq!(exit_registry().len(), before);

    exit_registry().prepare_fork();
    exit_registry().parent_after_fork();
    assert_eq!(*counter.prepared.lock(), 1);
}

#[test]
#[serial]
fn test_hook_may_unregister_itself() {
    struct SelfRemoving {
        id: Mutex<Option<memory_kernel::memory::ExitId>>,
        calls: Mutex<usize>,
    }

    impl ExitObject for SelfRemoving {
        fn parent(&self) {
            *self.calls.lock() += 1;
            if let Some(id) = self.id.lock().take() {
                unregister_exit(id);
            }
        }
    }

    let hook = Arc::new(SelfRemoving {
        id: Mutex::new(None),
        calls: Mutex::new(0),
    });
    let id = register_exit(hook.clone());
    *hook.id.lock() = Some(id);

    exit_registry().parent_after_fork();
    exit_registry().parent_after_fork();
    assert_eq!(*hook.calls.lock(), 1);
}

#[cfg(unix)]
mod fork {
    use super::*;
    use pretty_assertions::assert_eq;
    use nix::libc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    static CHILD_HOOK_RAN: AtomicBool = AtomicBool::new(false);

    #[derive(Default)]
    struct ForkWitness {
        parents: AtomicUsize,
    }

    impl ExitObject for ForkWitness {
        fn parent(&self) {
            self.parents.fetch_add(1, Ordering::SeqCst);
        }

        fn child(&self) {
            CHILD_HOOK_RAN.store(true, Ordering::SeqCst);
        }
    }

    struct Idle;

    impl ExitObject for Idle {}

    /// Fork a child that exits 0 when its child hook ran, 1 otherwise
    ///
    /// Returns `None` when the child is still running after `deadline`.
    fn fork_and_wait(deadline: Duration) -> Option<i32> {
        // SAFETY: the child only reads an atomic and calls _exit
        unsafe {
            let pid = libc::fork();
            assert!(pid >= 0, "fork failed");
            if pid == 0 {
                let code = if CHILD_HOOK_RAN.load(Ordering::SeqCst) { 0 } else { 1 };
                libc::_exit(code);
            }

            let start = Instant::now();
            let mut status = 0;
            loop {
                if libc::waitpid(pid, &mut status, libc::WNOHANG) == pid {
                    return Some(if libc::WIFEXITED(status) {
                        libc::WEXITSTATUS(status)
                    } else {
                        -1
                    });
                }
                if start.elapsed() > deadline {
                    libc::kill(pid, libc::SIGKILL);
                    libc::waitpid(pid, &mut status, 0);
                    return None;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    #[test]
    #[serial]
    fn test_real_fork_runs_hooks() {
        let witness = Arc::new(ForkWitness::default());
        let id = register_exit(witness.clone());

        let status = fork_and_wait(Duration::from_secs(5));
        assert_eq!(status, Some(0), "child hook should run in the forked child");
        assert_eq!(witness.parents.load(Ordering::SeqCst), 1);

        // Registry stays usable in the parent after the fork
        assert!(unregister_exit(id));
    }

    #[test]
    #[serial]
    fn test_fork_during_concurrent_registration() {
        let witness = Arc::new(ForkWitness::default());
        let id = register_exit(witness.clone());
        let stop = Arc::new(AtomicBool::new(false));

        let churners: Vec<_> = (0..4)
            .map(|_| {
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let id = register_exit(Arc::new(Idle));
                        unregister_exit(id);
                    }
                })
            })
            .collect();

        let forks = 200;
        let mut failed = 0;
        for _ in 0..forks {
            if fork_and_wait(Duration::from_secs(2)) != Some(0) {
                failed += 1;
            }
        }

        stop.store(true, Ordering::Relaxed);
        for churner in churners {
            churner.join().expect("registration thread panicked");
        }
        assert!(unregister_exit(id));

        assert_eq!(failed, 0, "children stuck or missing the child hook");
        assert_eq!(witness.parents.load(Ordering::SeqCst), forks);
    }
}
