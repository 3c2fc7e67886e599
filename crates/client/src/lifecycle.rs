//! Singleton lifecycle (C9): deterministic teardown of process-wide
//! singletons (sync engine socket, scheduler task, debounce timer) across a
//! supervised restart or reload -- see SPEC_FULL §4.9 for why this replaces
//! the distilled spec's browser-only "HMR" framing.

use std::sync::Mutex;

/// A single teardown action: close a socket, cancel a task, flush a timer.
/// Must be idempotent -- called more than once (e.g. once from an explicit
/// `stop` and once from `Drop`) must not panic.
pub type TeardownHook = Box<dyn FnMut() + Send>;

/// Registers teardown hooks for a generation of process-wide singletons and
/// runs them, in reverse registration order, before the next generation is
/// constructed.
#[derive(Default)]
pub struct SingletonRegistry {
    hooks: Mutex<Vec<TeardownHook>>,
    generation: Mutex<u64>,
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a teardown hook for the current generation.
    pub fn register(&self, hook: TeardownHook) {
        self.hooks.lock().unwrap().push(hook);
    }

    /// The current generation counter -- bumped by every `teardown_all`
    /// call, so tests can assert no state leaked between generations.
    pub fn generation(&self) -> u64 {
        *self.generation.lock().unwrap()
    }

    /// Runs every registered hook in reverse order, then clears the
    /// registry and advances the generation counter. Safe to call with no
    /// hooks registered (a no-op reload).
    pub fn teardown_all(&self) {
        let mut hooks = self.hooks.lock().unwrap();
        for hook in hooks.iter_mut().rev() {
            hook();
        }
        hooks.clear();
        *self.generation.lock().unwrap() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn teardown_runs_hooks_in_reverse_order() {
        let registry = SingletonRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        registry.register(Box::new(move || o1.lock().unwrap().push(1)));
        let o2 = order.clone();
        registry.register(Box::new(move || o2.lock().unwrap().push(2)));

        registry.teardown_all();
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn teardown_clears_hooks_and_advances_generation() {
        let registry = SingletonRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        registry.register(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(registry.generation(), 0);
        registry.teardown_all();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.generation(), 1);

        // A second teardown with nothing registered is a no-op, not a panic.
        registry.teardown_all();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.generation(), 2);
    }

    #[test]
    fn hooks_are_idempotent_under_double_teardown() {
        let registry = SingletonRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut torn_down = false;
        registry.register(Box::new(move || {
            if !torn_down {
                torn_down = true;
                c.fetch_add(1, Ordering::SeqCst);
            }
        }));
        registry.teardown_all();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
