use crate::media::media_engine::CloseHook;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Close callbacks of one media object. Each hook runs at most once.
pub(crate) struct Hooks(Mutex<Vec<CloseHook>>);

impl Hooks {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(Vec::new()))
    }

    /// Queue `hook`, or run it now when `fired` is already set.
    pub(crate) fn register(&self, fired: &AtomicBool, hook: CloseHook) {
        let mut hooks = lock(&self.0);
        if fired.load(Ordering::SeqCst) {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(hook);
    }

    pub(crate) fn fire(&self) {
        let hooks = std::mem::take(&mut *lock(&self.0));
        for hook in hooks {
            hook();
        }
    }
}
