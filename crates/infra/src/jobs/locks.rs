//! Per-app mutual exclusion for executor runs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use playpulse_core::AppId;

/// Set of apps that currently have an executor running.
///
/// Cloning shares the same registry. Check-and-insert happens under one
/// mutex, so two concurrent acquirers for the same app cannot both win.
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    busy: Arc<Mutex<HashSet<AppId>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> MutexGuard<'_, HashSet<AppId>> {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the app's lock, or `None` if another run holds it.
    pub fn try_acquire(&self, app_id: AppId) -> Option<AppLock> {
        if self.set().insert(app_id) {
            Some(AppLock {
                registry: self.clone(),
                app_id,
            })
        } else {
            None
        }
    }

    /// Only `AppLock::drop` releases outside tests. Returns `true` if the
    /// app was held.
    fn release(&self, app_id: AppId) -> bool {
        self.set().remove(&app_id)
    }

    pub fn is_busy(&self, app_id: AppId) -> bool {
        self.set().contains(&app_id)
    }

    pub fn busy_count(&self) -> usize {
        self.set().len()
    }
}

/// Held lock for one app; released on drop.
#[derive(Debug)]
pub struct AppLock {
    registry: LockRegistry,
    app_id: AppId,
}

impl AppLock {
    pub fn app_id(&self) -> AppId {
        self.app_id
    }
}

impl Drop for AppLock {
    fn drop(&mut self) {
        self.registry.release(self.app_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn second_acquire_fails_until_drop() {
        let locks = LockRegistry::new();
        let app = AppId::new();

        let guard = locks.try_acquire(app).unwrap();
        assert!(locks.is_busy(app));
        assert!(locks.try_acquire(app).is_none());

        drop(guard);
        assert!(!locks.is_busy(app));
        assert!(locks.try_acquire(app).is_some());
    }

    #[test]
    fn guard_from_one_handle_releases_for_all_clones() {
        let locks = LockRegistry::new();
        let shared = locks.clone();
        let app = AppId::new();

        let guard = shared.try_acquire(app).unwrap();
        assert_eq!(guard.app_id(), app);
        assert!(locks.try_acquire(app).is_none());

        drop(guard);
        assert_eq!(locks.busy_count(), 0);
        assert!(!locks.release(app));
    }

    #[test]
    fn apps_are_independent() {
        let locks = LockRegistry::new();
        let _a = locks.try_acquire(AppId::new()).unwrap();
        let _b = locks.try_acquire(AppId::new()).unwrap();
        assert_eq!(locks.busy_count(), 2);
    }

    #[test]
    fn exactly_one_concurrent_acquirer_wins() {
        let locks = LockRegistry::new();
        let app = AppId::new();
        let contenders = 16;
        let barrier = Arc::new(Barrier::new(contenders));

        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let locks = locks.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    // Leak the guard so the winner keeps the lock for the assertion.
                    locks.try_acquire(app).map(std::mem::forget).is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(locks.release(app));
    }
}
