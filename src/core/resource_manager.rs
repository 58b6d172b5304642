//! Concurrent download slot accounting.
//!
//! Tracks every in-flight download against a global cap and a per-user
//! cap. A slot is acquired before the download starts and released by
//! RAII when the [`DownloadSlot`] guard is dropped, so release happens
//! on every exit path including errors, panics and task cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::error::{BotError, ResourceExhausted};

type SlotId = u64;

/// Read-only snapshot of resource usage.
#[derive(Debug, Clone)]
pub struct ResourceStatus {
    pub active_downloads: usize,
    pub max_downloads: usize,
    pub active_users: usize,
    pub user_breakdown: HashMap<i64, usize>,
}

struct Shared {
    /// slot id -> owning user id
    active: Mutex<HashMap<SlotId, i64>>,
    next_slot_id: AtomicU64,
    max_concurrent_downloads: usize,
    max_downloads_per_user: usize,
}

impl Shared {
    /// The slot map is never locked across an await and the critical
    /// sections cannot panic, so a poisoned lock only means a panic
    /// elsewhere in the holder; the map itself is still consistent.
    fn active(&self) -> MutexGuard<'_, HashMap<SlotId, i64>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Manages concurrent download limits.
///
/// Both the global check and the per-user check plus the insert happen
/// under a single lock acquisition, so two racing requests can never
/// both observe a free slot and both claim it.
#[derive(Clone)]
pub struct ResourceManager {
    shared: Arc<Shared>,
}

impl ResourceManager {
    /// Creates a resource manager with the given caps.
    ///
    /// # Errors
    /// Returns `BotError::Config` if either cap is zero.
    pub fn new(max_concurrent_downloads: usize, max_downloads_per_user: usize) -> Result<Self, BotError> {
        if max_concurrent_downloads == 0 || max_downloads_per_user == 0 {
            return Err(BotError::Config("download caps must be at least 1".to_string()));
        }

        log::info!(
            "ResourceManager initialized: max_concurrent={}, max_per_user={}",
            max_concurrent_downloads,
            max_downloads_per_user
        );

        Ok(Self {
            shared: Arc::new(Shared {
                active: Mutex::new(HashMap::new()),
                next_slot_id: AtomicU64::new(1),
                max_concurrent_downloads,
                max_downloads_per_user,
            }),
        })
    }

    /// Acquires a download slot for `user_id`.
    ///
    /// The global cap is checked before the per-user cap. On success the
    /// returned guard holds the slot until dropped.
    ///
    /// # Errors
    /// [`ResourceExhausted::Global`] when the server-wide cap is reached,
    /// [`ResourceExhausted::User`] when this user is at their own cap.
    pub fn acquire_slot(&self, user_id: i64) -> Result<DownloadSlot, ResourceExhausted> {
        let mut active = self.shared.active();

        let active_count = active.len();
        if active_count >= self.shared.max_concurrent_downloads {
            log::warn!(
                "Global download limit reached: {}/{}",
                active_count,
                self.shared.max_concurrent_downloads
            );
            return Err(ResourceExhausted::Global { active: active_count });
        }

        let user_active = active.values().filter(|&&uid| uid == user_id).count();
        if user_active >= self.shared.max_downloads_per_user {
            log::info!(
                "User {} download limit reached: {}/{}",
                user_id,
                user_active,
                self.shared.max_downloads_per_user
            );
            return Err(ResourceExhausted::User { active: user_active });
        }

        let slot_id = self.shared.next_slot_id.fetch_add(1, Ordering::Relaxed);
        active.insert(slot_id, user_id);
        log::info!(
            "Download slot allocated for user {}: {}/{} active",
            user_id,
            active.len(),
            self.shared.max_concurrent_downloads
        );

        Ok(DownloadSlot {
            slot_id,
            user_id,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Current resource usage snapshot.
    pub fn get_status(&self) -> ResourceStatus {
        let active = self.shared.active();

        let mut user_breakdown: HashMap<i64, usize> = HashMap::new();
        for &user_id in active.values() {
            *user_breakdown.entry(user_id).or_insert(0) += 1;
        }

        ResourceStatus {
            active_downloads: active.len(),
            max_downloads: self.shared.max_concurrent_downloads,
            active_users: user_breakdown.len(),
            user_breakdown,
        }
    }

    /// Drops every slot entry owned by `user_id` and returns the count.
    ///
    /// Bookkeeping only: the in-flight downloads themselves keep
    /// running. A caller that wants true cancellation must also abort
    /// the download tasks.
    pub fn cancel_user_downloads(&self, user_id: i64) -> usize {
        let mut active = self.shared.active();

        let before = active.len();
        active.retain(|_, &mut uid| uid != user_id);
        let cancelled = before - active.len();

        if cancelled > 0 {
            log::info!("Cancelled {} downloads for user {}", cancelled, user_id);
        }
        cancelled
    }

    /// Number of active downloads held by `user_id`.
    pub fn get_user_active_downloads(&self, user_id: i64) -> usize {
        self.shared
            .active()
            .values()
            .filter(|&&uid| uid == user_id)
            .count()
    }
}

/// RAII guard for one granted download slot.
///
/// Dropping the guard removes the slot entry under the same lock that
/// granted it. If the entry was already removed by
/// [`ResourceManager::cancel_user_downloads`], the drop is a no-op.
pub struct DownloadSlot {
    slot_id: SlotId,
    user_id: i64,
    shared: Arc<Shared>,
}

impl DownloadSlot {
    /// The user this slot was granted to.
    pub fn user_id(&self) -> i64 {
        self.user_id
    }
}

impl Drop for DownloadSlot {
    fn drop(&mut self) {
        let mut active = self.shared.active();
        if active.remove(&self.slot_id).is_some() {
            log::info!(
                "Download slot released for user {}: {}/{} active",
                self.user_id,
                active.len(),
                self.shared.max_concurrent_downloads
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_caps() {
        assert!(ResourceManager::new(0, 1).is_err());
        assert!(ResourceManager::new(1, 0).is_err());
    }

    #[test]
    fn global_cap_is_enforced() {
        let manager = ResourceManager::new(2, 2).unwrap();

        let _a = manager.acquire_slot(1).unwrap();
        let _b = manager.acquire_slot(2).unwrap();

        match manager.acquire_slot(3) {
            Err(ResourceExhausted::Global { active }) => assert_eq!(active, 2),
            other => panic!("expected global exhaustion, got {:?}", other.map(|s| s.user_id())),
        }
    }

    #[test]
    fn per_user_cap_is_enforced() {
        let manager = ResourceManager::new(10, 1).unwrap();

        let _a = manager.acquire_slot(1).unwrap();

        match manager.acquire_slot(1) {
            Err(ResourceExhausted::User { active }) => assert_eq!(active, 1),
            other => panic!("expected user exhaustion, got {:?}", other.map(|s| s.user_id())),
        }

        // A different user still fits under the global cap.
        assert!(manager.acquire_slot(2).is_ok());
    }

    #[test]
    fn drop_releases_slot() {
        let manager = ResourceManager::new(1, 1).unwrap();

        {
            let _slot = manager.acquire_slot(1).unwrap();
            assert_eq!(manager.get_user_active_downloads(1), 1);
        }

        assert_eq!(manager.get_user_active_downloads(1), 0);
        assert!(manager.acquire_slot(2).is_ok());
    }

    #[test]
    fn cancel_removes_only_that_users_slots() {
        let manager = ResourceManager::new(10, 2).unwrap();

        let _a1 = manager.acquire_slot(1).unwrap();
        let _a2 = manager.acquire_slot(1).unwrap();
        let _b = manager.acquire_slot(2).unwrap();

        assert_eq!(manager.cancel_user_downloads(1), 2);
        assert_eq!(manager.get_user_active_downloads(1), 0);
        assert_eq!(manager.get_user_active_downloads(2), 1);

        // Cancelling again finds nothing.
        assert_eq!(manager.cancel_user_downloads(1), 0);
    }

    #[test]
    fn guard_drop_after_cancel_is_noop() {
        let manager = ResourceManager::new(10, 2).unwrap();

        let slot = manager.acquire_slot(1).unwrap();
        assert_eq!(manager.cancel_user_downloads(1), 1);
        assert_eq!(manager.get_status().active_downloads, 0);

        // The guard's drop must not disturb other entries.
        let _other = manager.acquire_slot(2).unwrap();
        drop(slot);
        assert_eq!(manager.get_status().active_downloads, 1);
    }

    #[test]
    fn status_reports_breakdown() {
        let manager = ResourceManager::new(10, 3).unwrap();

        let _a1 = manager.acquire_slot(1).unwrap();
        let _a2 = manager.acquire_slot(1).unwrap();
        let _b = manager.acquire_slot(2).unwrap();

        let status = manager.get_status();
        assert_eq!(status.active_downloads, 3);
        assert_eq!(status.max_downloads, 10);
        assert_eq!(status.active_users, 2);
        assert_eq!(status.user_breakdown.get(&1), Some(&2));
        assert_eq!(status.user_breakdown.get(&2), Some(&1));
    }

    #[test]
    fn concurrent_acquires_never_exceed_cap() {
        let manager = ResourceManager::new(4, 4).unwrap();
        let mut handles = Vec::new();

        for i in 0..16 {
            let manager = manager.clone();
            handles.push(std::thread::spawn(move || manager.acquire_slot(i % 4).map(|s| {
                // Hold the slot long enough for the other threads to race.
                std::thread::sleep(std::time::Duration::from_millis(50));
                s
            })));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let granted = results.iter().filter(|r| r.is_ok()).count();
        let denied = results.len() - granted;

        assert_eq!(granted, 4);
        assert_eq!(denied, 12);
    }
}
