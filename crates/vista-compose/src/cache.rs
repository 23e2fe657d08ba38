//! Session cache from content fingerprint to remote asset handle
//!
//! Concurrent callers asking for the same unresolved fingerprint coalesce:
//! the first one runs the upload while the others wait on a condition
//! variable and receive the stored handle. A failed (or panicking) upload
//! clears its pending slot so that one of the waiters can try again.

use crate::asset::{AssetHandle, Fingerprint};
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use vista_core::Result;

#[derive(Debug, Clone)]
enum Slot {
    Ready {
        handle: AssetHandle,
        stored_at: Instant,
    },
    Pending,
}

/// Whether [`AssetCache::get_or_upload`] ran the upload itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    /// Waited for another caller's in-flight upload
    Joined,
    Uploaded,
}

/// Fingerprint → handle table with optional expiry
#[derive(Debug)]
pub struct AssetCache {
    slots: Mutex<HashMap<Fingerprint, Slot>>,
    changed: Condvar,
    ttl: Option<Duration>,
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AssetCache {
    /// `ttl` bounds how long a handle is trusted; `None` keeps it for the session
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
            ttl,
        }
    }

    /// Cached handle for `fingerprint`, if present and not expired
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<AssetHandle> {
        let slots = self.lock();
        match slots.get(fingerprint) {
            Some(Slot::Ready { handle, stored_at }) if self.is_fresh(*stored_at) => {
                Some(handle.clone())
            }
            _ => None,
        }
    }

    /// Record `handle`, replacing any previous one for the fingerprint
    pub fn store(&self, fingerprint: Fingerprint, handle: AssetHandle) {
        let mut slots = self.lock();
        slots.insert(
            fingerprint,
            Slot::Ready {
                handle,
                stored_at: Instant::now(),
            },
        );
        self.changed.notify_all();
    }

    /// Forget a handle (e.g. the service reported it gone)
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let mut slots = self.lock();
        match slots.get(fingerprint) {
            Some(Slot::Ready { .. }) => {
                slots.remove(fingerprint);
                true
            }
            _ => false,
        }
    }

    /// Number of resolved handles, expired ones included
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|s| matches!(s, Slot::Ready { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached handle or run `upload` exactly once across all
    /// concurrent callers for this fingerprint.
    pub fn get_or_upload<F>(&self, fingerprint: Fingerprint, upload: F) -> Result<(AssetHandle, CacheOutcome)>
    where
        F: FnOnce() -> Result<AssetHandle>,
    {
        let mut waited = false;
        {
            let mut slots = self.lock();
            loop {
                match slots.get(&fingerprint) {
                    Some(Slot::Ready { handle, stored_at }) if self.is_fresh(*stored_at) => {
                        let outcome = if waited {
                            CacheOutcome::Joined
                        } else {
                            CacheOutcome::Hit
                        };
                        return Ok((handle.clone(), outcome));
                    }
                    Some(Slot::Pending) => {
                        waited = true;
                        slots = self
                            .changed
                            .wait(slots)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    _ => {
                        slots.insert(fingerprint, Slot::Pending);
                        break;
                    }
                }
            }
        }

        let guard = PendingGuard {
            cache: self,
            fingerprint,
            armed: true,
        };
        let handle = upload()?;
        guard.resolve(handle.clone());
        Ok((handle, CacheOutcome::Uploaded))
    }

    fn is_fresh(&self, stored_at: Instant) -> bool {
        match self.ttl {
            Some(ttl) => stored_at.elapsed() < ttl,
            None => true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears a pending slot unless the upload resolved it
struct PendingGuard<'a> {
    cache: &'a AssetCache,
    fingerprint: Fingerprint,
    armed: bool,
}

impl PendingGuard<'_> {
    fn resolve(mut self, handle: AssetHandle) {
        self.armed = false;
        self.cache.store(self.fingerprint, handle);
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.cache.lock();
        if matches!(slots.get(&self.fingerprint), Some(Slot::Pending)) {
            slots.remove(&self.fingerprint);
        }
        self.cache.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use vista_core::{ContentHash, VistaError};

    fn fp(tag: &str) -> Fingerprint {
        Fingerprint {
            hash: ContentHash::from_bytes(tag.as_bytes()),
            size: tag.len() as u64,
        }
    }

    #[test]
    fn test_lookup_and_store() {
        let cache = AssetCache::default();
        assert_eq!(cache.lookup(&fp("a")), None);

        cache.store(fp("a"), AssetHandle::new("space-1"));
        assert_eq!(cache.lookup(&fp("a")), Some(AssetHandle::new("space-1")));

        // Re-upload overwrites
        cache.store(fp("a"), AssetHandle::new("space-2"));
        assert_eq!(cache.lookup(&fp("a")), Some(AssetHandle::new("space-2")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate() {
        let cache = AssetCache::default();
        cache.store(fp("a"), AssetHandle::new("space-1"));
        assert!(cache.invalidate(&fp("a")));
        assert!(!cache.invalidate(&fp("a")));
        assert!(cache.lookup(&fp("a")).is_none());
    }

    #[test]
    fn test_expired_handles_are_misses() {
        let cache = AssetCache::new(Some(Duration::from_millis(10)));
        cache.store(fp("a"), AssetHandle::new("space-1"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.lookup(&fp("a")).is_none());

        let (handle, outcome) = cache
            .get_or_upload(fp("a"), || Ok(AssetHandle::new("space-2")))
            .unwrap();
        assert_eq!(handle.id(), "space-2");
        assert_eq!(outcome, CacheOutcome::Uploaded);
    }

    #[test]
    fn test_get_or_upload_hits_after_first() {
        let cache = AssetCache::default();
        let (_, first) = cache
            .get_or_upload(fp("a"), || Ok(AssetHandle::new("space-1")))
            .unwrap();
        let (handle, second) = cache
            .get_or_upload(fp("a"), || panic!("must not upload twice"))
            .unwrap();
        assert_eq!(first, CacheOutcome::Uploaded);
        assert_eq!(second, CacheOutcome::Hit);
        assert_eq!(handle.id(), "space-1");
    }

    #[test]
    fn test_failed_upload_leaves_no_entry() {
        let cache = AssetCache::default();
        let err = cache
            .get_or_upload(fp("a"), || Err(VistaError::Validation("nope".into())))
            .unwrap_err();
        assert!(matches!(err, VistaError::Validation(_)));
        assert!(cache.is_empty());

        let (handle, _) = cache
            .get_or_upload(fp("a"), || Ok(AssetHandle::new("space-9")))
            .unwrap();
        assert_eq!(handle.id(), "space-9");
    }

    #[test]
    fn test_concurrent_callers_coalesce_into_one_upload() {
        let cache = Arc::new(AssetCache::default());
        let uploads = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let uploads = Arc::clone(&uploads);
                std::thread::spawn(move || {
                    cache
                        .get_or_upload(fp("shared"), || {
                            uploads.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(50));
                            Ok(AssetHandle::new("space-1"))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|(h, _)| h.id() == "space-1"));
        assert_eq!(
            results
                .iter()
                .filter(|(_, o)| *o == CacheOutcome::Uploaded)
                .count(),
            1
        );
    }

    #[test]
    fn test_panicking_upload_releases_waiters() {
        let cache = Arc::new(AssetCache::default());
        let panicker = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let _ = cache.get_or_upload(fp("p"), || -> Result<AssetHandle> {
                    std::thread::sleep(Duration::from_millis(20));
                    panic!("upload blew up")
                });
            })
        };
        assert!(panicker.join().is_err());

        let (handle, outcome) = cache
            .get_or_upload(fp("p"), || Ok(AssetHandle::new("space-2")))
            .unwrap();
        assert_eq!(handle.id(), "space-2");
        assert_eq!(outcome, CacheOutcome::Uploaded);
    }
}
