//! Bucket Registry
//!
//! Two-level bucket lookup: an alias map from provisional route keys to
//! canonical server-assigned hashes, plus the canonical bucket store. The
//! registry is owned by its dispatcher instance; nothing here is
//! process-global.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::limiter::bucket::{BucketHandle, BucketMsg, BucketWorker};
use crate::Core;

#[derive(Default)]
pub(crate) struct BucketRegistry {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    buckets: HashMap<String, BucketHandle>,
    aliases: HashMap<String, String>,
}

/// What became of a provisional key on canonical-hash disclosure.
pub(crate) enum Promotion {
    /// The live worker now owns the canonical key.
    Rekeyed,

    /// A canonical bucket already existed; the caller must merge into it.
    MergeInto(BucketHandle),
}

impl BucketRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Live handle for a bucket key, following aliases. Spawns a worker on
    /// first sight of a key.
    pub(crate) fn obtain(&self, core: &Arc<Core>, key: &str) -> BucketHandle {
        let mut inner = self.inner.lock();
        let canonical = inner
            .aliases
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string());
        if let Some(handle) = inner.buckets.get(&canonical) {
            return handle.clone();
        }
        trace!(bucket = %canonical, "creating bucket");
        let handle = BucketWorker::spawn(canonical.clone(), core.clone());
        inner.buckets.insert(canonical, handle.clone());
        handle
    }

    /// Record the canonical hash disclosed for a provisional key. Existing
    /// aliases chasing the old key are re-pointed so lookups stay one hop.
    pub(crate) fn promote(&self, provisional: &str, hash: &str) -> Promotion {
        let mut inner = self.inner.lock();

        for target in inner.aliases.values_mut() {
            if target.as_str() == provisional {
                *target = hash.to_string();
            }
        }
        inner
            .aliases
            .insert(provisional.to_string(), hash.to_string());

        if let Some(existing) = inner.buckets.get(hash).cloned() {
            inner.buckets.remove(provisional);
            return Promotion::MergeInto(existing);
        }
        if let Some(handle) = inner.buckets.remove(provisional) {
            inner.buckets.insert(hash.to_string(), handle);
        }
        Promotion::Rekeyed
    }

    /// Worker eviction, decided under the map lock. A message that raced in
    /// is handed back and eviction is off; a queued request is never
    /// dropped.
    pub(crate) fn try_retire(
        &self,
        key: &str,
        rx: &mut mpsc::UnboundedReceiver<BucketMsg>,
    ) -> Result<(), BucketMsg> {
        let mut inner = self.inner.lock();
        if let Ok(msg) = rx.try_recv() {
            return Err(msg);
        }
        inner.buckets.remove(key);
        inner.aliases.retain(|_, target| target.as_str() != key);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn bucket_count(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    #[cfg(test)]
    pub(crate) fn alias_count(&self) -> usize {
        self.inner.lock().aliases.len()
    }

    #[cfg(test)]
    pub(crate) fn canonical_of(&self, key: &str) -> Option<String> {
        self.inner.lock().aliases.get(key).cloned()
    }

    #[cfg(test)]
    fn insert(&self, key: &str, handle: BucketHandle) {
        self.inner.lock().buckets.insert(key.to_string(), handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::bucket::PendingRequest;
    use crate::route::{RouteDescriptor, Verb};
    use crate::transport::Payload;

    fn handle() -> (BucketHandle, mpsc::UnboundedReceiver<BucketMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BucketHandle::new(tx), rx)
    }

    fn request() -> PendingRequest {
        let (tx, _rx) = tokio::sync::oneshot::channel();
        PendingRequest {
            route: RouteDescriptor::new(Verb::Get, "/gateway/bot", &[]),
            payload: Payload::Empty,
            attempts: 0,
            tx,
        }
    }

    #[test]
    fn promote_rekeys_then_merges() {
        let registry = BucketRegistry::new();
        let (a, _rx_a) = handle();
        let (b, _rx_b) = handle();

        registry.insert("GET:/channels/1", a);
        assert!(matches!(
            registry.promote("GET:/channels/1", "hash-1"),
            Promotion::Rekeyed
        ));
        assert_eq!(registry.bucket_count(), 1);
        assert_eq!(registry.canonical_of("GET:/channels/1").as_deref(), Some("hash-1"));

        registry.insert("GET:/channels/2", b);
        assert!(matches!(
            registry.promote("GET:/channels/2", "hash-1"),
            Promotion::MergeInto(_)
        ));
        assert_eq!(registry.bucket_count(), 1);
        assert_eq!(registry.alias_count(), 2);
    }

    #[test]
    fn promote_repoints_stale_aliases() {
        let registry = BucketRegistry::new();
        let (a, _rx) = handle();

        registry.insert("GET:/channels/1", a);
        registry.promote("GET:/channels/1", "hash-1");
        // The server re-bucketed the same worker under a new hash.
        registry.promote("hash-1", "hash-2");

        assert_eq!(registry.canonical_of("GET:/channels/1").as_deref(), Some("hash-2"));
        assert_eq!(registry.canonical_of("hash-1").as_deref(), Some("hash-2"));
        assert_eq!(registry.bucket_count(), 1);
    }

    #[tokio::test]
    async fn retire_hands_back_raced_messages() {
        let registry = BucketRegistry::new();
        let (handle, mut rx) = handle();
        registry.insert("GET:/gateway/bot", handle.clone());

        assert!(handle.send(BucketMsg::Request(request())).is_ok());
        assert!(registry.try_retire("GET:/gateway/bot", &mut rx).is_err());
        assert_eq!(registry.bucket_count(), 1);

        assert!(registry.try_retire("GET:/gateway/bot", &mut rx).is_ok());
        assert_eq!(registry.bucket_count(), 0);
    }
}
