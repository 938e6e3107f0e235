use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::model::*;

/// A keyed set of documents, each behind its own async mutex.
///
/// A slot is `None` once deleted: a task that was queued on the mutex when the
/// delete committed wakes up to an empty document instead of a stale one.
pub struct Collection<T> {
    docs: DashMap<Ulid, Arc<Mutex<Option<T>>>>,
}

pub type SlotStore = Collection<TeachingSlot>;
pub type BookingStore = Collection<Booking>;

/// Exclusive access to one live document.
pub struct DocGuard<T> {
    inner: OwnedMutexGuard<Option<T>>,
}

impl<T> DocGuard<T> {
    pub fn get(&self) -> &T {
        // `lock` only hands out guards over live documents and `delete` consumes the guard.
        self.inner.as_ref().unwrap_or_else(|| unreachable!("guard over deleted document"))
    }

    pub fn put(&mut self, doc: T) {
        *self.inner = Some(doc);
    }

    pub fn delete(mut self) {
        *self.inner = None;
    }
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Collection<T> {
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.docs.contains_key(id)
    }

    pub fn ids(&self) -> Vec<Ulid> {
        self.docs.iter().map(|e| *e.key()).collect()
    }

    fn handle(&self, id: &Ulid) -> Option<Arc<Mutex<Option<T>>>> {
        // Clone the Arc out so no shard lock is held across an await.
        self.docs.get(id).map(|e| e.value().clone())
    }

    /// Wait for exclusive access. `None` if the document does not exist or was
    /// deleted while we waited.
    pub async fn lock(&self, id: &Ulid) -> Option<DocGuard<T>> {
        let handle = self.handle(id)?;
        let inner = handle.lock_owned().await;
        inner.is_some().then_some(DocGuard { inner })
    }

    pub fn insert(&self, id: Ulid, doc: T) {
        self.docs.insert(id, Arc::new(Mutex::new(Some(doc))));
    }

    /// Drop the map entry. Pair with `DocGuard::delete` so waiters see `None`.
    pub fn remove(&self, id: &Ulid) {
        self.docs.remove(id);
    }
}

impl<T: Clone> Collection<T> {
    /// Point-in-time copy of one document.
    pub async fn snapshot(&self, id: &Ulid) -> Option<T> {
        let handle = self.handle(id)?;
        let guard = handle.lock().await;
        guard.clone()
    }

    /// Copy of every live document.
    pub async fn snapshot_all(&self) -> Vec<T> {
        let handles: Vec<_> = self.docs.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(doc) = handle.lock().await.clone() {
                out.push(doc);
            }
        }
        out
    }

    /// Replay-time upsert. The engine is the sole owner during replay, so the
    /// mutex is always free.
    pub fn restore(&self, id: Ulid, doc: T) {
        if let Some(handle) = self.handle(&id)
            && let Ok(mut guard) = handle.try_lock()
        {
            *guard = Some(doc);
            return;
        }
        self.insert(id, doc);
    }
}

impl Collection<Booking> {
    /// Requested bookings whose deadline has passed, oldest deadline first.
    /// Documents locked by an in-flight transition are skipped; the next sweep
    /// picks them up if they still qualify.
    pub fn due_for_expiry(&self, now: Ms, limit: usize) -> Vec<(Ulid, Ms)> {
        let mut due: Vec<(Ulid, Ms)> = self
            .docs
            .iter()
            .filter_map(|e| {
                let guard = e.value().try_lock().ok()?;
                let b = guard.as_ref()?;
                (b.status == BookingStatus::Requested && b.is_past_deadline(now))
                    .then_some((b.id, b.expires_at))
            })
            .collect();
        due.sort_by_key(|&(id, expires_at)| (expires_at, id));
        due.truncate(limit);
        due
    }
}

impl Collection<TeachingSlot> {
    /// Slots of one room, unordered. Locked slots are waited on.
    pub async fn in_room(&self, room_id: &str) -> Vec<TeachingSlot> {
        let mut slots = self.snapshot_all().await;
        slots.retain(|s| s.room_id == room_id);
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_put_and_snapshot() {
        let store: Collection<String> = Collection::new();
        let id = Ulid::new();
        store.insert(id, "a".into());

        let mut guard = store.lock(&id).await.unwrap();
        assert_eq!(guard.get(), "a");
        guard.put("b".into());
        drop(guard);

        assert_eq!(store.snapshot(&id).await.as_deref(), Some("b"));
        assert!(store.lock(&Ulid::new()).await.is_none());
    }

    #[tokio::test]
    async fn waiter_sees_deletion() {
        let store: Arc<Collection<String>> = Arc::new(Collection::new());
        let id = Ulid::new();
        store.insert(id, "doc".into());

        let guard = store.lock(&id).await.unwrap();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.lock(&id).await.is_none() })
        };
        tokio::task::yield_now().await;
        guard.delete();
        store.remove(&id);

        assert!(waiter.await.unwrap());
        assert!(!store.contains(&id));
    }

    #[tokio::test]
    async fn restore_overwrites_in_place() {
        let store: Collection<u32> = Collection::new();
        let id = Ulid::new();
        store.restore(id, 1);
        store.restore(id, 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot(&id).await, Some(2));
    }
}
