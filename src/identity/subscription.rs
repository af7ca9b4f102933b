//! Listener registry shared by the identity provider and the session store.
//! A `Subscription` unregisters its callback when dropped, so a context that goes
//! away cannot leave a dangling listener behind.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback<T>>,
}

pub struct Listeners<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self { inner: Arc::new(Mutex::new(Registry { next_id: 1, callbacks: BTreeMap::new() })) }
    }
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self { Self::default() }

    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_callback(Arc::new(f))
    }

    pub fn subscribe_callback(&self, cb: Callback<T>) -> Subscription {
        let id = {
            let mut reg = self.inner.lock();
            let id = reg.next_id;
            reg.next_id += 1;
            reg.callbacks.insert(id, cb);
            id
        };
        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            release: Some(Box::new(move || {
                if let Some(reg) = weak.upgrade() {
                    reg.lock().callbacks.remove(&id);
                }
            })),
        }
    }

    /// Invoke every registered callback in subscription order. The registry lock is
    /// released first so callbacks may subscribe or unsubscribe.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self.inner.lock().callbacks.values().cloned().collect();
        for cb in snapshot {
            cb(value);
        }
    }

    pub fn len(&self) -> usize { self.inner.lock().callbacks.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Unsubscribe handle. Dropping it releases the callback.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) { self.release_now(); }

    fn release_now(&mut self) {
        if let Some(f) = self.release.take() { f(); }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) { self.release_now(); }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.release.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn drop_releases_callback() {
        let l: Listeners<u32> = Listeners::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = l.subscribe(move |v| { h.fetch_add(*v as usize, Ordering::SeqCst); });
        l.emit(&2);
        assert_eq!(l.len(), 1);
        drop(sub);
        l.emit(&5);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(l.is_empty());
    }

    #[test]
    fn explicit_unsubscribe() {
        let l: Listeners<()> = Listeners::new();
        let sub = l.subscribe(|_| {});
        sub.unsubscribe();
        assert!(l.is_empty());
    }

    #[test]
    fn subscription_outliving_registry_is_harmless() {
        let l: Listeners<()> = Listeners::new();
        let sub = l.subscribe(|_| {});
        drop(l);
        drop(sub);
    }
}
