use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callback registry behind the `on_update` surfaces.
///
/// Callbacks are keyed by a monotonically increasing id in a `BTreeMap`, so
/// each publish delivers in registration order. Delivery is synchronous:
/// `publish` clones the callback list, releases the lock, then invokes each
/// callback, so callbacks may re-enter the owning component (including
/// subscribing or unsubscribing) without deadlocking.
pub struct SubscriberSet<T> {
    callbacks: Arc<Mutex<BTreeMap<u64, Callback<T>>>>,
    next_id: AtomicU64,
}

impl<T> SubscriberSet<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a callback for future publishes. Dropping the returned
    /// handle does not deregister; call [`Subscription::unsubscribe`].
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        Subscription {
            id,
            callbacks: Arc::downgrade(&self.callbacks),
        }
    }

    pub fn publish(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for SubscriberSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one registered callback.
pub struct Subscription<T> {
    id: u64,
    callbacks: Weak<Mutex<BTreeMap<u64, Callback<T>>>>,
}

impl<T> Subscription<T> {
    pub fn unsubscribe(self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delivers_to_all_subscribers() {
        let set: SubscriberSet<u32> = SubscriberSet::new();
        let seen_a = Arc::new(AtomicUsize::new(0));
        let seen_b = Arc::new(AtomicUsize::new(0));

        let a = seen_a.clone();
        let _sub_a = set.subscribe(move |v| {
            a.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let b = seen_b.clone();
        let _sub_b = set.subscribe(move |v| {
            b.fetch_add(*v as usize, Ordering::SeqCst);
        });

        set.publish(&3);
        assert_eq!(seen_a.load(Ordering::SeqCst), 3);
        assert_eq!(seen_b.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delivery_follows_registration_order() {
        let set: SubscriberSet<u32> = SubscriberSet::new();
        let order: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..8u64 {
            let sink = order.clone();
            set.subscribe(move |_| sink.lock().unwrap().push(tag));
        }

        set.publish(&0);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let set: SubscriberSet<u32> = SubscriberSet::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let s = seen.clone();
        let sub = set.subscribe(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        set.publish(&1);
        sub.unsubscribe();
        set.publish(&1);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn publish_survives_reentrant_unsubscribe() {
        let set: Arc<SubscriberSet<u32>> = Arc::new(SubscriberSet::new());
        let slot: Arc<Mutex<Option<Subscription<u32>>>> = Arc::new(Mutex::new(None));

        let slot_in_cb = slot.clone();
        let sub = set.subscribe(move |_| {
            if let Some(sub) = slot_in_cb.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        set.publish(&1);
        assert!(set.is_empty());
    }
}
