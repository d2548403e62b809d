//! Minimal observable values for exposing store state to consumers.
//!
//! An [`Observable`] is a shared value holder. Consumers either register a
//! synchronous listener with [`Observable::subscribe`] or take a
//! [`tokio::sync::watch::Receiver`] with [`Observable::watch`]. Derived values
//! are built with [`Observable::map`] and recompute whenever the source changes.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError, RwLock,
};

use tokio::sync::watch;

/// Callback invoked with the new value after every change.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identifies a listener registered with [`Observable::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct ObservableInner<T> {
    sender: watch::Sender<T>,
    listeners: RwLock<Vec<(SubscriptionId, Listener<T>)>>,
    next_id: AtomicU64,
    delivery: Mutex<Delivery>,
}

// one thread at a time delivers to listeners; changes made meanwhile are picked up by its loop
#[derive(Default)]
struct Delivery {
    running: bool,
    pending: bool,
}

// releases the delivery role if a listener panics
struct DeliveryRole<'a> {
    delivery: &'a Mutex<Delivery>,
    held: bool,
}

impl Drop for DeliveryRole<'_> {
    fn drop(&mut self) {
        if self.held {
            let mut delivery = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
            delivery.running = false;
        }
    }
}

/// Shared value with change notification. Clones share the same value.
pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Observable")
            .field(&*self.inner.sender.borrow())
            .finish()
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an observable holding `value`.
    pub fn new(value: T) -> Self {
        let (sender, _) = watch::channel(value);
        Self {
            inner: Arc::new(ObservableInner {
                sender,
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
                delivery: Mutex::new(Delivery::default()),
            }),
        }
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.inner.sender.borrow().clone()
    }

    /// Reads the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.sender.borrow())
    }

    /// Replaces the value and notifies every listener.
    ///
    /// Listeners always end up seeing the latest value. Changes made concurrently, or from within a
    /// listener, may be delivered together as one notification carrying the latest value.
    pub fn set(&self, value: T) {
        self.stage(value);
        self.publish();
    }

    /// Modifies the value in place and notifies every listener.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.inner.sender.send_modify(f);
        self.publish();
    }

    /// Replaces the value without notifying listeners. Watchers see it at once.
    ///
    /// Owners staging a value under their own lock call [`Observable::publish`] after releasing it.
    pub(crate) fn stage(&self, value: T) {
        self.inner.sender.send_replace(value);
    }

    /// Delivers the current value to every listener.
    pub(crate) fn publish(&self) {
        {
            let mut delivery = self
                .inner
                .delivery
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            delivery.pending = true;
            if delivery.running {
                return;
            }
            delivery.running = true;
        }

        let mut role = DeliveryRole {
            delivery: &self.inner.delivery,
            held: true,
        };
        loop {
            {
                let mut delivery = self
                    .inner
                    .delivery
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                // checked and released in one critical section so no change is left undelivered
                if !delivery.pending {
                    delivery.running = false;
                    role.held = false;
                    return;
                }
                delivery.pending = false;
            }
            let value = self.get();
            self.notify(&value);
        }
    }

    /// Registers `listener`, called after every change. It is not called with the current value.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Receiver for async consumers. The current value counts as seen.
    pub fn watch(&self) -> watch::Receiver<T> {
        self.inner.sender.subscribe()
    }

    /// Derived observable holding `f` applied to this value, recomputed on every change.
    ///
    /// The derived value only notifies its own listeners when the result changes.
    pub fn map<U, F>(&self, f: F) -> Observable<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let derived = Observable::new(self.with(&f));
        let target = derived.clone();
        self.subscribe(move |value| {
            target.set_if_changed(f(value));
        });
        derived
    }

    // listeners are cloned out so a listener may subscribe or set other observables
    fn notify(&self, value: &T) {
        let listeners: Vec<Listener<T>> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(value);
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Replaces the value only if it differs. Returns `true` if listeners were notified.
    pub fn set_if_changed(&self, value: T) -> bool {
        let changed = self.inner.sender.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
        if changed {
            self.publish();
        }
        changed
    }
}

impl<T> Default for Observable<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn set_notifies_listeners() {
        let observable = Observable::new(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        observable.subscribe(move |value| sink.lock().unwrap().push(*value));

        observable.set(2);
        observable.update(|value| *value += 1);

        assert_eq!(observable.get(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn listener_may_set_its_own_observable() {
        let observable = Observable::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let clamp = observable.clone();
        observable.subscribe(move |value| {
            sink.lock().unwrap().push(*value);
            if *value > 10 {
                clamp.set(10);
            }
        });

        observable.set(15);
        assert_eq!(observable.get(), 10);
        assert_eq!(*seen.lock().unwrap(), vec![15, 10]);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let observable = Observable::new(0);
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let id = observable.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        observable.set(1);
        assert!(observable.unsubscribe(id));
        assert!(!observable.unsubscribe(id));
        observable.set(2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn map_recomputes_and_dedups() {
        let count = Observable::new(0usize);
        let positive = count.map(|count| *count > 0);
        let flips = Arc::new(AtomicU64::new(0));
        let flip_counter = Arc::clone(&flips);
        positive.subscribe(move |_| {
            flip_counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!positive.get());
        count.set(1);
        count.set(2);
        assert!(positive.get());
        count.set(0);
        assert!(!positive.get());
        assert_eq!(flips.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn set_if_changed_skips_equal_values() {
        let observable = Observable::new("a".to_string());
        assert!(!observable.set_if_changed("a".to_string()));
        assert!(observable.set_if_changed("b".to_string()));
    }

    #[tokio::test]
    async fn watch_sees_changes() {
        let observable = Observable::new(0);
        let mut receiver = observable.watch();
        observable.set(5);
        receiver.changed().await.unwrap();
        assert_eq!(*receiver.borrow(), 5);
    }
}
