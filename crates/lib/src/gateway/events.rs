//! Listener registry: fan-out of state changes, RPC events, and binary
//! messages to any number of subscribers.
//!
//! Callbacks are invoked outside the registry lock, so a listener may
//! subscribe or unsubscribe from inside its own callback without deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Token returned by subscribe. Call [`Subscription::unsubscribe`] to remove
/// the listener; dropping the token leaves the listener registered.
pub struct Subscription(Option<Box<dyn FnOnce() + Send>>);

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

struct Table<T> {
    next_id: u64,
    entries: HashMap<u64, Arc<dyn Fn(&T) + Send + Sync>>,
}

/// A set of registered callbacks for one stream of values.
pub(crate) struct Listeners<T> {
    inner: Arc<Mutex<Table<T>>>,
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Table {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut table = self.inner.lock().unwrap();
            let id = table.next_id;
            table.next_id += 1;
            table.entries.insert(id, Arc::new(listener));
            id
        };
        let weak: Weak<Mutex<Table<T>>> = Arc::downgrade(&self.inner);
        Subscription(Some(Box::new(move || {
            if let Some(table) = weak.upgrade() {
                table.lock().unwrap().entries.remove(&id);
            }
        })))
    }

    pub fn emit(&self, value: &T) {
        let listeners: Vec<_> = {
            let table = self.inner.lock().unwrap();
            table.entries.values().cloned().collect()
        };
        for listener in listeners {
            listener(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_to_every_subscriber() {
        let listeners: Listeners<u32> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        let _s1 = listeners.subscribe(move |v| {
            c1.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let _s2 = listeners.subscribe(move |v| {
            c2.fetch_add(*v as usize, Ordering::SeqCst);
        });
        listeners.emit(&3);
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let listeners: Listeners<u32> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        listeners.emit(&1);
        sub.unsubscribe();
        listeners.emit(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_the_token_keeps_the_listener() {
        let listeners: Listeners<u32> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);
        listeners.emit(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
