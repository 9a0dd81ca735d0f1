use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<K, E> {
    next_id: u64,
    handlers: HashMap<K, Vec<(u64, Handler<E>)>>,
}

/// Typed publish/subscribe table: `key -> handlers`.
pub struct Dispatcher<K, E> {
    registry: Arc<Mutex<Registry<K, E>>>,
}

impl<K, E> Clone for Dispatcher<K, E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<K, E> Default for Dispatcher<K, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    E: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, E> Dispatcher<K, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    E: 'static,
{
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                handlers: HashMap::new(),
            })),
        }
    }

    /// Register `handler` for `key`. Dropping the returned subscription unregisters it.
    pub fn subscribe<F>(&self, key: K, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            let id = registry.next_id;
            registry.next_id += 1;
            registry
                .handlers
                .entry(key.clone())
                .or_default()
                .push((id, Arc::new(handler)));
            id
        };

        let weak: Weak<Mutex<Registry<K, E>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            let Some(registry) = weak.upgrade() else {
                return;
            };
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(list) = registry.handlers.get_mut(&key) {
                list.retain(|(hid, _)| *hid != id);
                if list.is_empty() {
                    registry.handlers.remove(&key);
                }
            }
        })
    }

    /// Call every handler registered for `key`, in subscription order.
    ///
    /// Handlers run outside the table lock and may subscribe or unsubscribe.
    pub fn emit(&self, key: &K, event: &E) -> usize {
        let handlers: Vec<Handler<E>> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .handlers
                .get(key)
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn handler_count(&self, key: &K) -> usize {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.handlers.get(key).map_or(0, Vec::len)
    }
}

/// Unsubscribe token. Unregisters on drop or on `cancel`.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new<F: FnOnce() + Send + 'static>(f: F) -> Self {
        Self {
            unsubscribe: Some(Box::new(f)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn handlers_only_see_their_key() {
        let dispatcher: Dispatcher<&'static str, u32> = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _sub = dispatcher.subscribe("sites", move |n| {
            h.fetch_add(*n as usize, Ordering::SeqCst);
        });

        assert_eq!(dispatcher.emit(&"sites", &2), 1);
        assert_eq!(dispatcher.emit(&"drbet", &5), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_the_subscription_unsubscribes() {
        let dispatcher: Dispatcher<&'static str, ()> = Dispatcher::new();
        let first = dispatcher.subscribe("sites", |_| {});
        let second = dispatcher.subscribe("sites", |_| {});
        assert_eq!(dispatcher.handler_count(&"sites"), 2);

        drop(first);
        assert_eq!(dispatcher.handler_count(&"sites"), 1);
        second.cancel();
        assert_eq!(dispatcher.handler_count(&"sites"), 0);
        assert_eq!(dispatcher.emit(&"sites", &()), 0);
    }

    #[test]
    fn subscriptions_outliving_the_dispatcher_are_harmless() {
        let dispatcher: Dispatcher<u8, ()> = Dispatcher::new();
        let sub = dispatcher.subscribe(1, |_| {});
        drop(dispatcher);
        drop(sub);
    }

    #[test]
    fn handlers_may_unsubscribe_while_being_called() {
        let dispatcher: Dispatcher<u8, ()> = Dispatcher::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let sub = dispatcher.subscribe(1, move |_| {
            inner.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        assert_eq!(dispatcher.emit(&1, &()), 1);
        assert_eq!(dispatcher.handler_count(&1), 0);
    }
}
