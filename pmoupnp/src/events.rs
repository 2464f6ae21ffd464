//! Observateurs et bus d'événements
//!
//! Deux mécanismes cohabitent :
//! - [`Listeners`] : callbacks synchrones, appelés sur le thread qui émet ;
//! - [`EventBus`] : diffusion sur canaux crossbeam, pour les consommateurs
//!   qui préfèrent tirer les événements à leur rythme.

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifiant rendu par [`Listeners::add`], à passer à [`Listeners::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

/// Liste de callbacks.
///
/// `emit` travaille sur une copie de la liste : un callback peut donc
/// s'enregistrer ou se retirer lui-même sans interblocage.
pub struct Listeners<T> {
    entries: Mutex<Vec<(ListenerId, Listener<T>)>>,
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.add_arc(Arc::new(listener))
    }

    pub fn add_arc(&self, listener: Listener<T>) -> ListenerId {
        let id = ListenerId::next();
        self.entries.lock().push((id, listener));
        id
    }

    /// Retourne `true` si le callback était enregistré.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(lid, _)| *lid != id);
        entries.len() != before
    }

    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bus de diffusion : chaque abonné reçoit une copie de chaque événement.
///
/// Les abonnés dont le `Receiver` a été détruit sont oubliés au prochain
/// `broadcast`.
#[derive(Clone)]
pub struct EventBus<T: Clone> {
    subscribers: Arc<Mutex<Vec<Sender<T>>>>,
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded::<T>();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn broadcast(&self, event: T) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_listeners_add_emit_remove() {
        let listeners: Listeners<u32> = Listeners::new();
        let total = Arc::new(AtomicUsize::new(0));
        let t = total.clone();
        let id = listeners.add(move |v| {
            t.fetch_add(*v as usize, Ordering::SeqCst);
        });

        listeners.emit(&3);
        listeners.emit(&4);
        assert_eq!(total.load(Ordering::SeqCst), 7);

        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.emit(&10);
        assert_eq!(total.load(Ordering::SeqCst), 7);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_listener_can_remove_itself() {
        let listeners: Arc<Listeners<()>> = Arc::new(Listeners::new());
        let slot = Arc::new(Mutex::new(None));
        let (l, s) = (listeners.clone(), slot.clone());
        let id = listeners.add(move |_| {
            if let Some(id) = *s.lock() {
                l.remove(id);
            }
        });
        *slot.lock() = Some(id);

        listeners.emit(&());
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_event_bus_drops_closed_receivers() {
        let bus: EventBus<&'static str> = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        drop(rx2);

        bus.broadcast("hello");
        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(bus.subscriber_count(), 1);
    }
}
