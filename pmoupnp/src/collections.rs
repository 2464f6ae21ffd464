//! Collection observable d'objets partagés
//!
//! [`ObservableSet`] indexe des `Arc<V>` par une clé texte, conserve l'ordre
//! d'insertion et appelle deux hooks fournis à la construction :
//! `on_added` après chaque ajout, `on_removed` après chaque retrait. Les
//! hooks tournent hors du verrou ; ils peuvent donc relire le set.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Objet indexable par une clé texte unique dans son set.
pub trait Keyed {
    fn key(&self) -> String;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObservableSetError {
    #[error("Object {0} already exists in the set")]
    AlreadyExists(String),
}

pub type SetHook<V> = Box<dyn Fn(&Arc<V>) + Send + Sync + 'static>;

pub struct ObservableSet<V: Keyed> {
    items: RwLock<Vec<(String, Arc<V>)>>,
    on_added: Option<SetHook<V>>,
    on_removed: Option<SetHook<V>>,
}

impl<V: Keyed> ObservableSet<V> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            on_added: None,
            on_removed: None,
        }
    }

    pub fn with_hooks<A, R>(on_added: A, on_removed: R) -> Self
    where
        A: Fn(&Arc<V>) + Send + Sync + 'static,
        R: Fn(&Arc<V>) + Send + Sync + 'static,
    {
        Self {
            items: RwLock::new(Vec::new()),
            on_added: Some(Box::new(on_added)),
            on_removed: Some(Box::new(on_removed)),
        }
    }

    fn added(&self, item: &Arc<V>) {
        if let Some(hook) = &self.on_added {
            hook(item);
        }
    }

    fn removed(&self, item: &Arc<V>) {
        if let Some(hook) = &self.on_removed {
            hook(item);
        }
    }

    /// Ajoute `item` ; refuse une clé déjà présente.
    pub fn insert(&self, item: Arc<V>) -> Result<(), ObservableSetError> {
        let key = item.key();
        {
            let mut items = self.items.write();
            if items.iter().any(|(k, _)| *k == key) {
                return Err(ObservableSetError::AlreadyExists(key));
            }
            items.push((key, item.clone()));
        }
        self.added(&item);
        Ok(())
    }

    /// Ajoute ou remplace ; l'ancien objet passe par `on_removed`.
    pub fn insert_or_replace(&self, item: Arc<V>) -> Option<Arc<V>> {
        let key = item.key();
        let previous = {
            let mut items = self.items.write();
            match items.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => Some(std::mem::replace(&mut slot.1, item.clone())),
                None => {
                    items.push((key, item.clone()));
                    None
                }
            }
        };
        if let Some(previous) = &previous {
            self.removed(previous);
        }
        self.added(&item);
        previous
    }

    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        let removed = {
            let mut items = self.items.write();
            let idx = items.iter().position(|(k, _)| k == key)?;
            items.remove(idx).1
        };
        self.removed(&removed);
        Some(removed)
    }

    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.items
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.read().iter().any(|(k, _)| k == key)
    }

    /// Objets dans l'ordre d'insertion.
    pub fn all(&self) -> Vec<Arc<V>> {
        self.items.read().iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.read().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Keyed> Default for ObservableSet<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Keyed> fmt::Debug for ObservableSet<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableSet")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Item(&'static str);

    impl Keyed for Item {
        fn key(&self) -> String {
            self.0.to_string()
        }
    }

    fn journal() -> (Arc<Mutex<Vec<String>>>, ObservableSet<Item>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, r) = (log.clone(), log.clone());
        let set = ObservableSet::with_hooks(
            move |i: &Arc<Item>| a.lock().push(format!("+{}", i.0)),
            move |i: &Arc<Item>| r.lock().push(format!("-{}", i.0)),
        );
        (log, set)
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let (log, set) = journal();
        set.insert(Arc::new(Item("a"))).unwrap();
        assert_eq!(
            set.insert(Arc::new(Item("a"))),
            Err(ObservableSetError::AlreadyExists("a".to_string()))
        );
        assert_eq!(set.len(), 1);
        assert_eq!(*log.lock(), vec!["+a"]);
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let set = ObservableSet::new();
        for k in ["c", "a", "b"] {
            set.insert(Arc::new(Item(k))).unwrap();
        }
        assert_eq!(set.keys(), vec!["c", "a", "b"]);
        assert!(set.contains("a"));
        assert!(set.get("z").is_none());
    }

    #[test]
    fn test_replace_and_remove_fire_hooks() {
        let (log, set) = journal();
        set.insert(Arc::new(Item("a"))).unwrap();
        assert!(set.insert_or_replace(Arc::new(Item("a"))).is_some());
        assert!(set.remove("a").is_some());
        assert!(set.remove("a").is_none());
        assert!(set.is_empty());
        assert_eq!(*log.lock(), vec!["+a", "-a", "+a", "-a"]);
    }

    #[test]
    fn test_hook_can_read_the_set() {
        let seen = Arc::new(Mutex::new(0usize));
        let s = seen.clone();
        let set: Arc<ObservableSet<Item>> = Arc::new_cyclic(|weak: &std::sync::Weak<ObservableSet<Item>>| {
            let weak = weak.clone();
            ObservableSet::with_hooks(
                move |_: &Arc<Item>| {
                    if let Some(set) = weak.upgrade() {
                        *s.lock() = set.len();
                    }
                },
                |_: &Arc<Item>| {},
            )
        });
        set.insert(Arc::new(Item("a"))).unwrap();
        set.insert(Arc::new(Item("b"))).unwrap();
        assert_eq!(*seen.lock(), 2);
    }
}
