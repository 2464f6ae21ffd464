//! Propriétés évènementielles et leur sérialisation `propertyset`

use crate::events::{ListenerId, Listeners};
use parking_lot::{Mutex, RwLock};
use quick_xml::escape::escape;
use std::fmt;
use std::sync::Arc;

pub const EVENT_NAMESPACE: &str = "urn:schemas-upnp-org:event-1-0";

/// Changement de valeur d'une propriété.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    pub service_id: String,
    pub name: String,
    pub old_value: String,
    pub new_value: String,
}

/// Variable d'état évènementielle d'un service.
pub struct GenaProperty {
    service_id: String,
    name: String,
    value: RwLock<String>,
    listeners: Listeners<PropertyChange>,
}

impl GenaProperty {
    pub fn new(
        service_id: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            service_id: service_id.into(),
            name: name.into(),
            value: RwLock::new(value.into()),
            listeners: Listeners::new(),
        })
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> String {
        self.value.read().clone()
    }

    /// Change la valeur et prévient les observateurs.
    ///
    /// Retourne `false` (sans notification) si la valeur est inchangée.
    pub fn set_value(&self, value: impl Into<String>) -> bool {
        let value = value.into();
        let old_value = {
            let mut current = self.value.write();
            if *current == value {
                return false;
            }
            std::mem::replace(&mut *current, value.clone())
        };
        self.listeners.emit(&PropertyChange {
            service_id: self.service_id.clone(),
            name: self.name.clone(),
            old_value,
            new_value: value,
        });
        true
    }

    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PropertyChange) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// `<e:property><Name>valeur</Name></e:property>`
    pub fn to_xml(&self) -> String {
        format!(
            "<e:property><{name}>{value}</{name}></e:property>",
            name = self.name,
            value = escape(self.value().as_str())
        )
    }
}

impl fmt::Debug for GenaProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenaProperty")
            .field("service_id", &self.service_id)
            .field("name", &self.name)
            .field("value", &*self.value.read())
            .finish()
    }
}

/// Propriétés d'un service, dans l'ordre d'ajout.
#[derive(Default)]
pub struct GenaPropertySet {
    properties: Mutex<Vec<Arc<GenaProperty>>>,
}

impl GenaPropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` si une propriété du même nom est déjà présente.
    pub fn add(&self, property: Arc<GenaProperty>) -> bool {
        let mut properties = self.properties.lock();
        if properties.iter().any(|p| p.name() == property.name()) {
            return false;
        }
        properties.push(property);
        true
    }

    pub fn remove(&self, name: &str) -> Option<Arc<GenaProperty>> {
        let mut properties = self.properties.lock();
        let idx = properties.iter().position(|p| p.name() == name)?;
        Some(properties.remove(idx))
    }

    pub fn get(&self, name: &str) -> Option<Arc<GenaProperty>> {
        self.properties
            .lock()
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.properties.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Corps XML d'un NOTIFY, avec les valeurs courantes.
    pub fn to_xml(&self) -> String {
        let properties = self.properties.lock().clone();
        let mut xml = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><e:propertyset xmlns:e=\"{}\">",
            EVENT_NAMESPACE
        );
        for property in &properties {
            xml.push_str(&property.to_xml());
        }
        xml.push_str("</e:propertyset>");
        xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_set_value_notifies_only_on_change() {
        let prop = GenaProperty::new("urn:upnp-org:serviceId:AVTransport", "LastChange", "a");
        let changes = Arc::new(AtomicUsize::new(0));
        let c = changes.clone();
        prop.on_change(move |change| {
            assert_eq!(change.name, "LastChange");
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!prop.set_value("a"));
        assert!(prop.set_value("b"));
        assert!(prop.set_value("c"));
        assert_eq!(changes.load(Ordering::SeqCst), 2);
        assert_eq!(prop.value(), "c");
    }

    #[test]
    fn test_propertyset_xml_keeps_order_and_escapes() {
        let set = GenaPropertySet::new();
        assert!(set.add(GenaProperty::new("svc", "Volume", "42")));
        assert!(set.add(GenaProperty::new("svc", "Title", "Tom & <Jerry>")));
        assert!(!set.add(GenaProperty::new("svc", "Volume", "0")));

        assert_eq!(
            set.to_xml(),
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <e:propertyset xmlns:e=\"urn:schemas-upnp-org:event-1-0\">\
             <e:property><Volume>42</Volume></e:property>\
             <e:property><Title>Tom &amp; &lt;Jerry&gt;</Title></e:property>\
             </e:propertyset>"
        );
        assert!(set.remove("Volume").is_some());
        assert_eq!(set.len(), 1);
    }
}
