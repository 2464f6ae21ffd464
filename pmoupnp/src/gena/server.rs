//! Point d'entrée GENA d'un device : routage des requêtes par service
//! et câblage des propriétés évènementielles.

use super::GenaSettings;
use super::errors::GenaError;
use super::message::GenaMessage;
use super::notifier::{NotifySender, UreqNotifySender};
use super::property::{GenaProperty, GenaPropertySet};
use super::subscription_list::{GenaSubscriptionList, NotifyDispatch};
use crate::collections::{Keyed, ObservableSet, ObservableSetError};
use crate::events::{EventBus, ListenerId};
use crate::http::HttpMessage;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use pmoscheduler::{Scheduler, WorkerPool};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

impl Keyed for GenaProperty {
    fn key(&self) -> String {
        format!("{}/{}", self.service_id(), self.name())
    }
}

/// Événements observables d'un [`GenaServer`].
#[derive(Debug, Clone)]
pub enum GenaEvent {
    MessageReceived {
        service_id: String,
        request: GenaMessage,
    },
    Subscribed {
        service_id: String,
        sid: String,
    },
    Renewed {
        service_id: String,
        sid: String,
    },
    Unsubscribed {
        service_id: String,
        sid: String,
    },
}

pub struct GenaServer {
    scheduler: Arc<Scheduler>,
    sender: Arc<dyn NotifySender>,
    settings: GenaSettings,
    notify_pool: Arc<WorkerPool>,
    lists: Mutex<HashMap<String, GenaSubscriptionList>>,
    property_sets: Mutex<HashMap<String, Arc<GenaPropertySet>>>,
    properties: ObservableSet<GenaProperty>,
    bindings: Mutex<HashMap<String, ListenerId>>,
    events: EventBus<GenaEvent>,
}

impl GenaServer {
    /// Serveur livrant ses NOTIFY par HTTP.
    pub fn new(scheduler: Arc<Scheduler>, settings: GenaSettings) -> Arc<Self> {
        let sender = Arc::new(UreqNotifySender::new(settings.notify_timeout));
        Self::with_sender(scheduler, sender, settings)
    }

    pub fn with_sender(
        scheduler: Arc<Scheduler>,
        sender: Arc<dyn NotifySender>,
        settings: GenaSettings,
    ) -> Arc<Self> {
        let notify_pool = Arc::new(WorkerPool::new(
            "pmoupnp-gena-notify",
            settings.notify_workers,
        ));
        Arc::new_cyclic(|weak: &Weak<GenaServer>| {
            let (on_added, on_removed) = (weak.clone(), weak.clone());
            GenaServer {
                scheduler,
                sender,
                settings,
                notify_pool,
                lists: Mutex::new(HashMap::new()),
                property_sets: Mutex::new(HashMap::new()),
                properties: ObservableSet::with_hooks(
                    move |property: &Arc<GenaProperty>| {
                        if let Some(server) = on_added.upgrade() {
                            server.attach(property);
                        }
                    },
                    move |property: &Arc<GenaProperty>| {
                        if let Some(server) = on_removed.upgrade() {
                            server.detach(property);
                        }
                    },
                ),
                bindings: Mutex::new(HashMap::new()),
                events: EventBus::new(),
            }
        })
    }

    pub fn settings(&self) -> &GenaSettings {
        &self.settings
    }

    /// Traite une requête SUBSCRIBE, de renouvellement ou UNSUBSCRIBE
    /// adressée au service `service_id`.
    pub fn handle(
        &self,
        service_id: &str,
        request: &GenaMessage,
    ) -> Result<GenaMessage, GenaError> {
        self.events.broadcast(GenaEvent::MessageReceived {
            service_id: service_id.to_string(),
            request: request.clone(),
        });

        if request.is_renewal() {
            let list = self.subscription_list(service_id).ok_or_else(|| {
                GenaError::PreconditionFailed(format!("no subscription on {}", service_id))
            })?;
            let response = list.renew(request)?;
            if let Some(sid) = response.sid() {
                self.events.broadcast(GenaEvent::Renewed {
                    service_id: service_id.to_string(),
                    sid: sid.to_string(),
                });
            }
            Ok(response)
        } else if request.is_subscribe() {
            let response = self.ensure_list(service_id).subscribe(request)?;
            if let Some(sid) = response.sid() {
                self.events.broadcast(GenaEvent::Subscribed {
                    service_id: service_id.to_string(),
                    sid: sid.to_string(),
                });
            }
            Ok(response)
        } else if request.is_unsubscribe() {
            let list = self.subscription_list(service_id).ok_or_else(|| {
                GenaError::BadRequest(format!("unknown service {}", service_id))
            })?;
            let sid = request.sid().unwrap_or_default().to_string();
            let response = list.unsubscribe(request)?;
            self.events.broadcast(GenaEvent::Unsubscribed {
                service_id: service_id.to_string(),
                sid,
            });
            Ok(response)
        } else {
            Err(GenaError::BadRequest(format!(
                "unsupported GENA request: {}",
                request.message().start
            )))
        }
    }

    /// Variante brute : décode, traite et rend toujours une réponse HTTP.
    pub fn handle_bytes(&self, service_id: &str, data: &[u8]) -> HttpMessage {
        let request = match GenaMessage::parse(data) {
            Ok(request) => request,
            Err(e) => {
                debug!("Unparseable GENA request for {}: {}", service_id, e);
                return GenaError::BadRequest(e.to_string()).to_response();
            }
        };
        match self.handle(service_id, &request) {
            Ok(response) => response.into_message(),
            Err(e) => {
                warn!("❌ GENA request rejected on {}: {}", service_id, e);
                e.to_response()
            }
        }
    }

    fn ensure_list(&self, service_id: &str) -> GenaSubscriptionList {
        self.lists
            .lock()
            .entry(service_id.to_string())
            .or_insert_with(|| {
                GenaSubscriptionList::with_pool(
                    service_id,
                    self.scheduler.clone(),
                    self.sender.clone(),
                    self.settings.clone(),
                    self.notify_pool.clone(),
                )
            })
            .clone()
    }

    pub fn subscription_list(&self, service_id: &str) -> Option<GenaSubscriptionList> {
        self.lists.lock().get(service_id).cloned()
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.lists.lock().keys().cloned().collect()
    }

    /// Rattache une propriété à son service : chaque changement de valeur
    /// part en NOTIFY vers les abonnés de ce service.
    pub fn register_property(&self, property: Arc<GenaProperty>) -> Result<(), ObservableSetError> {
        self.properties.insert(property)
    }

    pub fn unregister_property(&self, service_id: &str, name: &str) -> Option<Arc<GenaProperty>> {
        self.properties.remove(&format!("{}/{}", service_id, name))
    }

    pub fn property(&self, service_id: &str, name: &str) -> Option<Arc<GenaProperty>> {
        self.properties.get(&format!("{}/{}", service_id, name))
    }

    pub fn property_set(&self, service_id: &str) -> Option<Arc<GenaPropertySet>> {
        self.property_sets.lock().get(service_id).cloned()
    }

    /// Envoie l'état courant des propriétés de `service_id` à ses abonnés.
    pub fn notify(&self, service_id: &str) -> Option<NotifyDispatch> {
        let list = self.subscription_list(service_id)?;
        let properties = self.property_set(service_id)?;
        Some(list.notify(&properties))
    }

    pub fn subscribe(&self) -> Receiver<GenaEvent> {
        self.events.subscribe()
    }

    fn attach(self: Arc<Self>, property: &Arc<GenaProperty>) {
        let service_id = property.service_id().to_string();
        self.property_sets
            .lock()
            .entry(service_id.clone())
            .or_default()
            .add(property.clone());

        let server = Arc::downgrade(&self);
        let id = property.on_change(move |change| {
            if let Some(server) = server.upgrade() {
                debug!(
                    "📤 {} changed on {}: {} -> {}",
                    change.name, change.service_id, change.old_value, change.new_value
                );
                server.notify(&service_id);
            }
        });
        self.bindings.lock().insert(property.key(), id);
    }

    fn detach(self: Arc<Self>, property: &Arc<GenaProperty>) {
        if let Some(id) = self.bindings.lock().remove(&property.key()) {
            property.remove_listener(id);
        }
        if let Some(set) = self.property_sets.lock().get(property.service_id()) {
            set.remove(property.name());
        }
    }
}
