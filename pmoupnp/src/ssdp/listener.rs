//! Écoute passive des annonces NOTIFY

use super::message::SsdpMessage;
use super::protocol::{DiscoveryEndpoints, NOTIFY_METHOD};
use crate::events::{EventBus, ListenerId, Listeners};
use crate::net::{Datagram, DatagramTransport, HandlerId};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use pmoutils::is_multicast;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Événements SSDP intéressants pour un control point
#[derive(Debug, Clone)]
pub enum SsdpEvent {
    Alive(SsdpMessage),
    ByeBye(SsdpMessage),
    SearchResponse(SsdpMessage),
}

impl SsdpEvent {
    pub fn message(&self) -> &SsdpMessage {
        match self {
            SsdpEvent::Alive(m) | SsdpEvent::ByeBye(m) | SsdpEvent::SearchResponse(m) => m,
        }
    }
}

pub(crate) struct ListenerInner {
    transport: Arc<dyn DatagramTransport>,
    handler: Mutex<Option<HandlerId>>,
    bus: EventBus<SsdpEvent>,
    listeners: Listeners<SsdpEvent>,
}

impl ListenerInner {
    pub(crate) fn publish(&self, event: SsdpEvent) {
        self.listeners.emit(&event);
        self.bus.broadcast(event);
    }

    fn on_datagram(&self, datagram: &Datagram) {
        let msg = match SsdpMessage::parse(&datagram.data, datagram.source) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Ignoring malformed datagram from {}: {}", datagram.source, e);
                return;
            }
        };
        let is_notify = msg
            .message()
            .method()
            .is_some_and(|m| m.eq_ignore_ascii_case(NOTIFY_METHOD));
        if !is_notify {
            return;
        }
        trace!("📥 NOTIFY {} from {} (NT={})", msg.notification_sub_type(), msg.source(), msg.notification_type());
        let event = if msg.is_alive() {
            SsdpEvent::Alive(msg)
        } else {
            SsdpEvent::ByeBye(msg)
        };
        self.publish(event);
    }
}

/// Reçoit les NOTIFY alive/byebye d'un transport et les publie.
#[derive(Clone)]
pub struct SsdpListener {
    inner: Arc<ListenerInner>,
}

impl SsdpListener {
    pub fn new(transport: Arc<dyn DatagramTransport>) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                transport,
                handler: Mutex::new(None),
                bus: EventBus::new(),
                listeners: Listeners::new(),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<ListenerInner> {
        &self.inner
    }

    /// Démarre l'écoute et rejoint les groupes multicast donnés
    /// (par défaut 239.255.255.250).
    pub fn start_listening(&self, endpoints: &[SocketAddr]) -> io::Result<()> {
        let endpoints: Vec<SocketAddr> = if endpoints.is_empty() {
            vec![DiscoveryEndpoints::IPV4]
        } else {
            endpoints.to_vec()
        };

        {
            let mut handler = self.inner.handler.lock();
            if handler.is_none() {
                let weak: Weak<ListenerInner> = Arc::downgrade(&self.inner);
                *handler = Some(self.inner.transport.add_handler(Arc::new(move |d: &Datagram| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_datagram(d);
                    }
                })));
            }
        }

        self.inner.transport.start_listening()?;
        for ep in endpoints.iter().filter(|ep| is_multicast(&ep.ip())) {
            self.inner.transport.join_multicast_all_interfaces(ep.ip());
        }
        Ok(())
    }

    /// Quitte les groupes donnés ; sans argument, arrête l'écoute.
    pub fn stop_listening_on(&self, endpoints: &[SocketAddr]) {
        if endpoints.is_empty() {
            self.stop_listening();
            return;
        }
        if !self.inner.transport.is_listening() {
            return;
        }
        for ep in endpoints.iter().filter(|ep| is_multicast(&ep.ip())) {
            if let Err(e) = self.inner.transport.leave_multicast_group(ep.ip(), None) {
                trace!("leave {}: {}", ep.ip(), e);
            }
        }
    }

    pub fn stop_listening(&self) {
        if let Some(id) = self.inner.handler.lock().take() {
            self.inner.transport.remove_handler(id);
        }
        self.inner.transport.stop_listening();
    }

    pub fn is_listening(&self) -> bool {
        self.inner.handler.lock().is_some() && self.inner.transport.is_listening()
    }

    /// Canal recevant tous les événements publiés à partir de maintenant.
    pub fn subscribe(&self) -> Receiver<SsdpEvent> {
        self.inner.bus.subscribe()
    }

    /// Callback synchrone, appelé sur le thread de réception.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SsdpEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }
}
