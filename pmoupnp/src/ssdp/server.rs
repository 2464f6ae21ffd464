//! Serveur SSDP : annonceurs d'un ou plusieurs devices et réponses M-SEARCH

use super::announcer::{AnnouncerId, Announcement, SsdpAnnouncer};
use super::device::SsdpDevice;
use super::message::SsdpMessage;
use super::protocol::{DEFAULT_MX, DiscoveryEndpoints, MAX_MX, SSDP_ALL};
use crate::net::{Datagram, DatagramTransport, HandlerId};
use parking_lot::Mutex;
use pmoscheduler::Scheduler;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace};

struct AnnouncerEntry {
    announcer: SsdpAnnouncer,
    respond_to_searches: bool,
}

struct ServerInner {
    scheduler: Arc<Scheduler>,
    transport: Arc<dyn DatagramTransport>,
    announcers: Mutex<BTreeMap<AnnouncerId, AnnouncerEntry>>,
    /// UUID -> (device, annonceurs créés pour ses NT)
    devices: Mutex<HashMap<String, (SsdpDevice, Vec<AnnouncerId>)>>,
    handler: Mutex<Option<HandlerId>>,
}

/// Serveur SSDP gérant les annonces et les réponses aux recherches.
///
/// Chaque annonceur peut être exclu des réponses M-SEARCH. Les réponses
/// partent après un délai aléatoire dans [0, MX] secondes.
pub struct SsdpServer {
    inner: Arc<ServerInner>,
}

impl SsdpServer {
    pub fn new(scheduler: Arc<Scheduler>, transport: Arc<dyn DatagramTransport>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                scheduler,
                transport,
                announcers: Mutex::new(BTreeMap::new()),
                devices: Mutex::new(HashMap::new()),
                handler: Mutex::new(None),
            }),
        }
    }

    pub fn transport(&self) -> Arc<dyn DatagramTransport> {
        self.inner.transport.clone()
    }

    /// Crée un annonceur (non démarré) partageant le transport du serveur.
    pub fn create_announcer(
        &self,
        announcement: Announcement,
        respond_to_searches: bool,
    ) -> SsdpAnnouncer {
        let announcer = SsdpAnnouncer::new(
            self.inner.scheduler.clone(),
            self.inner.transport.clone(),
            announcement,
        );
        self.inner.announcers.lock().insert(
            announcer.id(),
            AnnouncerEntry {
                announcer: announcer.clone(),
                respond_to_searches,
            },
        );
        announcer
    }

    /// Retire un annonceur ; s'il tournait, son byebye est envoyé.
    pub fn remove_announcer(&self, id: AnnouncerId) -> bool {
        let removed = self.inner.announcers.lock().remove(&id);
        match removed {
            Some(entry) => {
                entry.announcer.shutdown();
                true
            }
            None => false,
        }
    }

    /// `false` si l'annonceur est inconnu.
    pub fn set_respond_to_searches(&self, id: AnnouncerId, respond: bool) -> bool {
        match self.inner.announcers.lock().get_mut(&id) {
            Some(entry) => {
                entry.respond_to_searches = respond;
                true
            }
            None => false,
        }
    }

    pub fn announcers(&self) -> Vec<SsdpAnnouncer> {
        self.inner
            .announcers
            .lock()
            .values()
            .map(|e| e.announcer.clone())
            .collect()
    }

    pub fn announcer(&self, id: AnnouncerId) -> Option<SsdpAnnouncer> {
        self.inner.announcer(id)
    }

    /// Annonceurs actifs en réponse qui correspondent au ST de la requête.
    pub fn matching_announcers(&self, msg: &SsdpMessage) -> Vec<SsdpAnnouncer> {
        self.inner.matching_announcers(msg)
    }

    /// Écoute les M-SEARCH sur le groupe IPv4 de toutes les interfaces.
    pub fn start_listening(&self) -> io::Result<()> {
        {
            let mut handler = self.inner.handler.lock();
            if handler.is_none() {
                let weak: Weak<ServerInner> = Arc::downgrade(&self.inner);
                let id = self.inner.transport.add_handler(Arc::new(move |d: &Datagram| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_datagram(d);
                    }
                }));
                *handler = Some(id);
            }
        }

        self.inner
            .transport
            .join_multicast_all_interfaces(DiscoveryEndpoints::IPV4.ip());
        self.inner.transport.start_listening()?;

        if let Ok(addr) = self.inner.transport.local_addr() {
            info!("✅ SSDP server listening on {}", addr);
        }
        Ok(())
    }

    pub fn stop_listening(&self) {
        if let Some(id) = self.inner.handler.lock().take() {
            self.inner.transport.remove_handler(id);
        }
        self.inner.transport.stop_listening();
    }

    pub fn is_listening(&self) -> bool {
        self.inner.is_listening()
    }

    /// Planifie une réponse par annonceur correspondant et retourne leur
    /// nombre. Les annonces et les réponses sont ignorées.
    pub fn respond_to_search(&self, msg: &SsdpMessage) -> usize {
        self.inner.respond_to_search(msg)
    }

    /// Crée et démarre un annonceur par type de notification du device.
    pub fn add_device(&self, device: SsdpDevice) {
        let mut ids = Vec::with_capacity(device.notification_types.len());
        for nt in device.get_notification_types() {
            let announcement = Announcement {
                max_age: device.max_age,
                user_agent: device.user_agent.clone(),
                ..Announcement::new(nt.clone(), device.usn_for(nt), device.location.clone())
            };
            let announcer = self.create_announcer(announcement, true);
            announcer.start();
            ids.push(announcer.id());
        }

        info!(
            "✅ SSDP device added: uuid:{} ({} notification types)",
            device.uuid,
            ids.len()
        );

        let previous = self
            .inner
            .devices
            .lock()
            .insert(device.uuid.clone(), (device, ids));
        if let Some((_, old_ids)) = previous {
            for id in old_ids {
                self.remove_announcer(id);
            }
        }
    }

    /// Retire un device ; un byebye part pour chacun de ses NT.
    pub fn remove_device(&self, uuid: &str) -> bool {
        let removed = self.inner.devices.lock().remove(uuid);
        match removed {
            Some((_, ids)) => {
                for id in ids {
                    self.remove_announcer(id);
                }
                info!("👋 SSDP device removed: uuid:{}", uuid);
                true
            }
            None => false,
        }
    }

    pub fn devices(&self) -> Vec<SsdpDevice> {
        self.inner
            .devices
            .lock()
            .values()
            .map(|(d, _)| d.clone())
            .collect()
    }

    /// Arrête l'écoute puis tous les annonceurs (byebye compris).
    pub fn shutdown(&self) {
        self.stop_listening();
        self.inner.devices.lock().clear();
        let drained: Vec<AnnouncerEntry> = {
            let mut announcers = self.inner.announcers.lock();
            std::mem::take(&mut *announcers).into_values().collect()
        };
        if !drained.is_empty() {
            info!("✅ Shutting down SSDP server, sending byebye for all announcers");
        }
        for entry in drained {
            entry.announcer.shutdown();
        }
    }
}

impl Drop for SsdpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Règle de correspondance M-SEARCH : `ssdp:all`, USN exact pour un ST de
/// forme `uuid:`, sinon égalité avec le NT.
pub(crate) fn search_matches(search_type: &str, notification_type: &str, usn: &str) -> bool {
    if search_type == SSDP_ALL {
        return true;
    }
    if search_type.starts_with("uuid:") {
        return search_type == usn;
    }
    search_type == notification_type
}

impl ServerInner {
    fn is_listening(&self) -> bool {
        self.handler.lock().is_some() && self.transport.is_listening()
    }

    fn announcer(&self, id: AnnouncerId) -> Option<SsdpAnnouncer> {
        self.announcers.lock().get(&id).map(|e| e.announcer.clone())
    }

    fn matching_announcers(&self, msg: &SsdpMessage) -> Vec<SsdpAnnouncer> {
        let st = msg.search_type();
        self.announcers
            .lock()
            .values()
            .filter(|e| e.respond_to_searches)
            .filter(|e| {
                let a = e.announcer.announcement();
                search_matches(st, &a.notification_type, &a.usn)
            })
            .map(|e| e.announcer.clone())
            .collect()
    }

    fn on_datagram(self: &Arc<Self>, datagram: &Datagram) {
        match SsdpMessage::parse(&datagram.data, datagram.source) {
            Ok(msg) if msg.is_search_request() => {
                trace!("📥 M-SEARCH from {} (ST={})", msg.source(), msg.search_type());
                self.respond_to_search(&msg);
            }
            Ok(_) => {}
            Err(e) => debug!("Ignoring malformed datagram from {}: {}", datagram.source, e),
        }
    }

    fn respond_to_search(self: &Arc<Self>, msg: &SsdpMessage) -> usize {
        if msg.is_advertisement() || !msg.is_search_request() {
            return 0;
        }

        let matches = self.matching_announcers(msg);
        let mx = msg.mx().unwrap_or(DEFAULT_MX).min(MAX_MX);
        let mut rng = rand::rng();

        for announcer in &matches {
            let delay = Duration::from_millis(rng.random_range(0..=u64::from(mx) * 1000));
            let weak: Weak<ServerInner> = Arc::downgrade(self);
            let id = announcer.id();
            let search_type = msg.search_type().to_string();
            let destination = msg.source();

            self.scheduler.add(delay, move || {
                let Some(inner) = weak.upgrade() else {
                    return Ok(());
                };
                // Arrêté entre-temps : plus de réponse
                if !inner.is_listening() {
                    return Ok(());
                }
                if let Some(announcer) = inner.announcer(id) {
                    announcer.send_search_response(&search_type, destination);
                }
                Ok(())
            });
        }

        if !matches.is_empty() {
            debug!(
                "M-SEARCH from {} (ST={}): {} responses scheduled within {}s",
                msg.source(),
                msg.search_type(),
                matches.len(),
                mx
            );
        }
        matches.len()
    }
}
