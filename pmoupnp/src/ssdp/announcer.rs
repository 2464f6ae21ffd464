//! Annonceur SSDP : NOTIFY alive périodique, byebye à l'arrêt

use super::protocol::{
    DEFAULT_MAX_AGE, DEFAULT_USER_AGENT, DiscoveryEndpoints, create_alive_notify,
    create_alive_response, create_byebye_notify,
};
use crate::config_ext::UpnpConfigExt;
use crate::net::DatagramTransport;
use parking_lot::{Mutex, RwLock};
use pmoconfig::Config;
use pmoscheduler::{Scheduler, TimeoutHandle};
use pmoutils::is_broadcast;
use rand::Rng;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

static NEXT_ANNOUNCER_ID: AtomicU64 = AtomicU64::new(1);

/// Délai maximal avant le tout premier alive.
const INITIAL_JITTER_MS: u64 = 100;

/// Plancher du délai de rafraîchissement.
const MIN_REFRESH_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnouncerId(u64);

impl fmt::Display for AnnouncerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "announcer-{}", self.0)
    }
}

/// Ce qui est annoncé, et où.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub notification_type: String,
    pub usn: String,
    pub location: String,
    pub max_age: u32,
    pub user_agent: String,
    pub destinations: Vec<SocketAddr>,
}

impl Announcement {
    pub fn new(
        notification_type: impl Into<String>,
        usn: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            notification_type: notification_type.into(),
            usn: usn.into(),
            location: location.into(),
            ..Self::default()
        }
    }

    /// Max-age, user-agent et destinations lus dans la configuration.
    pub fn from_config(
        config: &Config,
        notification_type: impl Into<String>,
        usn: impl Into<String>,
        location: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            notification_type: notification_type.into(),
            usn: usn.into(),
            location: location.into(),
            max_age: config.get_ssdp_max_age()?,
            user_agent: config.get_ssdp_user_agent()?,
            destinations: config.ssdp_destinations()?,
        })
    }
}

impl Default for Announcement {
    fn default() -> Self {
        Self {
            notification_type: String::new(),
            usn: String::new(),
            location: String::new(),
            max_age: DEFAULT_MAX_AGE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            destinations: vec![DiscoveryEndpoints::IPV4, DiscoveryEndpoints::BROADCAST],
        }
    }
}

/// Délai avant le prochain alive, tiré uniformément dans
/// [max_age/4, max_age/2] avec un plancher d'une seconde.
pub(crate) fn refresh_delay(max_age: u32) -> Duration {
    let ms = u64::from(max_age) * 1000;
    let low = (ms / 4).max(MIN_REFRESH_MS);
    let high = (ms / 2).max(MIN_REFRESH_MS);
    Duration::from_millis(rand::rng().random_range(low..=high))
}

struct RunState {
    timeout: Option<TimeoutHandle>,
    generation: u64,
}

struct AnnouncerInner {
    id: AnnouncerId,
    scheduler: Arc<Scheduler>,
    transport: Arc<dyn DatagramTransport>,
    announcement: RwLock<Announcement>,
    state: Mutex<RunState>,
}

/// Annonce un couple NT/USN tant qu'il tourne.
///
/// Cloner un annonceur partage le même état. Quand le dernier clone est
/// détruit, un annonceur encore actif envoie son byebye.
#[derive(Clone)]
pub struct SsdpAnnouncer {
    inner: Arc<AnnouncerInner>,
}

impl SsdpAnnouncer {
    pub fn new(
        scheduler: Arc<Scheduler>,
        transport: Arc<dyn DatagramTransport>,
        announcement: Announcement,
    ) -> Self {
        Self {
            inner: Arc::new(AnnouncerInner {
                id: AnnouncerId(NEXT_ANNOUNCER_ID.fetch_add(1, Ordering::Relaxed)),
                scheduler,
                transport,
                announcement: RwLock::new(announcement),
                state: Mutex::new(RunState {
                    timeout: None,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn id(&self) -> AnnouncerId {
        self.inner.id
    }

    /// Démarre les annonces. Sans effet si l'annonceur tourne déjà.
    ///
    /// Le premier alive part après un délai aléatoire de 0 à 100 ms pour
    /// désynchroniser des annonceurs démarrés ensemble.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if state.timeout.is_some() {
            return;
        }

        let needs_broadcast = self
            .inner
            .announcement
            .read()
            .destinations
            .iter()
            .any(|d| is_broadcast(&d.ip()));
        if needs_broadcast && !self.inner.transport.broadcast() {
            if let Err(e) = self.inner.transport.set_broadcast(true) {
                warn!("❌ Cannot enable broadcast for {}: {}", self.inner.id, e);
            }
        }

        state.generation += 1;
        let generation = state.generation;
        let delay = Duration::from_millis(rand::rng().random_range(0..=INITIAL_JITTER_MS));
        state.timeout = Some(schedule_alive(&self.inner, generation, delay));

        let announcement = self.inner.announcement.read();
        info!(
            "✅ SSDP announcer started: {} (NT={})",
            announcement.usn, announcement.notification_type
        );
    }

    /// Arrête les annonces et envoie un byebye à chaque destination.
    /// Sans effet si l'annonceur est arrêté.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().timeout.is_some()
    }

    /// Envoie immédiatement un alive à toutes les destinations.
    pub fn send_alive_message(&self) {
        self.inner.send_alive();
    }

    pub fn announcement(&self) -> Announcement {
        self.inner.announcement.read().clone()
    }

    /// Modifie l'annonce. Les changements valent pour les prochains envois.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Announcement),
    {
        f(&mut self.inner.announcement.write());
    }

    pub fn notification_type(&self) -> String {
        self.inner.announcement.read().notification_type.clone()
    }

    pub fn usn(&self) -> String {
        self.inner.announcement.read().usn.clone()
    }

    pub fn location(&self) -> String {
        self.inner.announcement.read().location.clone()
    }

    pub fn max_age(&self) -> u32 {
        self.inner.announcement.read().max_age
    }

    pub fn destinations(&self) -> Vec<SocketAddr> {
        self.inner.announcement.read().destinations.clone()
    }

    pub fn set_destinations(&self, destinations: Vec<SocketAddr>) {
        self.inner.announcement.write().destinations = destinations;
    }

    /// Répond à un M-SEARCH en unicast, avec le ST de la requête.
    pub(crate) fn send_search_response(&self, search_type: &str, destination: SocketAddr) {
        let msg = {
            let a = self.inner.announcement.read();
            create_alive_response(&a.location, search_type, &a.usn, a.max_age, &a.user_agent)
        };
        match self.inner.transport.send(msg.as_bytes(), destination) {
            Ok(()) => debug!("📡 M-SEARCH response sent to {} (ST={})", destination, search_type),
            Err(e) => warn!("❌ Failed to send M-SEARCH response to {}: {}", destination, e),
        }
    }
}

impl fmt::Debug for SsdpAnnouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsdpAnnouncer")
            .field("id", &self.inner.id)
            .field("announcement", &*self.inner.announcement.read())
            .field("running", &self.is_running())
            .finish()
    }
}

fn schedule_alive(inner: &Arc<AnnouncerInner>, generation: u64, delay: Duration) -> TimeoutHandle {
    let weak: Weak<AnnouncerInner> = Arc::downgrade(inner);
    inner.scheduler.add(delay, move || {
        if let Some(inner) = weak.upgrade() {
            inner.refresh(generation);
        }
        Ok(())
    })
}

impl AnnouncerInner {
    fn refresh(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation || state.timeout.is_none() {
            return;
        }
        self.send_alive();
        let delay = refresh_delay(self.announcement.read().max_age);
        debug!("{} next alive in {:?}", self.id, delay);
        state.timeout = Some(schedule_alive(self, generation, delay));
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        let Some(timeout) = state.timeout.take() else {
            return;
        };
        timeout.dispose();
        state.generation += 1;
        self.send_byebye();

        let announcement = self.announcement.read();
        info!(
            "👋 SSDP announcer stopped: {} (NT={})",
            announcement.usn, announcement.notification_type
        );
    }

    fn send_alive(&self) {
        let a = self.announcement.read().clone();
        self.fan_out(&a.destinations, "alive", |dest| {
            create_alive_notify(
                dest,
                &a.location,
                &a.notification_type,
                &a.usn,
                a.max_age,
                &a.user_agent,
            )
        });
    }

    fn send_byebye(&self) {
        let a = self.announcement.read().clone();
        self.fan_out(&a.destinations, "byebye", |dest| {
            create_byebye_notify(dest, &a.notification_type, &a.usn)
        });
    }

    /// Un envoi par destination, en parallèle : une destination injoignable
    /// ne retarde pas les autres.
    fn fan_out<F>(&self, destinations: &[SocketAddr], kind: &str, build: F)
    where
        F: Fn(SocketAddr) -> String + Sync,
    {
        let transport = &self.transport;
        let build = &build;
        std::thread::scope(|scope| {
            for &dest in destinations {
                scope.spawn(move || {
                    let msg = build(dest);
                    match transport.send(msg.as_bytes(), dest) {
                        Ok(()) => debug!("📤 NOTIFY {} sent to {}", kind, dest),
                        Err(e) => warn!("❌ Failed to send NOTIFY {} to {}: {}", kind, dest, e),
                    }
                });
            }
        });
    }
}

impl Drop for AnnouncerInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_delay_bounds() {
        for _ in 0..200 {
            let d = refresh_delay(1800);
            assert!(d >= Duration::from_secs(450) && d <= Duration::from_secs(900));
        }
    }

    #[test]
    fn test_refresh_delay_has_floor() {
        for _ in 0..50 {
            assert_eq!(refresh_delay(1), Duration::from_millis(1000));
            let d = refresh_delay(3);
            assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_default_announcement() {
        let a = Announcement::new("upnp:rootdevice", "uuid:x::upnp:rootdevice", "http://h/d.xml");
        assert_eq!(a.max_age, DEFAULT_MAX_AGE);
        assert_eq!(a.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(
            a.destinations,
            vec![DiscoveryEndpoints::IPV4, DiscoveryEndpoints::BROADCAST]
        );
    }
}
