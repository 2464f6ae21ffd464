//! Session de recherche M-SEARCH

use super::errors::SsdpError;
use super::message::SsdpMessage;
use super::protocol::{DEFAULT_MX, DiscoveryEndpoints, MAX_MX, SSDP_ALL, create_discovery_request};
use crate::events::{ListenerId, Listeners};
use crate::net::{Datagram, DatagramTransport, HandlerId, UdpTransport};
use parking_lot::{Condvar, Mutex, RwLock};
use pmoscheduler::{Scheduler, TimeoutHandle};
use pmoutils::{is_broadcast, is_multicast};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Filtre appliqué à chaque réponse avant `on_result_found`.
pub type SearchFilter = Arc<dyn Fn(&SsdpMessage) -> bool + Send + Sync + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSettings {
    pub search_type: String,
    /// Attente maximale annoncée aux devices, bornée à [1, 120].
    pub mx: u32,
    /// Valeur de l'en-tête HOST.
    pub host_endpoint: SocketAddr,
    /// Utiliser chaque destination comme HOST plutôt que `host_endpoint`.
    pub use_remote_endpoint_as_host: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            search_type: SSDP_ALL.to_string(),
            mx: DEFAULT_MX,
            host_endpoint: DiscoveryEndpoints::IPV4,
            use_remote_endpoint_as_host: false,
        }
    }
}

impl SearchSettings {
    pub fn new(search_type: impl Into<String>) -> Self {
        Self {
            search_type: search_type.into(),
            ..Self::default()
        }
    }

    pub fn with_mx(mut self, mx: u32) -> Self {
        self.mx = mx;
        self
    }

    pub(crate) fn effective_mx(&self) -> u32 {
        self.mx.clamp(1, MAX_MX)
    }
}

struct SearchState {
    searching: bool,
    timeout: Option<TimeoutHandle>,
    handler: Option<HandlerId>,
    generation: u64,
}

struct SearchInner {
    scheduler: Arc<Scheduler>,
    transport: Arc<dyn DatagramTransport>,
    owns_transport: bool,
    settings: RwLock<SearchSettings>,
    filter: RwLock<Option<SearchFilter>>,
    state: Mutex<SearchState>,
    completed: Condvar,
    results: Listeners<SsdpMessage>,
    complete: Listeners<()>,
}

/// Recherche SSDP.
///
/// États : inactive → en cours (`search_async`) → terminée (annulation,
/// timeout de 2×MX secondes ou premier résultat pour `find_first`). La fin
/// est signalée une seule fois par recherche ; la session est ensuite
/// réutilisable.
pub struct SsdpSearch {
    inner: Arc<SearchInner>,
}

impl SsdpSearch {
    /// Recherche sur son propre socket, port éphémère.
    pub fn new(scheduler: Arc<Scheduler>) -> std::io::Result<Self> {
        let transport: Arc<dyn DatagramTransport> = Arc::new(UdpTransport::ephemeral()?);
        Ok(Self::build(scheduler, transport, true))
    }

    /// Recherche sur un transport partagé, qui n'est pas arrêté en fin de
    /// recherche.
    pub fn with_transport(scheduler: Arc<Scheduler>, transport: Arc<dyn DatagramTransport>) -> Self {
        Self::build(scheduler, transport, false)
    }

    /// Recherche sur un transport dont elle devient propriétaire.
    pub fn with_owned_transport(
        scheduler: Arc<Scheduler>,
        transport: Arc<dyn DatagramTransport>,
    ) -> Self {
        Self::build(scheduler, transport, true)
    }

    fn build(
        scheduler: Arc<Scheduler>,
        transport: Arc<dyn DatagramTransport>,
        owns_transport: bool,
    ) -> Self {
        Self {
            inner: Arc::new(SearchInner {
                scheduler,
                transport,
                owns_transport,
                settings: RwLock::new(SearchSettings::default()),
                filter: RwLock::new(None),
                state: Mutex::new(SearchState {
                    searching: false,
                    timeout: None,
                    handler: None,
                    generation: 0,
                }),
                completed: Condvar::new(),
                results: Listeners::new(),
                complete: Listeners::new(),
            }),
        }
    }

    pub fn settings(&self) -> SearchSettings {
        self.inner.settings.read().clone()
    }

    pub fn set_settings(&self, settings: SearchSettings) {
        *self.inner.settings.write() = settings;
    }

    pub fn set_search_type(&self, search_type: impl Into<String>) {
        self.inner.settings.write().search_type = search_type.into();
    }

    pub fn set_mx(&self, mx: u32) {
        self.inner.settings.write().mx = mx;
    }

    pub fn set_filter(&self, filter: Option<SearchFilter>) {
        *self.inner.filter.write() = filter;
    }

    pub fn is_searching(&self) -> bool {
        self.inner.state.lock().searching
    }

    pub fn on_result_found<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SsdpMessage) + Send + Sync + 'static,
    {
        self.inner.results.add(listener)
    }

    pub fn on_search_complete<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.complete.add(move |_: &()| listener())
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.results.remove(id) | self.inner.complete.remove(id)
    }

    /// Lance la recherche sans bloquer.
    ///
    /// Sans destination, la requête part vers 239.255.255.250:1900. Chaque
    /// requête est envoyée deux fois pour compenser les pertes UDP.
    pub fn search_async(&self, destinations: &[SocketAddr]) -> Result<(), SsdpError> {
        let destinations: Vec<SocketAddr> = if destinations.is_empty() {
            vec![DiscoveryEndpoints::IPV4]
        } else {
            destinations.to_vec()
        };
        let settings = self.settings();
        let mx = settings.effective_mx();

        {
            let mut state = self.inner.state.lock();
            if state.searching {
                return Err(SsdpError::SearchInProgress);
            }
            state.searching = true;
            state.generation += 1;
            let generation = state.generation;

            let weak: Weak<SearchInner> = Arc::downgrade(&self.inner);
            state.handler = Some(self.inner.transport.add_handler(Arc::new(
                move |d: &Datagram| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_datagram(d, generation);
                    }
                },
            )));

            let weak: Weak<SearchInner> = Arc::downgrade(&self.inner);
            state.timeout = Some(self.inner.scheduler.add(
                Duration::from_secs(u64::from(mx) * 2),
                move || {
                    if let Some(inner) = weak.upgrade() {
                        if inner.finish(Some(generation)) {
                            debug!("SSDP search timed out");
                        }
                    }
                    Ok(())
                },
            ));
        }

        if let Err(e) = self.inner.transport.start_listening() {
            self.inner.finish(None);
            return Err(e.into());
        }

        for dest in destinations.iter().filter(|d| is_multicast(&d.ip())) {
            self.inner.transport.join_multicast_all_interfaces(dest.ip());
        }

        let needs_broadcast = destinations.iter().any(|d| is_broadcast(&d.ip()));
        if needs_broadcast && !self.inner.transport.broadcast() {
            if let Err(e) = self.inner.transport.set_broadcast(true) {
                warn!("❌ Cannot enable broadcast for SSDP search: {}", e);
            }
        }

        for dest in &destinations {
            let host = if settings.use_remote_endpoint_as_host {
                *dest
            } else {
                settings.host_endpoint
            };
            let request = create_discovery_request(host, &settings.search_type, mx);
            for _ in 0..2 {
                if let Err(e) = self.inner.transport.send(request.as_bytes(), *dest) {
                    warn!("❌ Failed to send M-SEARCH to {}: {}", dest, e);
                }
            }
        }

        info!(
            "📤 M-SEARCH sent (ST={}, MX={}) to {} destinations",
            settings.search_type,
            mx,
            destinations.len()
        );
        Ok(())
    }

    /// Termine la recherche en cours. Idempotent.
    pub fn cancel_search(&self) {
        self.inner.finish(None);
    }

    /// Bloque jusqu'à la fin de la recherche en cours ; retourne
    /// immédiatement si aucune recherche n'est active.
    pub fn wait_for_search(&self) {
        let mut state = self.inner.state.lock();
        while state.searching {
            self.inner.completed.wait(&mut state);
        }
    }

    /// Premier résultat accepté par le filtre, ou `None` au timeout.
    pub fn find_first(&self, destinations: &[SocketAddr]) -> Result<Option<SsdpMessage>, SsdpError> {
        if self.is_searching() {
            return Err(SsdpError::SearchInProgress);
        }

        let slot: Arc<Mutex<Option<SsdpMessage>>> = Arc::new(Mutex::new(None));
        let s = slot.clone();
        let weak: Weak<SearchInner> = Arc::downgrade(&self.inner);
        let id = self.inner.results.add(move |msg: &SsdpMessage| {
            {
                let mut first = s.lock();
                if first.is_some() {
                    return;
                }
                *first = Some(msg.clone());
            }
            if let Some(inner) = weak.upgrade() {
                inner.finish(None);
            }
        });

        let started = self.search_async(destinations);
        if started.is_ok() {
            self.wait_for_search();
        }
        self.inner.results.remove(id);
        started?;

        Ok(slot.lock().take())
    }

    /// Tous les résultats acceptés jusqu'au timeout.
    pub fn search(&self, destinations: &[SocketAddr]) -> Result<Vec<SsdpMessage>, SsdpError> {
        let results: Arc<Mutex<Vec<SsdpMessage>>> = Arc::new(Mutex::new(Vec::new()));
        let r = results.clone();
        let id = self
            .inner
            .results
            .add(move |msg: &SsdpMessage| r.lock().push(msg.clone()));

        let started = self.search_async(destinations);
        if started.is_ok() {
            self.wait_for_search();
        }
        self.inner.results.remove(id);
        started?;

        let found = std::mem::take(&mut *results.lock());
        Ok(found)
    }
}

impl Drop for SsdpSearch {
    fn drop(&mut self) {
        self.inner.finish(None);
    }
}

impl SearchInner {
    fn on_datagram(&self, datagram: &Datagram, generation: u64) {
        {
            let state = self.state.lock();
            if !state.searching || state.generation != generation {
                return;
            }
        }

        let msg = match SsdpMessage::parse(&datagram.data, datagram.source) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Ignoring malformed datagram from {}: {}", datagram.source, e);
                return;
            }
        };

        // Seules les réponses nous intéressent
        if msg.is_advertisement() || msg.is_request() {
            return;
        }

        let filter = self.filter.read().clone();
        if let Some(filter) = filter {
            if !filter(&msg) {
                trace!("SSDP search result from {} filtered out", msg.source());
                return;
            }
        }

        trace!("📥 SSDP search result from {}: {}", msg.source(), msg.usn());
        self.results.emit(&msg);
    }

    /// Termine la recherche si elle est active (et, avec `Some`, si c'est
    /// bien la génération attendue). Retourne `true` si elle a été terminée
    /// par cet appel.
    fn finish(&self, expected: Option<u64>) -> bool {
        let (handler, timeout) = {
            let mut state = self.state.lock();
            if !state.searching {
                return false;
            }
            if expected.is_some_and(|g| g != state.generation) {
                return false;
            }
            state.searching = false;
            (state.handler.take(), state.timeout.take())
        };

        if let Some(timeout) = timeout {
            timeout.dispose();
        }
        if let Some(handler) = handler {
            self.transport.remove_handler(handler);
        }
        if self.owns_transport {
            self.transport.stop_listening();
        }

        self.completed.notify_all();
        self.complete.emit(&());
        debug!("SSDP search complete");
        true
    }
}
