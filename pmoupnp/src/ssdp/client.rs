/*!
The SSDP client is a *control point*.
It must **not** bind to UDP port 1900 by default.

If both a device-side server and a client bind on 1900 (even with
SO_REUSEPORT) the kernel load-balances incoming datagrams between sockets,
and NOTIFY and HTTP/200 messages are lost randomly by the client.

Therefore:

* SSDP server → bind(0.0.0.0:1900), join multicast, answer M-SEARCH.
* SSDP client → bind(0.0.0.0:0), use an ephemeral port, send M-SEARCH, receive replies.

NOTIFY reception on an ephemeral port is best-effort. Use
[`SsdpClient::with_transport`] with a transport bound on 1900 to get every
announcement.
*/

use super::listener::{SsdpEvent, SsdpListener};
use super::message::SsdpMessage;
use super::search::{SearchFilter, SsdpSearch};
use crate::net::{DatagramTransport, UdpTransport};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use pmoscheduler::Scheduler;
use std::collections::HashSet;
use std::sync::Arc;

/// Control point SSDP : annonces reçues et recherches dédupliquées.
pub struct SsdpClient {
    scheduler: Arc<Scheduler>,
    transport: Arc<dyn DatagramTransport>,
    listener: SsdpListener,
}

impl SsdpClient {
    pub fn new(scheduler: Arc<Scheduler>) -> std::io::Result<Self> {
        let transport: Arc<dyn DatagramTransport> = Arc::new(UdpTransport::ephemeral()?);
        Ok(Self::with_transport(scheduler, transport))
    }

    pub fn with_transport(scheduler: Arc<Scheduler>, transport: Arc<dyn DatagramTransport>) -> Self {
        let listener = SsdpListener::new(transport.clone());
        Self {
            scheduler,
            transport,
            listener,
        }
    }

    pub fn listener(&self) -> &SsdpListener {
        &self.listener
    }

    /// Alive, byebye et réponses de recherche acceptées.
    pub fn subscribe(&self) -> Receiver<SsdpEvent> {
        self.listener.subscribe()
    }

    /// Crée une recherche sur le transport du client.
    ///
    /// Un même device peut répondre une fois par interface réseau, et
    /// exposer plusieurs USN sur une même description : chaque résultat
    /// n'est donc accepté qu'une fois par clé, la LOCATION si
    /// `require_unique_location`, sinon le USN. Les résultats acceptés
    /// sont aussi publiés en [`SsdpEvent::SearchResponse`].
    pub fn create_search(&self, require_unique_location: bool) -> SsdpSearch {
        let search = SsdpSearch::with_transport(self.scheduler.clone(), self.transport.clone());

        let seen: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let filter: SearchFilter = Arc::new(move |msg: &SsdpMessage| {
            let key = if require_unique_location {
                msg.location()
            } else {
                msg.usn()
            };
            seen.lock().insert(key.to_string())
        });
        search.set_filter(Some(filter));

        let inner = Arc::downgrade(self.listener.inner());
        search.on_result_found(move |msg| {
            if let Some(inner) = inner.upgrade() {
                inner.publish(SsdpEvent::SearchResponse(msg.clone()));
            }
        });

        search
    }
}
