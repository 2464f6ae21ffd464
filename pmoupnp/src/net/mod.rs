//! Transport datagramme consommé par les moteurs SSDP
//!
//! [`UdpTransport`] parle au vrai réseau. [`LoopbackNetwork`] simule un
//! segment multicast en mémoire pour les tests et les démos hors réseau.

mod loopback;
mod udp;

pub use loopback::{LoopbackNetwork, LoopbackTransport, SentDatagram};
pub use udp::UdpTransport;

use crate::events::{Listener, ListenerId, Listeners};
use pmoutils::{AddressFamily, unicast_addresses};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tracing::trace;

/// Datagramme reçu et son émetteur.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub data: Vec<u8>,
    pub source: SocketAddr,
}

pub type DatagramHandler = Listener<Datagram>;
pub type HandlerId = ListenerId;

/// Handlers d'un transport, appelés pour chaque datagramme reçu.
pub type HandlerRegistry = Listeners<Datagram>;

pub trait DatagramTransport: Send + Sync {
    fn send(&self, data: &[u8], destination: SocketAddr) -> io::Result<()>;

    /// Démarre la réception. Idempotent.
    fn start_listening(&self) -> io::Result<()>;

    fn stop_listening(&self);

    fn is_listening(&self) -> bool;

    fn join_multicast_group(&self, group: IpAddr, interface: Option<IpAddr>) -> io::Result<()>;

    fn leave_multicast_group(&self, group: IpAddr, interface: Option<IpAddr>) -> io::Result<()>;

    fn set_broadcast(&self, enabled: bool) -> io::Result<()>;

    fn broadcast(&self) -> bool;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn add_handler(&self, handler: DatagramHandler) -> HandlerId;

    fn remove_handler(&self, id: HandlerId) -> bool;

    /// Rejoint `group` sur chaque interface unicast de la même famille.
    ///
    /// Les erreurs (groupe déjà rejoint, interface sans multicast) sont
    /// ignorées. Sans interface détectée, on laisse le système choisir.
    fn join_multicast_all_interfaces(&self, group: IpAddr) {
        let interfaces = unicast_addresses(Some(AddressFamily::of(&group)));
        if interfaces.is_empty() {
            if let Err(e) = self.join_multicast_group(group, None) {
                trace!("join {} on default interface: {}", group, e);
            }
            return;
        }
        for iface in interfaces {
            if let Err(e) = self.join_multicast_group(group, Some(iface)) {
                trace!("join {} on {}: {}", group, iface, e);
            }
        }
    }
}
