//! Réseau multicast simulé en mémoire
//!
//! Chaque transport reçoit sa propre adresse `127.0.0.n`. Les envois sont
//! enregistrés puis livrés de façon asynchrone par un thread dédié, comme le
//! ferait une vraie pile réseau : un handler qui répond depuis son callback
//! ne risque donc pas d'interblocage.

use super::{Datagram, DatagramHandler, DatagramTransport, HandlerId, HandlerRegistry};
use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use pmoutils::{is_broadcast, is_multicast};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use tracing::trace;

const FIRST_EPHEMERAL_PORT: u16 = 49152;

/// Trace d'un envoi, dans l'ordre d'émission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub data: Vec<u8>,
}

impl SentDatagram {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

struct Node {
    addr: SocketAddr,
    listening: AtomicBool,
    broadcast: AtomicBool,
    groups: Mutex<HashSet<IpAddr>>,
    handlers: HandlerRegistry,
}

type NodeMap = Arc<Mutex<HashMap<SocketAddr, Arc<Node>>>>;

struct Envelope {
    from: SocketAddr,
    to: SocketAddr,
    data: Vec<u8>,
}

struct NetworkInner {
    nodes: NodeMap,
    sent: Mutex<Vec<SentDatagram>>,
    queue: Sender<Envelope>,
    next_host: AtomicU32,
    next_port: AtomicU16,
}

#[derive(Clone)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        let nodes: NodeMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = unbounded::<Envelope>();

        let delivery_nodes = nodes.clone();
        let spawned = std::thread::Builder::new()
            .name("pmoupnp-loopback".to_string())
            .spawn(move || {
                // Se termine quand le dernier LoopbackNetwork est détruit
                for envelope in rx.iter() {
                    deliver(&delivery_nodes, envelope);
                }
            });
        if let Err(e) = spawned {
            tracing::error!("❌ Cannot start loopback delivery thread: {}", e);
        }

        Self {
            inner: Arc::new(NetworkInner {
                nodes,
                sent: Mutex::new(Vec::new()),
                queue: tx,
                next_host: AtomicU32::new(1),
                next_port: AtomicU16::new(FIRST_EPHEMERAL_PORT),
            }),
        }
    }

    /// Nouveau transport sur le port donné (0 : port éphémère).
    pub fn transport(&self, port: u16) -> LoopbackTransport {
        let host = self.inner.next_host.fetch_add(1, Ordering::SeqCst);
        let [_, a, b, c] = host.to_be_bytes();
        let port = if port == 0 {
            self.inner.next_port.fetch_add(1, Ordering::SeqCst)
        } else {
            port
        };
        let ip = Ipv4Addr::new(127, a, b, c.max(1));
        self.transport_at(SocketAddr::new(IpAddr::V4(ip), port))
    }

    pub fn transport_at(&self, addr: SocketAddr) -> LoopbackTransport {
        let node = Arc::new(Node {
            addr,
            listening: AtomicBool::new(false),
            broadcast: AtomicBool::new(false),
            groups: Mutex::new(HashSet::new()),
            handlers: HandlerRegistry::new(),
        });
        self.inner.nodes.lock().insert(addr, node.clone());
        LoopbackTransport {
            node,
            network: self.clone(),
        }
    }

    /// Fait comme si `from` avait envoyé `data` vers `to`.
    pub fn inject(&self, data: &[u8], from: SocketAddr, to: SocketAddr) {
        self.enqueue(from, to, data);
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.inner.sent.lock().clone()
    }

    pub fn sent_to(&self, to: SocketAddr) -> Vec<SentDatagram> {
        self.inner
            .sent
            .lock()
            .iter()
            .filter(|d| d.to == to)
            .cloned()
            .collect()
    }

    pub fn clear_sent(&self) {
        self.inner.sent.lock().clear();
    }

    fn record(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        self.inner.sent.lock().push(SentDatagram {
            from,
            to,
            data: data.to_vec(),
        });
    }

    fn enqueue(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        let envelope = Envelope {
            from,
            to,
            data: data.to_vec(),
        };
        if self.inner.queue.send(envelope).is_err() {
            trace!("loopback delivery thread gone, dropping datagram to {}", to);
        }
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(nodes: &NodeMap, envelope: Envelope) {
    let to = envelope.to;
    let recipients: Vec<Arc<Node>> = nodes
        .lock()
        .values()
        .filter(|node| node.listening.load(Ordering::SeqCst))
        .filter(|node| {
            if is_multicast(&to.ip()) {
                node.addr != envelope.from
                    && node.addr.port() == to.port()
                    && node.groups.lock().contains(&to.ip())
            } else if is_broadcast(&to.ip()) {
                node.addr != envelope.from && node.addr.port() == to.port()
            } else {
                node.addr == to
            }
        })
        .cloned()
        .collect();

    let datagram = Datagram {
        data: envelope.data,
        source: envelope.from,
    };
    for node in recipients {
        node.handlers.emit(&datagram);
    }
}

pub struct LoopbackTransport {
    node: Arc<Node>,
    network: LoopbackNetwork,
}

impl LoopbackTransport {
    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }

    pub fn addr(&self) -> SocketAddr {
        self.node.addr
    }

    pub fn joined_groups(&self) -> Vec<IpAddr> {
        self.node.groups.lock().iter().copied().collect()
    }
}

impl DatagramTransport for LoopbackTransport {
    fn send(&self, data: &[u8], destination: SocketAddr) -> io::Result<()> {
        if is_broadcast(&destination.ip()) && !self.node.broadcast.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "broadcast not enabled on this transport",
            ));
        }
        self.network.record(self.node.addr, destination, data);
        self.network.enqueue(self.node.addr, destination, data);
        Ok(())
    }

    fn start_listening(&self) -> io::Result<()> {
        self.node.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_listening(&self) {
        self.node.listening.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.node.listening.load(Ordering::SeqCst)
    }

    fn join_multicast_group(&self, group: IpAddr, interface: Option<IpAddr>) -> io::Result<()> {
        if !is_multicast(&group) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a multicast address", group),
            ));
        }
        if interface.is_some_and(|iface| iface.is_ipv4() != group.is_ipv4()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "multicast group and interface families differ",
            ));
        }
        if !self.node.groups.lock().insert(group) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("already a member of {}", group),
            ));
        }
        Ok(())
    }

    fn leave_multicast_group(&self, group: IpAddr, _interface: Option<IpAddr>) -> io::Result<()> {
        if self.node.groups.lock().remove(&group) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("not a member of {}", group),
            ))
        }
    }

    fn set_broadcast(&self, enabled: bool) -> io::Result<()> {
        self.node.broadcast.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn broadcast(&self) -> bool {
        self.node.broadcast.load(Ordering::SeqCst)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.node.addr)
    }

    fn add_handler(&self, handler: DatagramHandler) -> HandlerId {
        self.node.handlers.add_arc(handler)
    }

    fn remove_handler(&self, id: HandlerId) -> bool {
        self.node.handlers.remove(id)
    }

    // Pas d'interfaces physiques ici
    fn join_multicast_all_interfaces(&self, group: IpAddr) {
        if let Err(e) = self.join_multicast_group(group, None) {
            trace!("join {}: {}", group, e);
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.network.inner.nodes.lock().remove(&self.node.addr);
    }
}
