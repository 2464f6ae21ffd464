//! Transport UDP réel (socket2)

use super::{Datagram, DatagramHandler, DatagramTransport, HandlerId, HandlerRegistry};
use crate::ssdp::{SOCKET_TTL, SSDP_PORT};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

const RECV_BUFFER: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(1);
const ERROR_BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Pause après `failures` erreurs de lecture consécutives : double à chaque
/// échec, plafonnée à [`READ_TIMEOUT`].
fn error_backoff(failures: u32) -> Duration {
    ERROR_BACKOFF_BASE
        .saturating_mul(1u32 << failures.saturating_sub(1).min(16))
        .min(READ_TIMEOUT)
}

/// Socket UDP partagée entre émission et réception.
///
/// La réception tourne sur un thread dédié. Chaque `start_listening` ouvre
/// une nouvelle génération ; une boucle dont la génération n'est plus la
/// courante s'arrête au prochain timeout de lecture, de sorte qu'un
/// redémarrage rapide ne laisse jamais deux boucles actives.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    handlers: Arc<HandlerRegistry>,
    listening: AtomicBool,
    generation: Arc<AtomicU64>,
    broadcast: AtomicBool,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Self::bind_with_ttl(addr, SOCKET_TTL)
    }

    pub fn bind_with_ttl(addr: SocketAddr, ttl: u32) -> io::Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
            socket.set_multicast_hops_v6(ttl)?;
        } else {
            socket.set_multicast_ttl_v4(ttl)?;
        }
        socket.bind(&addr.into())?;

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        debug!("UDP transport bound on {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            handlers: Arc::new(HandlerRegistry::new()),
            listening: AtomicBool::new(false),
            generation: Arc::new(AtomicU64::new(0)),
            broadcast: AtomicBool::new(false),
        })
    }

    /// Port éphémère : côté control point, ne jamais prendre 1900
    /// (le noyau répartirait les datagrammes entre les deux sockets).
    pub fn ephemeral() -> io::Result<Self> {
        Self::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }

    /// Socket d'un device : 0.0.0.0:1900.
    pub fn ssdp() -> io::Result<Self> {
        Self::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), SSDP_PORT))
    }
}

fn receive_loop(
    socket: Arc<UdpSocket>,
    handlers: Arc<HandlerRegistry>,
    generation: Arc<AtomicU64>,
    mine: u64,
) {
    let mut buf = [0u8; RECV_BUFFER];
    let mut failures: u32 = 0;
    while generation.load(Ordering::SeqCst) == mine {
        match socket.recv_from(&mut buf) {
            Ok((n, source)) => {
                failures = 0;
                if generation.load(Ordering::SeqCst) != mine {
                    break;
                }
                trace!("📥 {} bytes from {}", n, source);
                handlers.emit(&Datagram {
                    data: buf[..n].to_vec(),
                    source,
                });
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let pause = error_backoff(failures);
                if failures == 1 {
                    warn!("❌ UDP read error: {}", e);
                } else {
                    debug!("UDP read error #{} ({}), retrying in {:?}", failures, e, pause);
                }
                thread::sleep(pause);
            }
        }
    }
    trace!("UDP receive loop generation {} stopped", mine);
}

impl DatagramTransport for UdpTransport {
    fn send(&self, data: &[u8], destination: SocketAddr) -> io::Result<()> {
        self.socket.send_to(data, destination).map(|_| ())
    }

    fn start_listening(&self) -> io::Result<()> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mine = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let socket = self.socket.clone();
        let handlers = self.handlers.clone();
        let generation = self.generation.clone();

        let spawned = std::thread::Builder::new()
            .name("pmoupnp-udp-recv".to_string())
            .spawn(move || receive_loop(socket, handlers, generation, mine));

        if let Err(e) = spawned {
            self.listening.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    fn stop_listening(&self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn join_multicast_group(&self, group: IpAddr, interface: Option<IpAddr>) -> io::Result<()> {
        match (group, interface) {
            (IpAddr::V4(g), None) => self.socket.join_multicast_v4(&g, &Ipv4Addr::UNSPECIFIED),
            (IpAddr::V4(g), Some(IpAddr::V4(iface))) => self.socket.join_multicast_v4(&g, &iface),
            (IpAddr::V6(g), None | Some(IpAddr::V6(_))) => self.socket.join_multicast_v6(&g, 0),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "multicast group and interface families differ",
            )),
        }
    }

    fn leave_multicast_group(&self, group: IpAddr, interface: Option<IpAddr>) -> io::Result<()> {
        match (group, interface) {
            (IpAddr::V4(g), None) => self.socket.leave_multicast_v4(&g, &Ipv4Addr::UNSPECIFIED),
            (IpAddr::V4(g), Some(IpAddr::V4(iface))) => self.socket.leave_multicast_v4(&g, &iface),
            (IpAddr::V6(g), None | Some(IpAddr::V6(_))) => self.socket.leave_multicast_v6(&g, 0),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "multicast group and interface families differ",
            )),
        }
    }

    fn set_broadcast(&self, enabled: bool) -> io::Result<()> {
        self.socket.set_broadcast(enabled)?;
        self.broadcast.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn broadcast(&self) -> bool {
        self.broadcast.load(Ordering::SeqCst)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn add_handler(&self, handler: DatagramHandler) -> HandlerId {
        self.handlers.add_arc(handler)
    }

    fn remove_handler(&self, id: HandlerId) -> bool {
        self.handlers.remove(id)
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_unicast_roundtrip_on_localhost() {
        let receiver = UdpTransport::bind(localhost()).unwrap();
        let sender = UdpTransport::bind(localhost()).unwrap();

        let (tx, rx) = unbounded();
        receiver.add_handler(Arc::new(move |d: &Datagram| {
            let _ = tx.send(d.data.clone());
        }));
        receiver.start_listening().unwrap();
        receiver.start_listening().unwrap();

        sender
            .send(b"ping", receiver.local_addr().unwrap())
            .unwrap();
        let got = rx.recv_timeout(Duration::from_secs(3)).unwrap();
        assert_eq!(got, b"ping");

        receiver.stop_listening();
        assert!(!receiver.is_listening());
    }

    #[test]
    fn test_family_mismatch_is_rejected() {
        let transport = UdpTransport::bind(localhost()).unwrap();
        let err = transport
            .join_multicast_group(
                "239.255.255.250".parse().unwrap(),
                Some("::1".parse().unwrap()),
            )
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_broadcast_flag() {
        let transport = UdpTransport::bind(localhost()).unwrap();
        assert!(!transport.broadcast());
        transport.set_broadcast(true).unwrap();
        assert!(transport.broadcast());
    }

    #[test]
    fn test_read_error_backoff_grows_then_caps() {
        assert_eq!(error_backoff(1), Duration::from_millis(50));
        assert_eq!(error_backoff(2), Duration::from_millis(100));
        assert_eq!(error_backoff(3), Duration::from_millis(200));
        assert_eq!(error_backoff(10), READ_TIMEOUT);
        assert_eq!(error_backoff(u32::MAX), READ_TIMEOUT);
    }
}
