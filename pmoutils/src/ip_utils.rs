use get_if_addrs::get_if_addrs;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Famille d'adresses pour filtrer les interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

/// Devine l'adresse IP locale de la machine.
///
/// Crée un socket UDP vers un serveur DNS public (8.8.8.8) sans rien envoyer,
/// puis lit l'adresse locale choisie par le système. Retourne `"127.0.0.1"`
/// en cas d'échec.
pub fn guess_local_ip() -> String {
    match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => {
            if socket.connect("8.8.8.8:80").is_ok() {
                if let Ok(local_addr) = socket.local_addr() {
                    return local_addr.ip().to_string();
                }
            }
            "127.0.0.1".to_string()
        }
        Err(_) => "127.0.0.1".to_string(),
    }
}

/// Liste les adresses unicast non-loopback des interfaces réseau.
///
/// Avec `Some(family)`, seules les adresses de cette famille sont retournées.
/// Les doublons (même adresse sur plusieurs alias) sont éliminés. En cas
/// d'erreur d'énumération, la liste est vide.
pub fn unicast_addresses(family: Option<AddressFamily>) -> Vec<IpAddr> {
    let mut result: Vec<IpAddr> = Vec::new();

    let Ok(interfaces) = get_if_addrs() else {
        return result;
    };

    for iface in interfaces {
        let ip = iface.ip();
        if ip.is_loopback() || is_multicast(&ip) {
            continue;
        }
        if family.is_some_and(|f| f != AddressFamily::of(&ip)) {
            continue;
        }
        if !result.contains(&ip) {
            result.push(ip);
        }
    }

    result
}

/// Vrai pour une adresse multicast.
///
/// En IPv4, toute adresse >= 224.0.0.0 compte comme multicast, sauf
/// 255.255.255.255 (broadcast limité).
pub fn is_multicast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.octets()[0] >= 224 && *v4 != Ipv4Addr::BROADCAST,
        IpAddr::V6(v6) => v6.is_multicast(),
    }
}

/// Vrai pour 255.255.255.255.
pub fn is_broadcast(ip: &IpAddr) -> bool {
    matches!(ip, IpAddr::V4(v4) if *v4 == Ipv4Addr::BROADCAST)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_guess_local_ip_returns_valid_ip() {
        let ip = guess_local_ip();
        assert!(ip.parse::<IpAddr>().is_ok(), "Should return a valid IP address");
    }

    #[test]
    fn test_unicast_addresses_no_loopback() {
        for ip in unicast_addresses(None) {
            assert!(!ip.is_loopback(), "Loopback addresses should be filtered out");
        }
    }

    #[test]
    fn test_unicast_addresses_family_filter() {
        for ip in unicast_addresses(Some(AddressFamily::V4)) {
            assert!(ip.is_ipv4());
        }
        for ip in unicast_addresses(Some(AddressFamily::V6)) {
            assert!(ip.is_ipv6());
        }
    }

    #[test]
    fn test_multicast_classification() {
        assert!(is_multicast(&"239.255.255.250".parse().unwrap()));
        assert!(is_multicast(&"224.0.0.1".parse().unwrap()));
        assert!(!is_multicast(&"192.168.1.10".parse().unwrap()));
        assert!(!is_multicast(&IpAddr::V4(Ipv4Addr::BROADCAST)));
        assert!(is_multicast(&"ff02::c".parse().unwrap()));
        assert!(!is_multicast(&IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[test]
    fn test_broadcast_classification() {
        assert!(is_broadcast(&"255.255.255.255".parse().unwrap()));
        assert!(!is_broadcast(&"239.255.255.250".parse().unwrap()));
        assert!(!is_broadcast(&"ff02::c".parse().unwrap()));
    }
}
