//! Constantes du protocole et gabarits des messages SSDP
//!
//! Les gabarits sont reproduits à l'octet près : certains devices comparent
//! encore les en-têtes de façon stricte (`max-age = N` avec espaces).

use chrono::Utc;
use once_cell::sync::Lazy;
use pmoutils::get_os_string;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const SSDP_SEARCH_METHOD: &str = "M-SEARCH";
pub const NOTIFY_METHOD: &str = "NOTIFY";

pub const SSDP_ALIVE: &str = "ssdp:alive";
pub const SSDP_BYEBYE: &str = "ssdp:byebye";
pub const SSDP_ALL: &str = "ssdp:all";
pub const SSDP_DISCOVER: &str = "ssdp:discover";
pub const UPNP_ROOT_DEVICE: &str = "upnp:rootdevice";

/// Durée de validité des annonces (en secondes)
pub const DEFAULT_MAX_AGE: u32 = 1800;
pub const DEFAULT_MX: u32 = 3;
pub const MAX_MX: u32 = 120;

/// TTL multicast des sockets SSDP
pub const SOCKET_TTL: u32 = 4;

pub const DEFAULT_USER_AGENT: &str = concat!("pmoupnp/", env!("CARGO_PKG_VERSION"));

/// Destinations de découverte standard.
pub struct DiscoveryEndpoints;

impl DiscoveryEndpoints {
    pub const IPV4: SocketAddr =
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 1900);
    pub const BROADCAST: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), 1900);
    pub const IPV6_LINK_LOCAL: SocketAddr =
        SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc)), 1900);
    pub const IPV6_SITE_LOCAL: SocketAddr =
        SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0xc)), 1900);
    pub const IPV6_ORGANIZATION_LOCAL: SocketAddr =
        SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0xff08, 0, 0, 0, 0, 0, 0, 0xc)), 1900);
    pub const IPV6_GLOBAL: SocketAddr =
        SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0xff0e, 0, 0, 0, 0, 0, 0, 0xc)), 1900);

    pub fn ipv6() -> [SocketAddr; 4] {
        [
            Self::IPV6_LINK_LOCAL,
            Self::IPV6_SITE_LOCAL,
            Self::IPV6_ORGANIZATION_LOCAL,
            Self::IPV6_GLOBAL,
        ]
    }
}

static OS_STRING: Lazy<String> = Lazy::new(get_os_string);

/// Chaîne OS utilisée dans l'en-tête SERVER (`Linux/6.1`).
pub fn os_string() -> &'static str {
    &OS_STRING
}

/// `{os} UPnP/1.1 {user_agent}`
pub fn server_string(user_agent: &str) -> String {
    format!("{} UPnP/1.1 {}", os_string(), user_agent)
}

/// Date RFC 1123, toujours en GMT.
pub fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn create_discovery_request(host: SocketAddr, search_type: &str, mx: u32) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         ST: {}\r\n\
         MX: {}\r\n\
         \r\n",
        host, search_type, mx
    )
}

pub fn create_alive_notify(
    host: SocketAddr,
    location: &str,
    notification_type: &str,
    usn: &str,
    max_age: u32,
    user_agent: &str,
) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: {}\r\n\
         CACHE-CONTROL: max-age = {}\r\n\
         LOCATION: {}\r\n\
         NT: {}\r\n\
         NTS: ssdp:alive\r\n\
         SERVER: {}\r\n\
         USN: {}\r\n\
         \r\n",
        host,
        max_age,
        location,
        notification_type,
        server_string(user_agent),
        usn
    )
}

pub fn create_alive_response(
    location: &str,
    search_type: &str,
    usn: &str,
    max_age: u32,
    user_agent: &str,
) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age = {}\r\n\
         DATE: {}\r\n\
         EXT:\r\n\
         LOCATION: {}\r\n\
         SERVER: {}\r\n\
         ST: {}\r\n\
         USN: {}\r\n\
         \r\n",
        max_age,
        rfc1123_now(),
        location,
        server_string(user_agent),
        search_type,
        usn
    )
}

pub fn create_byebye_notify(host: SocketAddr, notification_type: &str, usn: &str) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: {}\r\n\
         NT: {}\r\n\
         NTS: ssdp:byebye\r\n\
         USN: {}\r\n\
         \r\n",
        host, notification_type, usn
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_request_template() {
        let msg = create_discovery_request(DiscoveryEndpoints::IPV4, SSDP_ALL, 3);
        assert_eq!(
            msg,
            "M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nMAN: \"ssdp:discover\"\r\nST: ssdp:all\r\nMX: 3\r\n\r\n"
        );
    }

    #[test]
    fn test_byebye_template() {
        let msg = create_byebye_notify(
            DiscoveryEndpoints::IPV4,
            UPNP_ROOT_DEVICE,
            "uuid:1234::upnp:rootdevice",
        );
        assert_eq!(
            msg,
            "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nNT: upnp:rootdevice\r\nNTS: ssdp:byebye\r\nUSN: uuid:1234::upnp:rootdevice\r\n\r\n"
        );
    }

    #[test]
    fn test_alive_templates_carry_server_and_max_age() {
        let notify = create_alive_notify(
            DiscoveryEndpoints::IPV4,
            "http://10.0.0.2/desc.xml",
            UPNP_ROOT_DEVICE,
            "uuid:1234::upnp:rootdevice",
            1800,
            "test/1.0",
        );
        assert!(notify.contains("CACHE-CONTROL: max-age = 1800\r\n"));
        assert!(notify.contains(&format!("SERVER: {} UPnP/1.1 test/1.0\r\n", os_string())));
        assert!(notify.ends_with("\r\n\r\n"));

        let response = create_alive_response(
            "http://10.0.0.2/desc.xml",
            SSDP_ALL,
            "uuid:1234",
            60,
            "test/1.0",
        );
        assert!(response.starts_with("HTTP/1.1 200 OK\r\nCACHE-CONTROL: max-age = 60\r\nDATE: "));
        assert!(response.contains("\r\nEXT:\r\n"));
        assert!(response.contains(" GMT\r\n"));
    }

    #[test]
    fn test_ipv6_host_is_bracketed() {
        let msg = create_discovery_request(DiscoveryEndpoints::IPV6_LINK_LOCAL, SSDP_ALL, 1);
        assert!(msg.contains("HOST: [ff02::c]:1900\r\n"));
    }
}
