//! Vue SSDP d'un message HTTP reçu

use super::errors::SsdpError;
use super::protocol::{DEFAULT_MAX_AGE, SSDP_BYEBYE, SSDP_SEARCH_METHOD, UPNP_ROOT_DEVICE};
use crate::http::HttpMessage;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use tracing::trace;

/// Message SSDP décodé, immuable.
///
/// Les accesseurs d'en-têtes rendent une chaîne vide si l'en-tête est absent,
/// ce qui simplifie les comparaisons côté moteurs.
#[derive(Debug, Clone)]
pub struct SsdpMessage {
    message: HttpMessage,
    source: SocketAddr,
    date_generated: DateTime<Utc>,
}

impl SsdpMessage {
    pub fn new(message: HttpMessage, source: SocketAddr) -> Self {
        let date_generated = message
            .header("DATE")
            .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Self {
            message,
            source,
            date_generated,
        }
    }

    pub fn parse(data: &[u8], source: SocketAddr) -> Result<Self, SsdpError> {
        let message = HttpMessage::parse(data)?;
        Ok(Self::new(message, source))
    }

    pub fn message(&self) -> &HttpMessage {
        &self.message
    }

    pub fn source(&self) -> SocketAddr {
        self.source
    }

    pub fn date_generated(&self) -> DateTime<Utc> {
        self.date_generated
    }

    fn header(&self, name: &str) -> &str {
        self.message.header(name).unwrap_or("")
    }

    pub fn notification_type(&self) -> &str {
        self.header("NT")
    }

    pub fn notification_sub_type(&self) -> &str {
        self.header("NTS")
    }

    pub fn usn(&self) -> &str {
        self.header("USN")
    }

    pub fn location(&self) -> &str {
        self.header("LOCATION")
    }

    pub fn nts(&self) -> &str {
        self.notification_sub_type()
    }

    pub fn server(&self) -> &str {
        self.header("SERVER")
    }

    pub fn user_agent(&self) -> &str {
        self.server()
    }

    /// Présence de l'en-tête `EXT` (toujours vide sur le fil).
    pub fn ext(&self) -> bool {
        self.message.headers.contains("EXT")
    }

    pub fn search_type(&self) -> &str {
        self.header("ST")
    }

    pub fn host(&self) -> &str {
        self.header("HOST")
    }

    /// Partie du USN avant `::`.
    pub fn udn(&self) -> &str {
        let usn = self.usn();
        match usn.find("::") {
            Some(idx) => &usn[..idx],
            None => usn,
        }
    }

    /// NT si présent, sinon suffixe du USN après `::`, sinon ST.
    pub fn message_type(&self) -> &str {
        let nt = self.notification_type();
        if !nt.is_empty() {
            return nt;
        }
        let usn = self.usn();
        if let Some(idx) = usn.find("::") {
            return &usn[idx + 2..];
        }
        self.search_type()
    }

    pub fn max_age(&self) -> u32 {
        parse_max_age(self.message.header("CACHE-CONTROL"))
    }

    /// MX d'une requête M-SEARCH, `None` si absent ou illisible.
    pub fn mx(&self) -> Option<u32> {
        self.message.header("MX").and_then(|v| v.trim().parse().ok())
    }

    pub fn is_alive(&self) -> bool {
        !self.is_byebye()
    }

    pub fn is_byebye(&self) -> bool {
        self.notification_sub_type().eq_ignore_ascii_case(SSDP_BYEBYE)
    }

    /// Une annonce ne porte pas de ST ; une réponse de recherche si.
    pub fn is_advertisement(&self) -> bool {
        self.search_type().is_empty()
    }

    pub fn is_search_request(&self) -> bool {
        self.message
            .method()
            .is_some_and(|m| m.eq_ignore_ascii_case(SSDP_SEARCH_METHOD))
    }

    pub fn is_request(&self) -> bool {
        self.message.is_request()
    }

    pub fn is_response(&self) -> bool {
        self.message.is_response()
    }

    pub fn is_device(&self) -> bool {
        self.message_type().contains(":device:")
    }

    pub fn is_service(&self) -> bool {
        self.message_type().contains(":service:")
    }

    pub fn is_root(&self) -> bool {
        self.message_type() == UPNP_ROOT_DEVICE
    }
}

/// Lit `max-age=N` dans CACHE-CONTROL (espaces et casse tolérés).
pub(crate) fn parse_max_age(value: Option<&str>) -> u32 {
    if let Some(v) = value {
        let lower = v.to_ascii_lowercase();
        if let Some(idx) = lower.find("max-age") {
            let after_key = &v[idx + 7..];
            let after_eq = after_key.trim_start().trim_start_matches('=').trim_start();
            let digits: String = after_eq
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(age) = digits.parse::<u32>() {
                return age;
            }
        }
        trace!(
            "Could not parse max-age from CACHE-CONTROL: '{}', using default {}",
            v, DEFAULT_MAX_AGE
        );
    }
    DEFAULT_MAX_AGE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssdp::protocol::{
        DiscoveryEndpoints, create_alive_notify, create_alive_response, create_byebye_notify,
        create_discovery_request,
    };

    fn source() -> SocketAddr {
        "192.168.1.20:1900".parse().unwrap()
    }

    #[test]
    fn test_alive_notify_parses_back() {
        let raw = create_alive_notify(
            DiscoveryEndpoints::IPV4,
            "http://192.168.1.20/desc.xml",
            "urn:schemas-upnp-org:device:MediaRenderer:1",
            "uuid:abcd::urn:schemas-upnp-org:device:MediaRenderer:1",
            900,
            "test/1.0",
        );
        let msg = SsdpMessage::parse(raw.as_bytes(), source()).unwrap();

        assert!(msg.is_alive());
        assert!(!msg.is_byebye());
        assert!(msg.is_advertisement());
        assert!(msg.is_device());
        assert!(!msg.is_service());
        assert_eq!(msg.udn(), "uuid:abcd");
        assert_eq!(msg.max_age(), 900);
        assert_eq!(msg.location(), "http://192.168.1.20/desc.xml");
        assert_eq!(msg.source(), source());
    }

    #[test]
    fn test_byebye_and_root() {
        let raw = create_byebye_notify(
            DiscoveryEndpoints::IPV4,
            UPNP_ROOT_DEVICE,
            "uuid:abcd::upnp:rootdevice",
        );
        let msg = SsdpMessage::parse(raw.as_bytes(), source()).unwrap();
        assert!(msg.is_byebye());
        assert!(msg.is_root());
        assert_eq!(msg.max_age(), DEFAULT_MAX_AGE);
    }

    #[test]
    fn test_search_response_type_comes_from_usn() {
        let raw = create_alive_response(
            "http://192.168.1.20/desc.xml",
            "ssdp:all",
            "uuid:abcd::urn:schemas-upnp-org:service:AVTransport:1",
            1800,
            "test/1.0",
        );
        let msg = SsdpMessage::parse(raw.as_bytes(), source()).unwrap();
        assert!(msg.is_response());
        assert!(!msg.is_advertisement());
        assert!(msg.is_service());
        assert_eq!(
            msg.message_type(),
            "urn:schemas-upnp-org:service:AVTransport:1"
        );
    }

    #[test]
    fn test_search_request() {
        let raw = create_discovery_request(DiscoveryEndpoints::IPV4, "upnp:rootdevice", 5);
        let msg = SsdpMessage::parse(raw.as_bytes(), source()).unwrap();
        assert!(msg.is_search_request());
        assert!(msg.is_request());
        assert_eq!(msg.mx(), Some(5));
        assert_eq!(msg.search_type(), "upnp:rootdevice");
        assert!(msg.is_root());
    }

    #[test]
    fn test_date_header_is_used_when_valid() {
        let raw = "HTTP/1.1 200 OK\r\nDATE: Tue, 15 Nov 1994 08:12:31 GMT\r\nST: ssdp:all\r\n\r\n";
        let msg = SsdpMessage::parse(raw.as_bytes(), source()).unwrap();
        assert_eq!(msg.date_generated().to_rfc2822(), "Tue, 15 Nov 1994 08:12:31 +0000");
    }

    #[test]
    fn test_malformed_datagram_is_an_error() {
        assert!(matches!(
            SsdpMessage::parse(b"garbage", source()),
            Err(SsdpError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_max_age_variants() {
        assert_eq!(parse_max_age(Some("max-age=1800")), 1800);
        assert_eq!(parse_max_age(Some("MAX-AGE = 66")), 66);
        assert_eq!(parse_max_age(Some("no-cache, max-age =30")), 30);
        assert_eq!(parse_max_age(Some("no-cache")), DEFAULT_MAX_AGE);
        assert_eq!(parse_max_age(None), DEFAULT_MAX_AGE);
    }
}
