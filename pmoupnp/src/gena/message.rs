//! Messages GENA : SUBSCRIBE, renouvellement, UNSUBSCRIBE, NOTIFY

use crate::http::{HttpError, HttpMessage};
use crate::ssdp::protocol::{rfc1123_now, server_string};
use chrono::{DateTime, Utc};
use std::fmt;
use url::Url;

pub const SUBSCRIBE_METHOD: &str = "SUBSCRIBE";
pub const UNSUBSCRIBE_METHOD: &str = "UNSUBSCRIBE";
pub const NOTIFY_METHOD: &str = "NOTIFY";
pub const UPNP_EVENT: &str = "upnp:event";
pub const UPNP_PROPCHANGE: &str = "upnp:propchange";

/// Au-delà (environ 136 ans), une durée demandée est traitée comme infinie.
pub const MAX_TIMEOUT_SECS: u64 = u32::MAX as u64;

/// Durée d'abonnement demandée ou accordée.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTimeout {
    Seconds(u64),
    Infinite,
}

impl SubscriptionTimeout {
    /// `Second-1800`, `Infinite` ou `Second-infinite` (casse ignorée).
    pub fn parse(value: &str) -> Option<Self> {
        let lower = value.trim().to_ascii_lowercase();
        if lower == "infinite" || lower == "second-infinite" {
            return Some(SubscriptionTimeout::Infinite);
        }
        lower
            .strip_prefix("second-")
            .and_then(|n| n.trim().parse::<u64>().ok())
            .map(|secs| {
                if secs > MAX_TIMEOUT_SECS {
                    SubscriptionTimeout::Infinite
                } else {
                    SubscriptionTimeout::Seconds(secs)
                }
            })
    }

    pub fn as_duration(&self) -> Option<std::time::Duration> {
        match self {
            SubscriptionTimeout::Seconds(s) => Some(std::time::Duration::from_secs(*s)),
            SubscriptionTimeout::Infinite => None,
        }
    }
}

impl fmt::Display for SubscriptionTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTimeout::Seconds(s) => write!(f, "Second-{}", s),
            SubscriptionTimeout::Infinite => write!(f, "Infinite"),
        }
    }
}

/// Message GENA au-dessus d'un [`HttpMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenaMessage {
    message: HttpMessage,
}

impl GenaMessage {
    pub fn new(message: HttpMessage) -> Self {
        Self { message }
    }

    pub fn parse(data: &[u8]) -> Result<Self, HttpError> {
        HttpMessage::parse(data).map(Self::new)
    }

    pub fn message(&self) -> &HttpMessage {
        &self.message
    }

    pub fn into_message(self) -> HttpMessage {
        self.message
    }

    pub fn to_wire(&self) -> String {
        self.message.to_wire(false)
    }

    /// Chemin de l'URL d'événements (cible de la requête).
    pub fn event_url(&self) -> Option<&str> {
        self.message.target()
    }

    /// SID sans son préfixe `uuid:`.
    pub fn sid(&self) -> Option<&str> {
        self.message
            .header("SID")
            .filter(|s| !s.is_empty())
            .map(|s| s.strip_prefix("uuid:").unwrap_or(s))
    }

    /// Pose le SID, en ajoutant `uuid:` si besoin ; `None` retire l'en-tête.
    pub fn set_sid(&mut self, sid: Option<&str>) {
        match sid {
            Some(sid) if sid.starts_with("uuid:") => self.message.set_header("SID", sid),
            Some(sid) => self.message.set_header("SID", format!("uuid:{}", sid)),
            None => {
                self.message.headers.remove("SID");
            }
        }
    }

    pub fn nt(&self) -> Option<&str> {
        self.message.header("NT").filter(|s| !s.is_empty())
    }

    pub fn has_callback_header(&self) -> bool {
        self.message
            .header("CALLBACK")
            .is_some_and(|s| !s.trim().is_empty())
    }

    /// URLs de `CALLBACK: <url1>, <url2>`. Les entrées illisibles sont ignorées.
    pub fn callbacks(&self) -> Vec<Url> {
        let Some(raw) = self.message.header("CALLBACK") else {
            return Vec::new();
        };
        raw.split(',')
            .map(|cb| cb.trim().trim_matches(|c| c == '<' || c == '>'))
            .filter(|cb| !cb.is_empty())
            .filter_map(|cb| Url::parse(cb).ok())
            .collect()
    }

    pub fn set_callbacks(&mut self, callbacks: &[Url]) {
        if callbacks.is_empty() {
            self.message.headers.remove("CALLBACK");
            return;
        }
        let value = callbacks
            .iter()
            .map(|u| format!("<{}>", u))
            .collect::<Vec<_>>()
            .join(", ");
        self.message.set_header("CALLBACK", value);
    }

    pub fn timeout(&self) -> Option<SubscriptionTimeout> {
        self.message
            .header("TIMEOUT")
            .and_then(SubscriptionTimeout::parse)
    }

    pub fn set_timeout(&mut self, timeout: Option<SubscriptionTimeout>) {
        match timeout {
            Some(t) => self.message.set_header("TIMEOUT", t.to_string()),
            None => {
                self.message.headers.remove("TIMEOUT");
            }
        }
    }

    /// En-tête SERVER.
    pub fn user_agent(&self) -> Option<&str> {
        self.message.header("SERVER")
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.message
            .header("DATE")
            .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
            .map(|d| d.with_timezone(&Utc))
    }

    pub fn seq(&self) -> Option<u32> {
        self.message.header("SEQ").and_then(|s| s.trim().parse().ok())
    }

    fn method_is(&self, method: &str) -> bool {
        self.message
            .method()
            .is_some_and(|m| m.eq_ignore_ascii_case(method))
    }

    /// SUBSCRIBE sans SID.
    pub fn is_subscribe(&self) -> bool {
        self.method_is(SUBSCRIBE_METHOD) && self.sid().is_none()
    }

    /// SUBSCRIBE avec SID.
    pub fn is_renewal(&self) -> bool {
        self.method_is(SUBSCRIBE_METHOD) && self.sid().is_some()
    }

    pub fn is_unsubscribe(&self) -> bool {
        self.method_is(UNSUBSCRIBE_METHOD)
    }

    pub fn is_notify(&self) -> bool {
        self.method_is(NOTIFY_METHOD)
    }

    pub fn subscribe_request(
        event_path: &str,
        host: &str,
        callbacks: &[Url],
        timeout: SubscriptionTimeout,
    ) -> Self {
        let mut msg = Self::new(
            HttpMessage::request(SUBSCRIBE_METHOD, event_path).with_header("HOST", host),
        );
        msg.set_callbacks(callbacks);
        msg.message.set_header("NT", UPNP_EVENT);
        msg.set_timeout(Some(timeout));
        msg
    }

    pub fn renewal_request(
        event_path: &str,
        host: &str,
        sid: &str,
        timeout: SubscriptionTimeout,
    ) -> Self {
        let mut msg = Self::new(
            HttpMessage::request(SUBSCRIBE_METHOD, event_path).with_header("HOST", host),
        );
        msg.set_sid(Some(sid));
        msg.set_timeout(Some(timeout));
        msg
    }

    pub fn unsubscribe_request(event_path: &str, host: &str, sid: &str) -> Self {
        let mut msg = Self::new(
            HttpMessage::request(UNSUBSCRIBE_METHOD, event_path).with_header("HOST", host),
        );
        msg.set_sid(Some(sid));
        msg
    }

    /// Réponse 200 à un SUBSCRIBE ou à un renouvellement.
    pub fn subscribe_response(sid: &str, timeout: SubscriptionTimeout, user_agent: &str) -> Self {
        let mut msg = Self::new(
            HttpMessage::response(200, "OK")
                .with_header("DATE", rfc1123_now())
                .with_header("SERVER", server_string(user_agent)),
        );
        msg.set_sid(Some(sid));
        msg.message.set_header("CONTENT-LENGTH", "0");
        msg.set_timeout(Some(timeout));
        msg
    }

    /// Réponse 200 vide à un UNSUBSCRIBE.
    pub fn unsubscribe_response() -> Self {
        Self::new(HttpMessage::response(200, "OK").with_header("CONTENT-LENGTH", "0"))
    }

    /// NOTIFY propchange vers `callback`.
    pub fn notify_request(callback: &Url, sid: &str, seq: u32, body: &str) -> Self {
        let mut path = callback.path().to_string();
        if let Some(query) = callback.query() {
            path.push('?');
            path.push_str(query);
        }
        let host = match callback.port_or_known_default() {
            Some(port) => format!("{}:{}", callback.host_str().unwrap_or(""), port),
            None => callback.host_str().unwrap_or("").to_string(),
        };

        let mut msg = Self::new(
            HttpMessage::request(NOTIFY_METHOD, path)
                .with_header("HOST", host)
                .with_header("CONTENT-TYPE", "text/xml; charset=\"utf-8\"")
                .with_header("NT", UPNP_EVENT)
                .with_header("NTS", UPNP_PROPCHANGE),
        );
        msg.set_sid(Some(sid));
        msg.message.set_header("SEQ", seq.to_string());
        msg.message.set_header("CONTENT-LENGTH", body.len().to_string());
        msg.message.body = body.to_string();
        msg
    }
}
