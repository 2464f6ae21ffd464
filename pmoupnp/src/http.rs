//! Lecture/écriture minimale de messages de type HTTP
//!
//! SSDP et GENA transportent des messages HTTP/1.1 réduits à une ligne de
//! départ, des en-têtes et un corps. Ce module ne fait rien de plus : pas de
//! chunked, pas de continuation d'en-têtes.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("Empty message")]
    Empty,

    #[error("Invalid start line: {0}")]
    InvalidStartLine(String),

    #[error("Invalid status code: {0}")]
    InvalidStatusCode(String),
}

pub const HTTP_VERSION: &str = "HTTP/1.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: String, target: String },
    Response { status: u16, reason: String },
}

impl fmt::Display for StartLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartLine::Request { method, target } => {
                write!(f, "{} {} {}", method, target, HTTP_VERSION)
            }
            StartLine::Response { status, reason } => {
                write!(f, "{} {} {}", HTTP_VERSION, status, reason)
            }
        }
    }
}

/// En-têtes ordonnés, noms comparés sans tenir compte de la casse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remplace la valeur en place si l'en-tête existe, sinon l'ajoute à la fin.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self
            .entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage {
    pub start: StartLine,
    pub headers: Headers,
    pub body: String,
}

impl HttpMessage {
    pub fn request(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            start: StartLine::Request {
                method: method.into(),
                target: target.into(),
            },
            headers: Headers::new(),
            body: String::new(),
        }
    }

    pub fn response(status: u16, reason: impl Into<String>) -> Self {
        Self {
            start: StartLine::Response {
                status,
                reason: reason.into(),
            },
            headers: Headers::new(),
            body: String::new(),
        }
    }

    /// Parse un datagramme ou un flux HTTP.
    ///
    /// Les octets invalides en UTF-8 sont remplacés. Les lignes d'en-tête sans
    /// `:` sont ignorées ; une ligne vide sépare les en-têtes du corps.
    pub fn parse(data: &[u8]) -> Result<Self, HttpError> {
        let text = String::from_utf8_lossy(data);
        let mut rest: &str = &text;

        let first = loop {
            match next_line(&mut rest) {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line,
                None => return Err(HttpError::Empty),
            }
        };
        let start = parse_start_line(first)?;

        let mut headers = Headers::new();
        while let Some(line) = next_line(&mut rest) {
            if line.is_empty() {
                break;
            }
            let Some(colon) = line.find(':') else {
                continue;
            };
            let name = line[..colon].trim();
            if name.is_empty() {
                continue;
            }
            let value = &line[colon + 1..];
            let value = value.strip_prefix(' ').unwrap_or(value).trim_end();
            headers.set(name, value);
        }

        Ok(Self {
            start,
            headers,
            body: rest.to_string(),
        })
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start, StartLine::Request { .. })
    }

    pub fn is_response(&self) -> bool {
        matches!(self.start, StartLine::Response { .. })
    }

    pub fn method(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { target, .. } => Some(target),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match &self.start {
            StartLine::Response { status, .. } => Some(*status),
            StartLine::Request { .. } => None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Sérialise en CRLF. Avec `with_content_length`, CONTENT-LENGTH est
    /// calculé depuis le corps s'il n'a pas été posé explicitement.
    pub fn to_wire(&self, with_content_length: bool) -> String {
        let mut out = String::with_capacity(128 + self.body.len());
        out.push_str(&self.start.to_string());
        out.push_str("\r\n");
        for (name, value) in self.headers.iter() {
            if value.is_empty() {
                out.push_str(name);
                out.push_str(":\r\n");
            } else {
                out.push_str(name);
                out.push_str(": ");
                out.push_str(value);
                out.push_str("\r\n");
            }
        }
        if with_content_length && !self.headers.contains("CONTENT-LENGTH") {
            out.push_str(&format!("CONTENT-LENGTH: {}\r\n", self.body.len()));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_wire(false).into_bytes()
    }
}

fn next_line<'a>(rest: &mut &'a str) -> Option<&'a str> {
    if rest.is_empty() {
        return None;
    }
    let (line, tail) = match rest.find('\n') {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => (*rest, ""),
    };
    *rest = tail;
    Some(line.strip_suffix('\r').unwrap_or(line))
}

fn parse_start_line(line: &str) -> Result<StartLine, HttpError> {
    let parts: Vec<&str> = line.split(' ').filter(|p| !p.is_empty()).collect();
    if parts.len() < 3 {
        return Err(HttpError::InvalidStartLine(line.to_string()));
    }

    if parts[0].to_ascii_uppercase().starts_with("HTTP") {
        let status = parts[1]
            .parse::<u16>()
            .map_err(|_| HttpError::InvalidStatusCode(parts[1].to_string()))?;
        Ok(StartLine::Response {
            status,
            reason: parts[2..].join(" "),
        })
    } else {
        if !parts[2].to_ascii_uppercase().starts_with("HTTP") {
            return Err(HttpError::InvalidStartLine(line.to_string()));
        }
        Ok(StartLine::Request {
            method: parts[0].to_string(),
            target: parts[1].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let raw = b"M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nMAN: \"ssdp:discover\"\r\nST: ssdp:all\r\nMX: 3\r\n\r\n";
        let msg = HttpMessage::parse(raw).unwrap();
        assert_eq!(msg.method(), Some("M-SEARCH"));
        assert_eq!(msg.target(), Some("*"));
        assert_eq!(msg.header("st"), Some("ssdp:all"));
        assert_eq!(msg.header("Host"), Some("239.255.255.250:1900"));
        assert_eq!(msg.body, "");
    }

    #[test]
    fn test_parse_response_with_multiword_reason_and_empty_header() {
        let raw = b"HTTP/1.1 412 Precondition Failed\r\nEXT:\r\nSERVER: Linux UPnP/1.1 test\r\n\r\nbody";
        let msg = HttpMessage::parse(raw).unwrap();
        assert_eq!(msg.status(), Some(412));
        match &msg.start {
            StartLine::Response { reason, .. } => assert_eq!(reason, "Precondition Failed"),
            _ => panic!("expected response"),
        }
        assert_eq!(msg.header("EXT"), Some(""));
        assert_eq!(msg.body, "body");
    }

    #[test]
    fn test_parse_accepts_bare_lf_and_skips_garbage_lines() {
        let raw = b"NOTIFY * HTTP/1.1\nNT: upnp:rootdevice\ngarbage\nNTS: ssdp:alive\n\n";
        let msg = HttpMessage::parse(raw).unwrap();
        assert_eq!(msg.headers.len(), 2);
        assert_eq!(msg.header("NTS"), Some("ssdp:alive"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(HttpMessage::parse(b""), Err(HttpError::Empty));
        assert!(matches!(
            HttpMessage::parse(b"HELLO\r\n\r\n"),
            Err(HttpError::InvalidStartLine(_))
        ));
        assert!(matches!(
            HttpMessage::parse(b"HTTP/1.1 abc OK\r\n\r\n"),
            Err(HttpError::InvalidStatusCode(_))
        ));
    }

    #[test]
    fn test_headers_set_replaces_case_insensitively() {
        let mut headers = Headers::new();
        headers.set("SID", "uuid:a");
        headers.set("sid", "uuid:b");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Sid"), Some("uuid:b"));
        assert_eq!(headers.remove("SID"), Some("uuid:b".to_string()));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_to_wire() {
        let msg = HttpMessage::response(200, "OK")
            .with_header("EXT", "")
            .with_header("ST", "upnp:rootdevice")
            .with_body("xyz");
        let wire = msg.to_wire(true);
        assert_eq!(
            wire,
            "HTTP/1.1 200 OK\r\nEXT:\r\nST: upnp:rootdevice\r\nCONTENT-LENGTH: 3\r\n\r\nxyz"
        );
        let back = HttpMessage::parse(wire.as_bytes()).unwrap();
        assert_eq!(back.header("content-length"), Some("3"));
    }
}
