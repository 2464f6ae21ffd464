//! # Module SSDP - Simple Service Discovery Protocol
//!
//! Découverte des devices UPnP par annonces multicast (alive/byebye) et
//! requêtes M-SEARCH.
//!
//! ## Architecture
//!
//! - [`SsdpAnnouncer`] : annonce périodique d'un couple NT/USN, byebye à l'arrêt
//! - [`SsdpServer`] : répondeur M-SEARCH, regroupe les annonceurs d'un device
//! - [`SsdpSearch`] : session de recherche (M-SEARCH + collecte des réponses)
//! - [`SsdpClient`] / [`SsdpListener`] : côté control point
//! - [`protocol`] : gabarits exacts des messages sur le fil
//!
//! Tout ce qui dépend du temps passe par un [`pmoscheduler::Scheduler`]
//! fourni par l'appelant.
//!
//! ## Constantes SSDP
//!
//! - **Multicast Address**: 239.255.255.250:1900
//! - **Max-Age**: 1800 secondes (30 minutes)
//! - **Announcement Period**: tirée dans [Max-Age/4, Max-Age/2]

mod announcer;
mod client;
mod device;
mod errors;
mod listener;
mod message;
pub mod protocol;
mod search;
mod server;

pub use announcer::{AnnouncerId, Announcement, SsdpAnnouncer};
pub use client::SsdpClient;
pub use device::SsdpDevice;
pub use errors::SsdpError;
pub use listener::{SsdpEvent, SsdpListener};
pub use message::SsdpMessage;
pub use protocol::{
    DEFAULT_MAX_AGE, DEFAULT_MX, DEFAULT_USER_AGENT, DiscoveryEndpoints, MAX_MX, SOCKET_TTL,
    SSDP_ALL, SSDP_ALIVE, SSDP_BYEBYE, SSDP_DISCOVER, UPNP_ROOT_DEVICE,
};
pub use search::{SearchFilter, SearchSettings, SsdpSearch};
pub use server::SsdpServer;

/// Adresse multicast SSDP
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250";

/// Port SSDP
pub const SSDP_PORT: u16 = 1900;
