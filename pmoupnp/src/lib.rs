//! # pmoupnp - Découverte SSDP et événements GENA
//!
//! Ce crate implémente les deux protocoles réseau qui entourent un device
//! UPnP :
//!
//! - [`ssdp`] : annonces `NOTIFY` périodiques, recherches `M-SEARCH` et
//!   réponses aux recherches ;
//! - [`gena`] : abonnements `SUBSCRIBE` / `UNSUBSCRIBE`, expiration des
//!   abonnements et envoi des `NOTIFY` de changement d'état.
//!
//! Tous les moteurs partagent un [`Scheduler`] injecté à la construction et
//! parlent au réseau à travers le trait [`net::DatagramTransport`]. Le
//! [`net::LoopbackNetwork`] permet de les faire dialoguer en mémoire.
//!
//! ## Exemple
//!
//! ```no_run
//! use pmoupnp::Scheduler;
//! use pmoupnp::net::UdpTransport;
//! use pmoupnp::ssdp::{SsdpDevice, SsdpServer};
//! use std::sync::Arc;
//!
//! let scheduler = Arc::new(Scheduler::new());
//! let transport = Arc::new(UdpTransport::ssdp().unwrap());
//! let server = SsdpServer::new(scheduler, transport);
//!
//! let device = SsdpDevice::new(
//!     "0f2d3c5e-1111-2222-3333-444455556666",
//!     "urn:schemas-upnp-org:device:MediaRenderer:1",
//!     "http://192.168.1.10:8080/device.xml",
//! );
//! server.add_device(device);
//! server.start_listening().unwrap();
//! ```

pub mod collections;
pub mod config_ext;
pub mod events;
pub mod gena;
pub mod http;
pub mod net;
pub mod ssdp;

pub use crate::collections::{Keyed, ObservableSet, ObservableSetError};
pub use crate::config_ext::UpnpConfigExt;
pub use crate::events::{EventBus, ListenerId, Listeners};
pub use crate::gena::{
    GenaError, GenaEvent, GenaMessage, GenaProperty, GenaPropertySet, GenaServer, GenaSettings,
    GenaSubscriptionList, SubscriptionTimeout,
};
pub use crate::http::{HttpError, HttpMessage};
pub use crate::net::{DatagramTransport, LoopbackNetwork, UdpTransport};
pub use crate::ssdp::{
    Announcement, SsdpAnnouncer, SsdpClient, SsdpError, SsdpEvent, SsdpMessage, SsdpSearch,
    SsdpServer,
};
pub use pmoscheduler::{Scheduler, TimeoutHandle};
