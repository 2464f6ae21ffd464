//! GENA : abonnements aux événements des services UPnP
//!
//! Un [`GenaServer`] reçoit les requêtes `SUBSCRIBE` / `UNSUBSCRIBE` d'un
//! device, les route vers la [`GenaSubscriptionList`] du service concerné et
//! pousse les changements de [`GenaProperty`] vers les abonnés sous forme de
//! `NOTIFY` HTTP.
//!
//! Les abonnements non renouvelés disparaissent seuls : chaque abonnement
//! fini garde une vérification d'expiration planifiée sur le
//! [`Scheduler`](pmoscheduler::Scheduler) partagé.

mod errors;
mod message;
mod notifier;
mod property;
mod server;
mod subscription;
mod subscription_list;

pub use errors::GenaError;
pub use message::{
    GenaMessage, MAX_TIMEOUT_SECS, NOTIFY_METHOD, SUBSCRIBE_METHOD, SubscriptionTimeout,
    UNSUBSCRIBE_METHOD, UPNP_EVENT, UPNP_PROPCHANGE,
};
pub use notifier::{NotifySender, UreqNotifySender};
pub use property::{EVENT_NAMESPACE, GenaProperty, GenaPropertySet, PropertyChange};
pub use server::{GenaEvent, GenaServer};
pub use subscription::GenaSubscription;
pub use subscription_list::{GenaSubscriptionList, NotifyDispatch};

use crate::config_ext::UpnpConfigExt;
use crate::ssdp::DEFAULT_USER_AGENT;
use pmoconfig::Config;
use std::time::Duration;

pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_SUBSCRIPTION_TIMEOUT: u64 = 1800;
pub const DEFAULT_NOTIFY_WORKERS: usize = 4;

/// Réglages communs aux listes d'abonnements d'un serveur.
#[derive(Debug, Clone)]
pub struct GenaSettings {
    /// Durée accordée quand la requête n'a pas d'en-tête `TIMEOUT`.
    pub default_timeout: SubscriptionTimeout,
    /// Produit annoncé dans l'en-tête `SERVER` des réponses.
    pub user_agent: String,
    pub notify_timeout: Duration,
    /// Threads d'envoi des NOTIFY, partagés par tous les abonnés.
    pub notify_workers: usize,
}

impl Default for GenaSettings {
    fn default() -> Self {
        Self {
            default_timeout: SubscriptionTimeout::Seconds(DEFAULT_SUBSCRIPTION_TIMEOUT),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            notify_timeout: Duration::from_secs(DEFAULT_NOTIFY_TIMEOUT_SECS),
            notify_workers: DEFAULT_NOTIFY_WORKERS,
        }
    }
}

impl GenaSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            default_timeout: SubscriptionTimeout::Seconds(config.get_gena_default_timeout()?),
            user_agent: config.get_ssdp_user_agent()?,
            notify_timeout: Duration::from_secs(config.get_gena_notify_timeout()?),
            notify_workers: config.get_gena_notify_workers()?,
        })
    }
}
