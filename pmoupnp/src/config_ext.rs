//! Extension pour intégrer la configuration SSDP/GENA dans pmoconfig
//!
//! Ce module fournit le trait `UpnpConfigExt`, qui ajoute à
//! `pmoconfig::Config` des accesseurs typés pour les sections `ssdp`,
//! `gena` et `scheduler`. Une valeur absente ou illisible rend le défaut
//! du protocole.

use crate::gena::{DEFAULT_NOTIFY_TIMEOUT_SECS, DEFAULT_NOTIFY_WORKERS, DEFAULT_SUBSCRIPTION_TIMEOUT};
use crate::ssdp::{DEFAULT_MAX_AGE, DEFAULT_MX, DEFAULT_USER_AGENT, DiscoveryEndpoints, SOCKET_TTL};
use anyhow::Result;
use pmoconfig::Config;
use pmoscheduler::DEFAULT_WORKERS;
use serde_yaml::Value;
use std::net::SocketAddr;

/// Trait d'extension pour ajouter la configuration UPnP à pmoconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmoupnp::UpnpConfigExt;
///
/// let config = get_config();
/// let max_age = config.get_ssdp_max_age()?;
/// let destinations = config.ssdp_destinations()?;
/// ```
pub trait UpnpConfigExt {
    /// Durée de validité annoncée (`CACHE-CONTROL: max-age`), en secondes
    fn get_ssdp_max_age(&self) -> Result<u32>;

    fn set_ssdp_max_age(&self, max_age: u32) -> Result<()>;

    /// MX des recherches émises
    fn get_ssdp_mx(&self) -> Result<u32>;

    /// TTL multicast des sockets SSDP
    fn get_ssdp_ttl(&self) -> Result<u32>;

    /// Produit annoncé dans les en-têtes `SERVER`
    fn get_ssdp_user_agent(&self) -> Result<String>;

    fn set_ssdp_user_agent(&self, user_agent: String) -> Result<()>;

    /// Annonce aussi sur les groupes IPv6
    fn get_ssdp_ipv6(&self) -> Result<bool>;

    /// Annonce aussi en broadcast IPv4
    fn get_ssdp_broadcast(&self) -> Result<bool>;

    /// Destinations des annonces, déduites des drapeaux `ipv6` et `broadcast`
    fn ssdp_destinations(&self) -> Result<Vec<SocketAddr>>;

    /// Durée d'abonnement accordée sans en-tête `TIMEOUT`, en secondes
    fn get_gena_default_timeout(&self) -> Result<u64>;

    /// Timeout HTTP d'un NOTIFY, en secondes
    fn get_gena_notify_timeout(&self) -> Result<u64>;

    /// Threads d'envoi des NOTIFY
    fn get_gena_notify_workers(&self) -> Result<usize>;

    /// Taille du pool de workers du scheduler
    fn get_scheduler_workers(&self) -> Result<usize>;
}

/// Entier lu tel quel ou depuis une chaîne (surcharges par variables
/// d'environnement).
fn as_u64(value: Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl UpnpConfigExt for Config {
    fn get_ssdp_max_age(&self) -> Result<u32> {
        Ok(self
            .get_value(&["ssdp", "max_age"])
            .ok()
            .and_then(as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(DEFAULT_MAX_AGE))
    }

    fn set_ssdp_max_age(&self, max_age: u32) -> Result<()> {
        self.set_value(&["ssdp", "max_age"], Value::Number(max_age.into()))
    }

    fn get_ssdp_mx(&self) -> Result<u32> {
        Ok(self
            .get_value(&["ssdp", "mx"])
            .ok()
            .and_then(as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(DEFAULT_MX))
    }

    fn get_ssdp_ttl(&self) -> Result<u32> {
        Ok(self
            .get_value(&["ssdp", "ttl"])
            .ok()
            .and_then(as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(SOCKET_TTL))
    }

    fn get_ssdp_user_agent(&self) -> Result<String> {
        match self.get_value(&["ssdp", "user_agent"]) {
            Ok(Value::String(s)) if !s.is_empty() => Ok(s),
            _ => Ok(DEFAULT_USER_AGENT.to_string()),
        }
    }

    fn set_ssdp_user_agent(&self, user_agent: String) -> Result<()> {
        self.set_value(&["ssdp", "user_agent"], Value::String(user_agent))
    }

    fn get_ssdp_ipv6(&self) -> Result<bool> {
        Ok(self
            .get_value(&["ssdp", "ipv6"])
            .ok()
            .and_then(as_bool)
            .unwrap_or(false))
    }

    fn get_ssdp_broadcast(&self) -> Result<bool> {
        Ok(self
            .get_value(&["ssdp", "broadcast"])
            .ok()
            .and_then(as_bool)
            .unwrap_or(true))
    }

    fn ssdp_destinations(&self) -> Result<Vec<SocketAddr>> {
        let mut destinations = vec![DiscoveryEndpoints::IPV4];
        if self.get_ssdp_broadcast()? {
            destinations.push(DiscoveryEndpoints::BROADCAST);
        }
        if self.get_ssdp_ipv6()? {
            destinations.extend(DiscoveryEndpoints::ipv6());
        }
        Ok(destinations)
    }

    fn get_gena_default_timeout(&self) -> Result<u64> {
        Ok(self
            .get_value(&["gena", "default_timeout"])
            .ok()
            .and_then(as_u64)
            .unwrap_or(DEFAULT_SUBSCRIPTION_TIMEOUT))
    }

    fn get_gena_notify_timeout(&self) -> Result<u64> {
        Ok(self
            .get_value(&["gena", "notify_timeout"])
            .ok()
            .and_then(as_u64)
            .unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECS))
    }

    fn get_gena_notify_workers(&self) -> Result<usize> {
        Ok(self
            .get_value(&["gena", "notify_workers"])
            .ok()
            .and_then(as_u64)
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_NOTIFY_WORKERS))
    }

    fn get_scheduler_workers(&self) -> Result<usize> {
        Ok(self
            .get_value(&["scheduler", "workers"])
            .ok()
            .and_then(as_u64)
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_WORKERS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(config.get_ssdp_max_age().unwrap(), 1800);
        assert_eq!(config.get_ssdp_mx().unwrap(), 3);
        assert_eq!(config.get_ssdp_ttl().unwrap(), 4);
        assert_eq!(config.get_gena_default_timeout().unwrap(), 1800);
        assert_eq!(config.get_gena_notify_timeout().unwrap(), 5);
        assert_eq!(config.get_gena_notify_workers().unwrap(), 4);
        assert_eq!(config.get_scheduler_workers().unwrap(), 4);
        assert_eq!(
            config.ssdp_destinations().unwrap(),
            vec![DiscoveryEndpoints::IPV4, DiscoveryEndpoints::BROADCAST]
        );
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_yaml_str(
            "ssdp:\n  max_age: 30\n  ipv6: true\n  broadcast: false\nscheduler:\n  workers: 0\n",
        )
        .unwrap();
        assert_eq!(config.get_ssdp_max_age().unwrap(), 30);
        assert_eq!(config.get_scheduler_workers().unwrap(), DEFAULT_WORKERS);

        let destinations = config.ssdp_destinations().unwrap();
        assert_eq!(destinations.len(), 5);
        assert_eq!(destinations[0], DiscoveryEndpoints::IPV4);
        assert!(!destinations.contains(&DiscoveryEndpoints::BROADCAST));
        assert!(destinations.contains(&DiscoveryEndpoints::IPV6_LINK_LOCAL));
    }

    #[test]
    fn test_string_values_and_setters() {
        let config = Config::from_yaml_str("gena:\n  default_timeout: \"60\"\n").unwrap();
        assert_eq!(config.get_gena_default_timeout().unwrap(), 60);

        config.set_ssdp_max_age(120).unwrap();
        config.set_ssdp_user_agent("demo/2.0".to_string()).unwrap();
        assert_eq!(config.get_ssdp_max_age().unwrap(), 120);
        assert_eq!(config.get_ssdp_user_agent().unwrap(), "demo/2.0");
    }
}
