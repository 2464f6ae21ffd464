//! Utilitaires réseau et système partagés par la pile UPnP.
//!
//! # Fonctions principales
//!
//! - [`guess_local_ip`] : devine l'adresse IP locale utilisée pour les connexions sortantes
//! - [`unicast_addresses`] : adresses unicast des interfaces, filtrables par famille
//! - [`is_multicast`] / [`is_broadcast`] : classification des destinations SSDP
//! - [`get_os_string`] : chaîne `"{plateforme}/{version}"` des en-têtes SERVER
mod ip_utils;

pub use ip_utils::{AddressFamily, guess_local_ip, is_broadcast, is_multicast, unicast_addresses};

/// Retourne une chaîne décrivant le système d'exploitation et sa version.
///
/// Utilisée comme préfixe des en-têtes `SERVER` SSDP et GENA
/// (`"{os} UPnP/1.1 {user-agent}"`).
///
/// # Format
/// - macOS: "macOS/15.1"
/// - Linux: "Ubuntu/22.04"
/// - Autre: "{OS}/Unknown"
pub fn get_os_string() -> String {
    let info = os_info::get();
    let os_type = format!("{:?}", info.os_type());

    let version = info.version();
    if version != &os_info::Version::Unknown {
        format!("{}/{}", os_type, version)
    } else {
        format!("{}/Unknown", os_type)
    }
}
