//! Représentation d'un device SSDP

use super::protocol::{DEFAULT_MAX_AGE, DEFAULT_USER_AGENT, UPNP_ROOT_DEVICE};

/// Device SSDP avec ses métadonnées pour les annonces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpDevice {
    /// UUID du device (sans le préfixe "uuid:")
    pub uuid: String,

    /// Type du device (ex: "urn:schemas-upnp-org:device:MediaRenderer:1")
    pub device_type: String,

    /// URL de la description du device
    pub location: String,

    /// Produit annoncé après `UPnP/1.1` dans l'en-tête SERVER
    pub user_agent: String,

    pub max_age: u32,

    /// Liste des types de notification (NT) à annoncer
    /// Typiquement: [uuid:xxx, upnp:rootdevice, device_type, services...]
    pub notification_types: Vec<String>,
}

impl SsdpDevice {
    /// Crée un device racine avec ses trois NT standards.
    pub fn new(uuid: impl Into<String>, device_type: impl Into<String>, location: impl Into<String>) -> Self {
        let uuid = uuid.into();
        let device_type = device_type.into();
        let notification_types = vec![
            format!("uuid:{}", uuid),
            UPNP_ROOT_DEVICE.to_string(),
            device_type.clone(),
        ];

        Self {
            uuid,
            device_type,
            location: location.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_age: DEFAULT_MAX_AGE,
            notification_types,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_age(mut self, max_age: u32) -> Self {
        self.max_age = max_age;
        self
    }

    /// Ajoute un type de notification, sans doublon.
    pub fn add_notification_type(&mut self, nt: impl Into<String>) {
        let nt = nt.into();
        if !self.notification_types.contains(&nt) {
            self.notification_types.push(nt);
        }
    }

    /// Ajoute le NT d'un service (ex: "urn:schemas-upnp-org:service:AVTransport:1").
    pub fn add_service(&mut self, service_type: impl Into<String>) {
        self.add_notification_type(service_type);
    }

    pub fn get_notification_types(&self) -> &[String] {
        &self.notification_types
    }

    /// USN annoncé pour `nt` : le NT lui-même s'il est de forme `uuid:`,
    /// sinon `uuid:{uuid}::{nt}`.
    pub fn usn_for(&self, nt: &str) -> String {
        if nt.starts_with("uuid:") {
            nt.to_string()
        } else {
            format!("uuid:{}::{}", self.uuid, nt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_notification_types() {
        let mut device = SsdpDevice::new(
            "1234",
            "urn:schemas-upnp-org:device:MediaRenderer:1",
            "http://10.0.0.2/desc.xml",
        );
        device.add_service("urn:schemas-upnp-org:service:AVTransport:1");
        device.add_service("urn:schemas-upnp-org:service:AVTransport:1");

        assert_eq!(
            device.get_notification_types(),
            &[
                "uuid:1234".to_string(),
                "upnp:rootdevice".to_string(),
                "urn:schemas-upnp-org:device:MediaRenderer:1".to_string(),
                "urn:schemas-upnp-org:service:AVTransport:1".to_string(),
            ]
        );
    }

    #[test]
    fn test_usn_for() {
        let device = SsdpDevice::new("1234", "urn:x:device:Y:1", "http://h/d.xml");
        assert_eq!(device.usn_for("uuid:1234"), "uuid:1234");
        assert_eq!(
            device.usn_for("upnp:rootdevice"),
            "uuid:1234::upnp:rootdevice"
        );
    }
}
