//! Envoi HTTP des NOTIFY GENA

use super::message::{GenaMessage, NOTIFY_METHOD};
use anyhow::Result;
use std::time::Duration;
use ureq::{Agent, http};
use url::Url;

/// Livre un NOTIFY à une URL de callback.
///
/// Une erreur signifie seulement que ce callback n'a pas accepté
/// l'événement ; l'abonnement essaie alors le suivant.
pub trait NotifySender: Send + Sync {
    fn send(&self, callback: &Url, request: &GenaMessage) -> Result<()>;
}

pub struct UreqNotifySender {
    agent: Agent,
}

impl UreqNotifySender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
        }
    }
}

impl Default for UreqNotifySender {
    fn default() -> Self {
        Self::new(Duration::from_secs(super::DEFAULT_NOTIFY_TIMEOUT_SECS))
    }
}

impl NotifySender for UreqNotifySender {
    fn send(&self, callback: &Url, request: &GenaMessage) -> Result<()> {
        let mut builder = http::Request::builder()
            .method(NOTIFY_METHOD)
            .uri(callback.as_str());
        for (name, value) in request.message().headers.iter() {
            // ureq pose HOST et CONTENT-LENGTH lui-même
            if name.eq_ignore_ascii_case("HOST") || name.eq_ignore_ascii_case("CONTENT-LENGTH") {
                continue;
            }
            builder = builder.header(name, value);
        }
        let http_request = builder
            .body(request.message().body.clone())
            .map_err(anyhow::Error::new)?;

        let response = self.agent.run(http_request)?;
        if !response.status().is_success() {
            anyhow::bail!("NOTIFY to {} returned HTTP {}", callback, response.status());
        }
        Ok(())
    }
}

fn build_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .allow_non_standard_methods(true)
        .build()
        .into()
}
