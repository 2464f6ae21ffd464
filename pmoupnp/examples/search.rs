//! Cherche les devices UPnP du réseau local et affiche leurs descriptions.
//!
//! ```bash
//! cargo run -p pmoupnp --example search -- urn:schemas-upnp-org:device:MediaRenderer:1
//! ```

use anyhow::Result;
use pmoconfig::get_config;
use pmoupnp::ssdp::{SearchSettings, SsdpClient, SsdpEvent};
use pmoupnp::{Scheduler, UpnpConfigExt};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = get_config();
    let search_type = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ssdp:all".to_string());

    let scheduler = Arc::new(Scheduler::new());
    let client = SsdpClient::new(scheduler)?;
    let events = client.subscribe();

    let search = client.create_search(true);
    search.set_settings(SearchSettings::new(search_type).with_mx(config.get_ssdp_mx()?));
    let results = search.search(&config.ssdp_destinations()?)?;

    for event in events.try_iter() {
        if let SsdpEvent::SearchResponse(msg) = event {
            info!("📡 {} at {} ({})", msg.usn(), msg.location(), msg.server());
        }
    }
    info!("✅ {} devices found", results.len());
    Ok(())
}
