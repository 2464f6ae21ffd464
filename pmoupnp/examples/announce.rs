//! Annonce un MediaRenderer fictif et répond aux M-SEARCH jusqu'à Ctrl-C.
//!
//! ```bash
//! RUST_LOG=debug cargo run -p pmoupnp --example announce
//! ```

use anyhow::Result;
use pmoconfig::get_config;
use pmoupnp::net::UdpTransport;
use pmoupnp::ssdp::{SsdpDevice, SsdpServer};
use pmoupnp::{Scheduler, UpnpConfigExt};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let config = get_config();
    let level = config
        .get_log_min_level()
        .unwrap_or_else(|_| "info".to_string());
    if config.get_log_enable_console()? {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase())),
            )
            .init();
    }

    let scheduler = Arc::new(Scheduler::with_workers(
        "pmoupnp-demo",
        config.get_scheduler_workers()?,
    ));
    let transport = Arc::new(UdpTransport::bind_with_ttl(
        "0.0.0.0:1900".parse()?,
        config.get_ssdp_ttl()?,
    )?);
    let server = SsdpServer::new(scheduler, transport);

    // L'UDN est persisté dans la configuration pour rester stable entre deux lancements
    let udn = config.get_device_udn("mediarenderer", "demo")?;
    let ip = config.get_local_ip();
    let mut device = SsdpDevice::new(
        udn,
        "urn:schemas-upnp-org:device:MediaRenderer:1",
        format!("http://{}:8080/device.xml", ip),
    )
    .with_max_age(config.get_ssdp_max_age()?)
    .with_user_agent(config.get_ssdp_user_agent()?);
    device.add_service("urn:schemas-upnp-org:service:AVTransport:1");
    device.add_service("urn:schemas-upnp-org:service:RenderingControl:1");

    server.add_device(device);
    server.start_listening()?;

    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}
