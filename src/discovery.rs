use log::info;
use mdns_sd::{ServiceDaemon, ServiceInfo};

use crate::error::{Result, VtsError};
use crate::formats::OutputFormat;

const SERVICE_TYPE: &str = "_vts._tcp.local.";

/// mDNS announcement of the daemon on the LAN.
///
/// Announcement only: clients that want a source browse `_vts._tcp`
/// themselves and read the advertised format out of the TXT record
/// before ever opening a connection.
pub struct Discovery {
    mdns: ServiceDaemon,
}

impl Discovery {
    pub fn new() -> Result<Self> {
        let mdns = ServiceDaemon::new().map_err(|e| VtsError::Discovery(e.to_string()))?;
        Ok(Self { mdns })
    }

    /// Announce this daemon together with the output format it serves.
    pub fn register_daemon(
        &self,
        daemon_name: &str,
        port: u16,
        format: OutputFormat,
    ) -> Result<()> {
        let (width, height) = format.standard.geometry();
        let standard = format.standard.to_string();
        let colorspace = format.colorspace.to_string();
        let geometry = format!("{}x{}", width, height);
        let properties = [
            ("version", env!("CARGO_PKG_VERSION")),
            ("standard", standard.as_str()),
            ("colorspace", colorspace.as_str()),
            ("geometry", geometry.as_str()),
        ];

        let hostname = format!("{}.local.", daemon_name);
        let service = ServiceInfo::new(
            SERVICE_TYPE,
            daemon_name,
            &hostname,
            "", // ip auto-detected
            port,
            &properties[..],
        )
        .map_err(|e| VtsError::Discovery(e.to_string()))?;

        self.mdns
            .register(service)
            .map_err(|e| VtsError::Discovery(e.to_string()))?;

        info!("Announced {} ({}) on port {}", daemon_name, format, port);
        Ok(())
    }
}
