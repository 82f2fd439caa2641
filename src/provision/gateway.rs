//! Discovery endpoint resolution.
//!
//! The provisioning service lives on the local network's gateway at a fixed
//! port and path, so the endpoint is derived from the default route at call
//! time rather than configured once: a device that moves networks follows
//! its new gateway on the next poll. An explicit URL override is available
//! for networks where the provisioning service is not the gateway.

use std::net::Ipv4Addr;

use crate::provision::ProvisionError;

/// Fixed port of the provisioning service.
pub const DISCOVERY_PORT: u16 = 8000;

/// Fixed path of the provisioning document.
pub const DISCOVERY_PATH: &str = "/config.json";

/// Resolves the discovery URL for the current network.
pub trait EndpointResolver: Send + Sync {
    /// Resolve at call time; resolution failure fails the poll cycle, not
    /// the poller.
    fn discovery_url(&self) -> Result<String, ProvisionError>;
}

/// Always returns a fixed, pre-validated URL.
#[derive(Debug, Clone)]
pub struct FixedResolver {
    url: String,
}

impl FixedResolver {
    /// # Errors
    /// Returns [`ProvisionError::Endpoint`] if the URL does not parse.
    pub fn new(url: impl Into<String>) -> Result<Self, ProvisionError> {
        let url = url.into();
        url::Url::parse(&url)
            .map_err(|e| ProvisionError::Endpoint(format!("invalid discovery URL '{url}': {e}")))?;
        Ok(Self { url })
    }
}

impl EndpointResolver for FixedResolver {
    fn discovery_url(&self) -> Result<String, ProvisionError> {
        Ok(self.url.clone())
    }
}

/// Derives `http://<gateway-ip>:8000/config.json` from the default route.
#[derive(Debug, Clone, Default)]
pub struct GatewayResolver;

impl GatewayResolver {
    pub fn new() -> Self {
        Self
    }
}

impl EndpointResolver for GatewayResolver {
    fn discovery_url(&self) -> Result<String, ProvisionError> {
        let gateway = default_gateway()?;
        Ok(format!("http://{gateway}:{DISCOVERY_PORT}{DISCOVERY_PATH}"))
    }
}

/// Gateway of the default route.
#[cfg(target_os = "linux")]
fn default_gateway() -> Result<Ipv4Addr, ProvisionError> {
    let table = std::fs::read_to_string("/proc/net/route")
        .map_err(|e| ProvisionError::Endpoint(format!("cannot read routing table: {e}")))?;
    parse_route_table(&table)
        .ok_or_else(|| ProvisionError::Endpoint("no default gateway in routing table".to_string()))
}

#[cfg(not(target_os = "linux"))]
fn default_gateway() -> Result<Ipv4Addr, ProvisionError> {
    Err(ProvisionError::Endpoint(
        "gateway discovery is only supported on Linux; set an explicit discovery URL".to_string(),
    ))
}

/// Extract the default gateway from `/proc/net/route` contents.
///
/// Columns are `Iface Destination Gateway Flags ...` with addresses as
/// little-endian hex. The default route has destination `00000000` and the
/// RTF_GATEWAY flag (0x2) set.
fn parse_route_table(table: &str) -> Option<Ipv4Addr> {
    const RTF_GATEWAY: u64 = 0x2;

    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[1] != "00000000" {
            continue;
        }
        let flags = u64::from_str_radix(fields[3], 16).ok()?;
        if flags & RTF_GATEWAY == 0 {
            continue;
        }
        let raw = u32::from_str_radix(fields[2], 16).ok()?;
        // Kernel writes addresses in little-endian byte order.
        let gateway = Ipv4Addr::from(raw.to_le_bytes());
        if !gateway.is_unspecified() {
            return Some(gateway);
        }
    }
    None
}
