//! IP configuration shared between the session setup layer and the PPP core.
//!
//! The addresses come from the outer session setup (or a config.toml); the
//! MTU is read when building the LCP Configure-Request and overwritten when
//! the peer supplies one.

use crate::{Error, Result};
use serde::Deserialize;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

/// Local IP parameters for the tunnel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpConfig {
    /// Local IPv4 address, if the setup layer assigned one
    pub addr4: Option<Ipv4Addr>,
    /// Local IPv6 address, if the setup layer assigned one
    pub addr6: Option<Ipv6Addr>,
    /// Link MTU; 0 means "not yet known"
    #[serde(default)]
    pub mtu: u16,
}

impl IpConfig {
    /// Check the MTU is either unset or large enough to carry IP.
    pub fn validate(&self) -> Result<()> {
        if self.mtu != 0 && self.mtu < 576 {
            return Err(Error::Config(format!("MTU {} too small", self.mtu)));
        }
        Ok(())
    }
}

/// Load an [`IpConfig`] from a TOML file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<IpConfig> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: IpConfig = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
