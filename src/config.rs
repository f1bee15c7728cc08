//! Server configuration.
//!
//! Every setting has a default matching a stock simulator; the binary
//! overrides them from `EIP_*` environment variables. The library itself
//! never reads the environment, so embedders can construct a
//! [`ServerConfig`] directly and tests can run many servers side by side.

use std::env;
use std::time::Duration;

use crate::error::{Result, ServerError};

/// Maximum length of the advertised product name, in ASCII bytes.
pub const PRODUCT_NAME_MAX: usize = 32;

/// Startup configuration for an [`EipServer`](crate::EipServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind both the TCP and UDP endpoints to.
    pub bind_host: String,
    /// TCP port for explicit messaging (encapsulation protocol).
    pub tcp_port: u16,
    /// UDP port reserved for implicit messaging. The listener is a stub:
    /// datagrams are received and discarded.
    pub udp_port: u16,
    /// Backplane slot the simulated device claims to occupy. Informational
    /// only; affects no on-wire bytes.
    pub slot_number: u8,
    /// CIP vendor id reported by the Identity object.
    pub vendor_id: u16,
    /// CIP device type reported by the Identity object.
    pub device_type: u16,
    /// Product code. Identity attribute 3 carries the low 16 bits;
    /// LIST_IDENTITY carries all 32.
    pub product_code: u32,
    /// Product name, truncated to [`PRODUCT_NAME_MAX`] ASCII bytes.
    pub product_name: String,
    /// Idle age after which a session is swept.
    pub idle_timeout: Duration,
    /// Interval between session sweeps.
    pub sweep_interval: Duration,
    /// Number of tags generated at startup.
    pub tag_count: usize,
    /// When true, Unconnected Send responses are re-wrapped in a 0xD2 reply
    /// envelope. Off by default: the stock behavior returns the embedded
    /// response verbatim, which is what most simulator clients expect.
    pub wrap_unconnected_send: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            tcp_port: 44818,
            udp_port: 2222,
            slot_number: 0,
            vendor_id: 0x1337,
            device_type: 0x000C,
            product_code: 0x0001,
            product_name: "EtherNet/IP Simulator".to_string(),
            idle_timeout: Duration::from_millis(300_000),
            sweep_interval: Duration::from_millis(60_000),
            tag_count: 100,
            wrap_unconnected_send: false,
        }
    }
}

impl ServerConfig {
    /// Builds a configuration from `EIP_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = read_var("EIP_BIND_HOST") {
            config.bind_host = host;
        }
        if let Some(port) = parse_var::<u16>("EIP_TCP_PORT")? {
            config.tcp_port = port;
        }
        if let Some(port) = parse_var::<u16>("EIP_UDP_PORT")? {
            config.udp_port = port;
        }
        if let Some(slot) = parse_var::<u8>("EIP_SLOT_NUMBER")? {
            config.slot_number = slot;
        }
        if let Some(vendor) = parse_var::<u16>("EIP_VENDOR_ID")? {
            config.vendor_id = vendor;
        }
        if let Some(device_type) = parse_var::<u16>("EIP_DEVICE_TYPE")? {
            config.device_type = device_type;
        }
        if let Some(code) = parse_var::<u32>("EIP_PRODUCT_CODE")? {
            config.product_code = code;
        }
        if let Some(name) = read_var("EIP_PRODUCT_NAME") {
            config.product_name = name;
        }
        if let Some(ms) = parse_var::<u64>("EIP_IDLE_TIMEOUT_MS")? {
            config.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>("EIP_SWEEP_INTERVAL_MS")? {
            config.sweep_interval = Duration::from_millis(ms);
        }
        if let Some(count) = parse_var::<usize>("EIP_TAG_COUNT")? {
            config.tag_count = count;
        }
        if let Some(wrap) = parse_var::<bool>("EIP_WRAP_UNCONNECTED_SEND")? {
            config.wrap_unconnected_send = wrap;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints that `Default` cannot guarantee once
    /// values come from the environment.
    pub fn validate(&self) -> Result<()> {
        if self.product_name.len() > PRODUCT_NAME_MAX {
            return Err(ServerError::Config(format!(
                "product name exceeds {} bytes: {:?}",
                PRODUCT_NAME_MAX, self.product_name
            )));
        }
        if !self.product_name.is_ascii() {
            return Err(ServerError::Config(
                "product name must be ASCII".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(ServerError::Config(
                "sweep interval must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` string for the TCP listener.
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.tcp_port)
    }

    /// `host:port` string for the UDP stub.
    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.udp_port)
    }
}

fn read_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match read_var(name) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            ServerError::Config(format!("{} has unparseable value {:?}", name, raw))
        }),
    }
}
