//! Modbus TCP master configuration
//!
//! Parameter set handed to the master once at initialization. Callers that
//! load configuration from outside run [`TcpMasterConfig::validate`]; the
//! master itself runs [`TcpMasterConfig::check_runtime`] at initialization.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MasterError, Result};
use crate::retry::RetryStrategy;
use crate::transport::Timeouts;

/// Standard Modbus TCP port
pub const DEFAULT_PORT: u16 = 502;
pub const DEFAULT_IP_ADDRESS: &str = "192.168.0.1";
pub const DEFAULT_UNIT_ID: u8 = 1;
pub const DEFAULT_NUMBER_OF_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 20;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1000;

/// Valid unit id range; 0 is broadcast, 248-255 are reserved
pub const UNIT_ID_RANGE: std::ops::RangeInclusive<u8> = 1..=247;
pub const RETRIES_RANGE: std::ops::RangeInclusive<u32> = 1..=10;
pub const RETRY_DELAY_RANGE_MS: std::ops::RangeInclusive<u64> = 5..=2000;
pub const TIMEOUT_RANGE_MS: std::ops::RangeInclusive<u64> = 50..=5000;

/// Connection parameters of a Modbus TCP master
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpMasterConfig {
    /// Slave IP address (literal address, no name resolution)
    pub ip_address: String,
    /// Slave TCP port
    pub port: u16,
    /// Modbus unit id (slave address)
    pub unit_id: u8,
    /// Attempts for connect and for each operation
    pub number_of_retries: u32,
    /// Fixed delay between attempts
    pub retry_delay_ms: u64,
    /// Send timeout, also bounds the TCP connect
    pub send_timeout_ms: u64,
    /// Receive timeout for responses
    pub receive_timeout_ms: u64,
}

impl Default for TcpMasterConfig {
    fn default() -> Self {
        Self {
            ip_address: DEFAULT_IP_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            unit_id: DEFAULT_UNIT_ID,
            number_of_retries: DEFAULT_NUMBER_OF_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
        }
    }
}

impl TcpMasterConfig {
    /// Create a config for `ip_address:port` with default knobs
    pub fn new(ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
            ..Default::default()
        }
    }

    /// Resolve the slave endpoint
    ///
    /// Fails with `InvalidConfiguration` when the address is not a literal IP
    /// or the port is 0.
    pub fn endpoint(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.ip_address.trim().parse().map_err(|_| {
            MasterError::invalid_config(format!(
                "ip_address '{}' is not a valid IP address",
                self.ip_address
            ))
        })?;
        if self.port == 0 {
            return Err(MasterError::invalid_config("port must be between 1 and 65535"));
        }
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Send/receive timeouts
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            send: Duration::from_millis(self.send_timeout_ms),
            receive: Duration::from_millis(self.receive_timeout_ms),
        }
    }

    /// Retry strategy derived from the retry knobs
    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::from_config(self.number_of_retries, self.retry_delay_ms)
    }

    /// Check every field against its allowed range
    ///
    /// All violations are reported together in one `InvalidConfiguration`.
    pub fn validate(&self) -> Result<()> {
        let mut errors = self.runtime_errors();
        if !UNIT_ID_RANGE.contains(&self.unit_id) {
            errors.push(format!(
                "unit_id {} must be between {} and {}",
                self.unit_id,
                UNIT_ID_RANGE.start(),
                UNIT_ID_RANGE.end()
            ));
        }
        Self::report(errors)
    }

    /// Check what the master needs to run: endpoint, retry knobs and timeouts
    ///
    /// `unit_id` is left to [`validate`](Self::validate); it is only carried
    /// in request frames.
    pub fn check_runtime(&self) -> Result<()> {
        Self::report(self.runtime_errors())
    }

    fn runtime_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(MasterError::InvalidConfiguration(msg)) = self.endpoint() {
            errors.push(msg);
        }
        if !RETRIES_RANGE.contains(&self.number_of_retries) {
            errors.push(format!(
                "number_of_retries {} must be between {} and {}",
                self.number_of_retries,
                RETRIES_RANGE.start(),
                RETRIES_RANGE.end()
            ));
        }
        if !RETRY_DELAY_RANGE_MS.contains(&self.retry_delay_ms) {
            errors.push(format!(
                "retry_delay_ms {} must be between {} and {}",
                self.retry_delay_ms,
                RETRY_DELAY_RANGE_MS.start(),
                RETRY_DELAY_RANGE_MS.end()
            ));
        }
        for (name, value) in [
            ("send_timeout_ms", self.send_timeout_ms),
            ("receive_timeout_ms", self.receive_timeout_ms),
        ] {
            if !TIMEOUT_RANGE_MS.contains(&value) {
                errors.push(format!(
                    "{} {} must be between {} and {}",
                    name,
                    value,
                    TIMEOUT_RANGE_MS.start(),
                    TIMEOUT_RANGE_MS.end()
                ));
            }
        }
        errors
    }

    fn report(errors: Vec<String>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MasterError::InvalidConfiguration(errors.join("; ")))
        }
    }
}
