use super::schema::{AppConfig, PartialConfig, RelayConfig, SupervisorConfig};
use crate::error::ConfigError;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_UDP_BIND_HOST: &str = "0.0.0.0";
pub const DEFAULT_UDP_PORT: u16 = 5005;
pub const DEFAULT_DATAGRAM_CAPACITY: usize = 100;
pub const DEFAULT_SCRIPTS_DIR: &str = "./rplidar_control";
pub const DEFAULT_LOG_CAPACITY: usize = 1000;
pub const DEFAULT_STATUS_LOG_LINES: usize = 50;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            http_addr: self.http_addr.or(fallback.http_addr),
            udp_bind_host: self.udp_bind_host.or(fallback.udp_bind_host),
            udp_port: self.udp_port.or(fallback.udp_port),
            datagram_capacity: self.datagram_capacity.or(fallback.datagram_capacity),
            scripts_dir: self.scripts_dir.or(fallback.scripts_dir),
            interpreter: self.interpreter.or(fallback.interpreter),
            log_capacity: self.log_capacity.or(fallback.log_capacity),
            status_log_lines: self.status_log_lines.or(fallback.status_log_lines),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    ///
    /// Capacities of zero are raised to one; an empty interpreter string means
    /// "run the script directly".
    pub fn finalize(self) -> Result<AppConfig, ConfigError> {
        let http_raw = self
            .http_addr
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let http_addr: SocketAddr =
            http_raw
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::InvalidHttpAddr {
                    value: http_raw.clone(),
                    message: e.to_string(),
                })?;

        let interpreter = self.interpreter.filter(|i| !i.trim().is_empty());

        Ok(AppConfig {
            http_addr,
            relay: RelayConfig {
                bind_host: self
                    .udp_bind_host
                    .unwrap_or_else(|| DEFAULT_UDP_BIND_HOST.to_string()),
                port: self.udp_port.unwrap_or(DEFAULT_UDP_PORT),
                capacity: self
                    .datagram_capacity
                    .unwrap_or(DEFAULT_DATAGRAM_CAPACITY)
                    .max(1),
            },
            workers: SupervisorConfig {
                scripts_dir: self
                    .scripts_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRIPTS_DIR)),
                interpreter,
                log_capacity: self.log_capacity.unwrap_or(DEFAULT_LOG_CAPACITY).max(1),
                status_log_lines: self
                    .status_log_lines
                    .unwrap_or(DEFAULT_STATUS_LOG_LINES)
                    .max(1),
            },
        })
    }
}
