use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// The TOML file structure for lidar-relay.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub server: Option<ServerConfig>,
    pub relay: Option<RelaySection>,
    pub workers: Option<WorkersSection>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub http_addr: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RelaySection {
    pub bind_host: Option<String>,
    pub port: Option<u16>,
    pub capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct WorkersSection {
    pub scripts_dir: Option<String>,
    /// Program used to run each script (e.g. `python3`). Absent means the
    /// script is executed directly.
    pub interpreter: Option<String>,
    pub log_capacity: Option<usize>,
    pub status_log_lines: Option<usize>,
}

/// Settings for the inbound UDP endpoint and its record buffer.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_host: String,
    pub port: u16,
    pub capacity: usize,
}

/// Settings for launching and observing worker processes.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub scripts_dir: PathBuf,
    pub interpreter: Option<String>,
    pub log_capacity: usize,
    pub status_log_lines: usize,
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: SocketAddr,
    pub relay: RelayConfig,
    pub workers: SupervisorConfig,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub http_addr: Option<String>,
    pub udp_bind_host: Option<String>,
    pub udp_port: Option<u16>,
    pub datagram_capacity: Option<usize>,
    pub scripts_dir: Option<PathBuf>,
    pub interpreter: Option<String>,
    pub log_capacity: Option<usize>,
    pub status_log_lines: Option<usize>,
}

impl ConfigFile {
    /// Flatten the sectioned file layout into a [`PartialConfig`].
    pub fn to_partial(self) -> PartialConfig {
        let server = self.server;
        let relay = self.relay;
        let workers = self.workers;

        let (udp_bind_host, udp_port, datagram_capacity) = match relay {
            Some(r) => (r.bind_host, r.port, r.capacity),
            None => (None, None, None),
        };
        let (scripts_dir, interpreter, log_capacity, status_log_lines) = match workers {
            Some(w) => (
                w.scripts_dir.map(PathBuf::from),
                w.interpreter,
                w.log_capacity,
                w.status_log_lines,
            ),
            None => (None, None, None, None),
        };

        PartialConfig {
            http_addr: server.and_then(|s| s.http_addr),
            udp_bind_host,
            udp_port,
            datagram_capacity,
            scripts_dir,
            interpreter,
            log_capacity,
            status_log_lines,
        }
    }
}
