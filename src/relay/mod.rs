//! UDP telemetry relay.
//!
//! [`DatagramRelay`] owns the single inbound UDP socket. A background receive
//! task decodes every datagram and keeps the JSON objects in a bounded ring
//! buffer for the dashboard to poll; everything else is dropped. Outbound
//! datagrams are sent from the same socket, fire-and-forget.

pub mod record;
pub mod target;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::ring::RingBuffer;

pub use record::DatagramRecord;

/// Largest UDP payload we accept.
const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Pause after a failed receive so a persistent socket error cannot spin.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Owns the inbound socket and the buffer of recent records.
///
/// Cloning shares the same socket and buffer.
#[derive(Clone)]
pub struct DatagramRelay {
    socket: Arc<UdpSocket>,
    records: Arc<Mutex<RingBuffer<DatagramRecord>>>,
    local_addr: SocketAddr,
}

impl DatagramRelay {
    /// Bind the inbound socket. There is no retry: failing to bind (usually
    /// because the port is taken) is fatal to the relay.
    pub async fn bind(config: &RelayConfig) -> Result<Self, RelayError> {
        let bind_err = |source| RelayError::Bind {
            addr: format!("{}:{}", config.bind_host, config.port),
            source,
        };

        let socket = UdpSocket::bind((config.bind_host.as_str(), config.port))
            .await
            .map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;

        tracing::info!("UDP relay listening on {local_addr}");

        Ok(Self {
            socket: Arc::new(socket),
            records: Arc::new(Mutex::new(RingBuffer::new(config.capacity))),
            local_addr,
        })
    }

    /// Address the inbound socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the receive loop. It runs until `shutdown` is cancelled.
    pub fn spawn_receiver(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let relay = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = relay.socket.recv_from(&mut buf) => match received {
                        Ok((n, from)) => {
                            relay.ingest(&buf[..n], from);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "UDP receive error");
                            tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                        }
                    },
                }
            }
            tracing::debug!("UDP receiver stopped");
        })
    }

    /// Handle one inbound datagram. JSON objects are buffered; anything else
    /// is dropped with a diagnostic. Returns whether a record was stored.
    pub fn ingest(&self, raw: &[u8], from: SocketAddr) -> bool {
        match DatagramRecord::decode(raw, from.ip(), Utc::now()) {
            Some(record) => {
                self.lock_records().push(record);
                true
            }
            None => {
                tracing::debug!(source = %from, bytes = raw.len(), "Dropping non-JSON datagram");
                false
            }
        }
    }

    /// Buffered records, oldest first.
    pub fn list_messages(&self) -> Vec<DatagramRecord> {
        self.lock_records().to_vec()
    }

    /// Send `message` as a single datagram to `(host, port)`.
    ///
    /// Parameters are validated before transmission. Success means the
    /// datagram left the local socket, nothing more.
    pub async fn send(&self, message: &str, host: &str, port: i64) -> Result<SocketAddr, RelayError> {
        target::transmit(&self.socket, message, host, port).await
    }

    fn lock_records(&self) -> MutexGuard<'_, RingBuffer<DatagramRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
