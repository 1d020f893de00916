//! JSON-over-HTTP facade polled by the dashboard UI.
//!
//! Thin translation layer: every route maps onto one supervisor or relay
//! operation and holds no state of its own.

pub mod error;
pub mod handlers;

use axum::{Router, routing::get};

use crate::relay::DatagramRelay;
use crate::supervisor::WorkerSupervisor;
use handlers::{
    control_worker, get_worker_status, health_check, list_datagrams, list_worker_statuses,
    send_datagram,
};

/// Handles to the two components, built once by the composition root.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: WorkerSupervisor,
    pub relay: DatagramRelay,
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/scripts", get(list_worker_statuses).post(control_worker))
        .route("/api/scripts/{id}", get(get_worker_status))
        .route("/api/udp", get(list_datagrams).post(send_datagram))
        .with_state(state)
}
