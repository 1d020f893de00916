pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod relay;
pub mod ring;
pub mod supervisor;
