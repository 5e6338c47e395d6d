//! Sharenet directory service
//!
//! The super-peer that tracks which peers are online and which files they
//! advertise. Peers register and heartbeat over HTTP; clients search the file
//! registry and are redirected to the owning peer to download. Registry
//! changes and periodic statistics are pushed to WebSocket observers.
//!
//! ## Modules
//! - `config`: layered runtime configuration
//! - `service`: registries, observer hub and stats snapshot
//! - `tasks`: liveness sweep and stats tick
//! - `server`: axum HTTP surface

pub mod config;
pub mod server;
pub mod service;
pub mod tasks;

pub use config::DirectoryConfig;
pub use server::{bind_listener, build_router, start_server, PEER_ID_HEADER};
pub use service::DirectoryService;
