//! Sharenet peer agent
//!
//! Shares the files in one local directory with the network. The agent keeps
//! an in-memory index in step with the directory on disk, registers itself and
//! its files with the directory service (retrying until it is reachable),
//! heartbeats to stay online, and serves file bytes to other peers over HTTP.
//!
//! ## Modules
//! - `config`: layered runtime configuration
//! - `index`: local file index and transfer counters
//! - `scanner`: directory walk and index reconciliation
//! - `client`: directory service HTTP client
//! - `agent`: registration state machine and share/unshare/download operations
//! - `server`: axum HTTP surface
//! - `error`: error types

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod index;
pub mod scanner;
pub mod server;

pub use agent::{AgentStats, DownloadTarget, PeerAgent, PeerInfo, RegistrationState};
pub use client::DirectoryClient;
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use index::{DownloadStats, LocalIndex, UploadStats};
pub use scanner::{diff, scan_directory, Reconciliation};
pub use server::{bind_listener, build_router, start_server};
