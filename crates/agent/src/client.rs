use crate::error::{AgentError, Result};
use reqwest::Client;
use serde::Deserialize;
use sharenet_types::{FileRegistration, PeerRegistration};
use std::time::Duration;

/// Header the directory reads the heartbeating peer's id from.
pub const PEER_ID_HEADER: &str = "X-Peer-ID";

#[derive(Debug, Deserialize)]
struct PeerRegistered {
    peer_id: String,
}

#[derive(Debug, Deserialize)]
struct FileRegistered {
    file_id: String,
}

/// HTTP client for the directory's `/api/v1` surface.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    http: Client,
    base_url: String,
}

impl DirectoryClient {
    /// `base_url` is the directory origin, e.g. `http://localhost:8080`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Register this agent, returning the directory-assigned peer id.
    pub async fn register_peer(&self, registration: &PeerRegistration) -> Result<String> {
        let response = self
            .http
            .post(self.endpoint("/peers/register"))
            .json(registration)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AgentError::DirectoryStatus(response.status().as_u16()));
        }
        let body: PeerRegistered = response.json().await?;
        Ok(body.peer_id)
    }

    pub async fn heartbeat(&self, peer_id: &str) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint("/peers/heartbeat"))
            .header(PEER_ID_HEADER, peer_id)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AgentError::DirectoryStatus(response.status().as_u16()));
        }
        Ok(())
    }

    /// Advertise one file, returning the directory's record id.
    pub async fn register_file(&self, registration: &FileRegistration) -> Result<String> {
        let response = self
            .http
            .post(self.endpoint("/files/register"))
            .json(registration)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AgentError::DirectoryStatus(response.status().as_u16()));
        }
        let body: FileRegistered = response.json().await?;
        Ok(body.file_id)
    }
}
