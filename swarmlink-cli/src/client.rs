//! HTTP client for a running daemon's control surface, grounded on
//! `nyx_cli::NyxControlClient`: a `ureq::Agent` wrapped so every blocking
//! call runs on the blocking pool, since the rest of the CLI is async.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub peer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterContentResponse {
    pub digest: String,
}

#[derive(Debug, Deserialize)]
pub struct StartDownloadResponse {
    pub download_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Deserialize)]
pub struct DownloadStatus {
    pub state: DownloadState,
    pub received_chunks: usize,
    pub total_chunks: u32,
    pub total_bytes: u64,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct DaemonClient {
    base_url: String,
    agent: ureq::Agent,
}

impl DaemonClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_read(Duration::from_secs(30))
            .timeout_write(Duration::from_secs(10))
            .build();
        Self { base_url: base_url.into(), agent }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: for<'de> Deserialize<'de> + Send + 'static>(&self, path: String) -> Result<T> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let resp = agent.get(&path).call().with_context(|| format!("GET {path}"))?;
            Ok(resp.into_json()?)
        })
        .await?
    }

    async fn post_json<B: Serialize + Send + 'static, T: for<'de> Deserialize<'de> + Send + 'static>(
        &self,
        path: String,
        body: B,
    ) -> Result<T> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let resp = agent.post(&path).send_json(serde_json::to_value(&body)?).with_context(|| format!("POST {path}"))?;
            Ok(resp.into_json()?)
        })
        .await?
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        self.get_json(self.url("/api/v1/status")).await
    }

    pub async fn peers(&self, content_id: &str) -> Result<PeersResponse> {
        self.get_json(self.url(&format!("/api/v1/peers/{content_id}"))).await
    }

    pub async fn register_content(&self, content_id: &str, path: &str, port: u16) -> Result<RegisterContentResponse> {
        self.post_json(
            self.url("/api/v1/content"),
            serde_json::json!({ "content_id": content_id, "path": path, "port": port }),
        )
        .await
    }

    pub async fn start_download(
        &self,
        content_id: &str,
        digest: &str,
        output_path: &str,
        max_peers: usize,
    ) -> Result<StartDownloadResponse> {
        self.post_json(
            self.url("/api/v1/downloads"),
            serde_json::json!({
                "content_id": content_id,
                "digest": digest,
                "output_path": output_path,
                "max_peers": max_peers,
            }),
        )
        .await
    }

    pub async fn download_status(&self, download_id: &str) -> Result<DownloadStatus> {
        self.get_json(self.url(&format!("/api/v1/downloads/{download_id}"))).await
    }

    pub async fn cancel_download(&self, download_id: &str) -> Result<()> {
        let path = self.url(&format!("/api/v1/downloads/{download_id}/cancel"));
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            agent.post(&path).call().with_context(|| format!("POST {path}"))?;
            Ok(())
        })
        .await??;
        Ok(())
    }
}

pub fn require_completed(status: &DownloadStatus) -> Result<()> {
    if let DownloadState::Failed = status.state {
        bail!(status.error.clone().unwrap_or_else(|| "download failed".to_string()));
    }
    Ok(())
}
