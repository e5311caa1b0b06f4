use super::expose::TunnelHandle;
use crate::settings::Settings;
use crate::sync::SyncHandle;

use anyhow::Result;
use kube::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared dashboard state. The sync and tunnel slots hold at most one active
/// session each; starting a second fails with a 409.
#[derive(Clone)]
pub struct AppState {
    pub client: Client,
    pub settings: Arc<Settings>,
    /// Repo root the dashboard serves; `.kindling/` state lives here
    pub repo_root: PathBuf,
    pub sync: Arc<Mutex<Option<SyncHandle>>>,
    pub tunnel: Arc<Mutex<Option<TunnelHandle>>>,
}

impl AppState {
    pub async fn new(settings: Settings) -> Result<Self> {
        let client = crate::k8s::client::create_client().await?;
        Ok(Self {
            client,
            settings: Arc::new(settings),
            repo_root: std::env::current_dir()?,
            sync: Arc::new(Mutex::new(None)),
            tunnel: Arc::new(Mutex::new(None)),
        })
    }
}
