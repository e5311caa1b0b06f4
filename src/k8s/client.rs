use anyhow::Result;
use kube::Client;

/// Create a Kubernetes client from the inferred configuration
/// (in-cluster service account or ~/.kube/config).
pub async fn create_client() -> Result<Client> {
    // Install default CryptoProvider for rustls (required for kube-rs HTTPS connections)
    rustls::crypto::ring::default_provider().install_default().ok();

    let config = kube::Config::infer().await?;
    Ok(Client::try_from(config)?)
}
