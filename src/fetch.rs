use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::ensure_https;
use crate::roster::Target;

/// Scoped transport options for one client. Replaces any notion of
/// process-global TLS or timeout state.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
        }
    }
}

impl TransportConfig {
    pub fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(concat!("vidsift/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .context("failed to build HTTP client")
    }
}

/// Supplies the stored HTML document for a target directory, or signals
/// absence. Absence is expected, not an error.
#[async_trait]
pub trait PageStore: Send + Sync {
    async fn stored_html(&self, target_dir: &Path) -> Result<Option<String>>;
}

/// Default store: `index.html` inside the target directory.
pub struct DirPageStore;

#[async_trait]
impl PageStore for DirPageStore {
    async fn stored_html(&self, target_dir: &Path) -> Result<Option<String>> {
        let path = target_dir.join("index.html");
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let html = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(html))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    Fetched,
    AlreadyPresent,
    Failed,
}

/// Fetch one target's homepage into its directory. Skips the network
/// entirely when `index.html` already exists; a fetch failure is logged and
/// leaves the target pending.
pub async fn mirror_target(
    client: &reqwest::Client,
    target: &Target,
    out_root: &Path,
) -> MirrorOutcome {
    match mirror_inner(client, target, out_root).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(institution = %target.name, error = %e, "homepage fetch failed");
            MirrorOutcome::Failed
        }
    }
}

async fn mirror_inner(
    client: &reqwest::Client,
    target: &Target,
    out_root: &Path,
) -> Result<MirrorOutcome> {
    let dir = out_root.join(target.dir_name());
    let index = dir.join("index.html");
    let base_url = ensure_https(&target.base_url);

    if tokio::fs::try_exists(&index).await.unwrap_or(false) {
        // Keep base_url.txt fresh even when the page itself is kept.
        tokio::fs::write(dir.join("base_url.txt"), &base_url).await?;
        return Ok(MirrorOutcome::AlreadyPresent);
    }

    let resp = client.get(&base_url).send().await.context("request failed")?;
    if !resp.status().is_success() {
        bail!("unexpected status {}", resp.status());
    }
    let body = resp.text().await.context("reading body failed")?;

    // Already-existing directories are fine; another worker may have won.
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(&index, body).await?;
    tokio::fs::write(dir.join("base_url.txt"), &base_url).await?;
    info!(institution = %target.name, url = %base_url, "homepage stored");
    Ok(MirrorOutcome::Fetched)
}

/// Mirror every target under a bounded pool. Roster rows sharing a
/// directory name collapse to one fetch. Returns
/// (fetched, already present, failed) counts.
pub async fn mirror_all(
    client: &reqwest::Client,
    targets: &[Target],
    out_root: &Path,
    concurrency: usize,
) -> (usize, usize, usize) {
    let unique = crate::roster::dedupe_by_dir(targets);
    let outcomes = stream::iter(unique)
        .map(|target| mirror_target(client, target, out_root))
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await;
    let count = |wanted: MirrorOutcome| outcomes.iter().filter(|o| **o == wanted).count();
    (
        count(MirrorOutcome::Fetched),
        count(MirrorOutcome::AlreadyPresent),
        count(MirrorOutcome::Failed),
    )
}
