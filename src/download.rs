use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Outcome of one idempotent fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded,
    SkippedExisting,
    Failed { reason: String },
}

/// Fetch `url` into `dest` unless `dest` already exists. The existence check
/// runs before any connection attempt, and a failure never leaves a partial
/// destination file behind.
pub async fn fetch(client: &reqwest::Client, url: &str, dest: &Path) -> FetchOutcome {
    if tokio::fs::try_exists(dest).await.unwrap_or(false) {
        debug!(dest = %dest.display(), "destination exists, skipping fetch");
        return FetchOutcome::SkippedExisting;
    }
    match try_fetch(client, url, dest).await {
        Ok(()) => FetchOutcome::Downloaded,
        Err(e) => {
            warn!(url, error = %e, "fetch failed");
            FetchOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

async fn try_fetch(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    let resp = client.get(url).send().await.context("request failed")?;
    if !resp.status().is_success() {
        bail!("unexpected status {}", resp.status());
    }
    let bytes = resp.bytes().await.context("reading body failed")?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Exclusively create a uniquely named sidecar and rename it into place,
    // so the destination only ever appears complete and two workers can
    // never interleave writes on the same path.
    let tmp = part_path(dest);
    let result: Result<()> = async {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .await
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, dest)
            .await
            .with_context(|| format!("failed to move {} into place", tmp.display()))?;
        Ok(())
    }
    .await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
        return result;
    }
    debug!(dest = %dest.display(), bytes = bytes.len(), "media stored");
    Ok(())
}

// Unique within the process even when the clock is coarse.
fn part_path(dest: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download");
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    dest.with_file_name(format!("{name}.{nonce:x}{seq}.part"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::TransportConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> reqwest::Client {
        TransportConfig::default().client().unwrap()
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn successful_fetch_writes_destination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"VIDEO".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clip.mp4");
        let outcome = fetch(&client(), &format!("{}/clip.mp4", server.uri()), &dest).await;
        assert_eq!(outcome, FetchOutcome::Downloaded);
        assert_eq!(std::fs::read(&dest).unwrap(), b"VIDEO");
        // No sidecar lingers next to the destination.
        assert_eq!(entries(dir.path()), vec!["clip.mp4".to_string()]);
    }

    #[tokio::test]
    async fn existing_destination_skips_without_network() {
        let server = MockServer::start().await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clip.mp4");
        std::fs::write(&dest, b"OLD").unwrap();

        let outcome = fetch(&client(), &format!("{}/clip.mp4", server.uri()), &dest).await;
        assert_eq!(outcome, FetchOutcome::SkippedExisting);
        assert_eq!(std::fs::read(&dest).unwrap(), b"OLD");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_success_status_fails_and_leaves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clip.mp4");
        let outcome = fetch(&client(), &format!("{}/clip.mp4", server.uri()), &dest).await;
        assert!(matches!(outcome, FetchOutcome::Failed { .. }));
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn transport_error_is_scoped_to_the_item() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clip.mp4");
        // Nothing listens on this port.
        let outcome = fetch(&client(), "http://127.0.0.1:9/clip.mp4", &dest).await;
        assert!(matches!(outcome, FetchOutcome::Failed { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn concurrent_fetches_of_one_destination_never_interleave() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'A'; 4096]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'B'; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clip.mp4");
        let c = client();
        let url_a = format!("{}/a.bin", server.uri());
        let url_b = format!("{}/b.bin", server.uri());
        futures::join!(
            fetch(&c, &url_a, &dest),
            fetch(&c, &url_b, &dest),
        );

        // Whichever rename won, the destination is one complete body and no
        // sidecar survives.
        let body = std::fs::read(&dest).unwrap();
        assert!(body == vec![b'A'; 4096] || body == vec![b'B'; 4096]);
        assert_eq!(entries(dir.path()), vec!["clip.mp4".to_string()]);
    }
}
