pub mod download;
pub mod extract;
pub mod fetch;
pub mod resolve;
pub mod roster;

// --- Library API for embedding ---

/// Convenience re-exports for embedders.
pub mod prelude {
    pub use crate::download::FetchOutcome;
    pub use crate::extract::{CandidateElement, ElementKind};
    pub use crate::fetch::{MirrorOutcome, PageStore, TransportConfig};
    pub use crate::resolve::{Provider, Resolution, ResolvedMedia, Resolver};
    pub use crate::roster::Target;
    pub use crate::{Pipeline, RunSummary, TargetState};
}

use std::path::PathBuf;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use url::Url;

use crate::download::FetchOutcome;
use crate::fetch::{DirPageStore, PageStore, TransportConfig};
use crate::resolve::{Resolution, Resolver};
use crate::roster::Target;

/// Terminal state of one target for a run. Always re-derived from on-disk
/// evidence (file existence), never read from a stored status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// No stored page yet; excluded from this run.
    Pending,
    /// Every resolvable candidate was downloaded or already present.
    Downloaded,
    /// At least one resolvable candidate failed this run.
    PartiallyDownloaded,
    /// The page held no resolvable candidates.
    Skipped,
    /// Processing stopped on an unexpected error (details in the log).
    Failed,
}

/// Per-run counts of targets by terminal state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub pending: usize,
    pub downloaded: usize,
    pub partially_downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, state: TargetState) {
        match state {
            TargetState::Pending => self.pending += 1,
            TargetState::Downloaded => self.downloaded += 1,
            TargetState::PartiallyDownloaded => self.partially_downloaded += 1,
            TargetState::Skipped => self.skipped += 1,
            TargetState::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.downloaded + self.partially_downloaded + self.skipped + self.failed
    }
}

/// Async pipeline entry point. Owns the HTTP client and drives each target
/// through extraction, resolution and download.
pub struct Pipeline {
    client: reqwest::Client,
    resolver: Resolver,
    pages: Box<dyn PageStore>,
    out_root: PathBuf,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(out_root: impl Into<PathBuf>, transport: &TransportConfig) -> Result<Self> {
        let client = transport.client()?;
        Ok(Self {
            resolver: Resolver::new(client.clone()),
            client,
            pages: Box::new(DirPageStore),
            out_root: out_root.into(),
            concurrency: 4,
        })
    }

    /// Point provider config lookups at a different base URL (used by tests).
    pub fn with_player_base(mut self, base: impl Into<String>) -> Self {
        self.resolver = Resolver::with_player_base(self.client.clone(), base);
        self
    }

    /// Bound for concurrent targets and concurrent downloads within a target.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Swap the stored-page collaborator.
    pub fn with_page_store(mut self, pages: Box<dyn PageStore>) -> Self {
        self.pages = pages;
        self
    }

    /// Process every target under a bounded worker pool and summarize the
    /// terminal states. One target's failure never aborts the run.
    pub async fn run(&self, targets: &[Target]) -> RunSummary {
        tokio::fs::create_dir_all(&self.out_root).await.ok();
        // Roster rows sharing a directory name are one on-disk target; only
        // the first is scheduled, so no two workers touch the same paths.
        let unique = roster::dedupe_by_dir(targets);
        let states = stream::iter(unique)
            .map(|target| self.process_target(target))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        let mut summary = RunSummary::default();
        for state in states {
            summary.record(state);
        }
        info!(
            downloaded = summary.downloaded,
            partial = summary.partially_downloaded,
            skipped = summary.skipped,
            pending = summary.pending,
            failed = summary.failed,
            "run complete"
        );
        summary
    }

    /// Drive one target through the full extract -> resolve -> download chain.
    pub async fn process_target(&self, target: &Target) -> TargetState {
        match self.process_target_inner(target).await {
            Ok(state) => state,
            Err(e) => {
                warn!(institution = %target.name, error = %e, "target processing failed");
                TargetState::Failed
            }
        }
    }

    async fn process_target_inner(&self, target: &Target) -> Result<TargetState> {
        let dir = self.out_root.join(target.dir_name());

        // Existing snippets win over re-extraction; they are the on-disk
        // record of what this page held when it was first processed.
        let candidates = match extract::load_candidates(&dir).await? {
            Some(existing) => existing,
            None => {
                let Some(html) = self.pages.stored_html(&dir).await? else {
                    debug!(institution = %target.name, "no stored page, leaving target pending");
                    return Ok(TargetState::Pending);
                };
                let extracted = extract::extract(&html);
                extract::persist_candidates(&dir, &extracted).await?;
                extracted
            }
        };

        let resolved = self.resolver.resolve_all(&dir, &candidates).await;

        let mut ready: Vec<(String, PathBuf)> = Vec::new();
        let mut present = 0usize;
        let mut failed = 0usize;
        for item in &resolved {
            match &item.resolution {
                Resolution::Ready { url, file_name, .. } => {
                    ready.push((url.clone(), dir.join(file_name)));
                }
                Resolution::AlreadyPresent { file_name, .. } => {
                    info!(institution = %target.name, file = %file_name, "already present, skipped");
                    present += 1;
                }
                Resolution::Failed { reason, .. } => {
                    warn!(institution = %target.name, ordinal = item.ordinal, reason = %reason, "resolution failed");
                    failed += 1;
                }
                Resolution::Unsupported { src } => {
                    info!(
                        institution = %target.name,
                        ordinal = item.ordinal,
                        src = src.as_deref().unwrap_or("<none>"),
                        "skipped unsupported embed"
                    );
                }
            }
        }

        if ready.is_empty() && present == 0 && failed == 0 {
            return Ok(TargetState::Skipped);
        }

        let outcomes = stream::iter(ready)
            .map(|(url, dest)| async move {
                let outcome = download::fetch(&self.client, &url, &dest).await;
                (url, dest, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        for (url, dest, outcome) in &outcomes {
            let file = dest.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match outcome {
                FetchOutcome::Downloaded => info!(institution = %target.name, file, "downloaded"),
                FetchOutcome::SkippedExisting => {
                    info!(institution = %target.name, file, "already present, skipped")
                }
                FetchOutcome::Failed { reason } => {
                    warn!(institution = %target.name, file, url = %url, reason = %reason, "download failed")
                }
            }
        }

        failed += outcomes
            .iter()
            .filter(|(_, _, o)| matches!(o, FetchOutcome::Failed { .. }))
            .count();

        if failed > 0 {
            Ok(TargetState::PartiallyDownloaded)
        } else {
            Ok(TargetState::Downloaded)
        }
    }
}

// --- Shared pure helpers ---

/// Give a scheme-less URL an `https://` prefix; scheme-qualified URLs pass
/// through unchanged. Idempotent under repeated application.
pub fn ensure_https(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(_) => trimmed.to_string(),
        Err(_) => format!("https://{trimmed}"),
    }
}

/// Derive a filesystem-safe directory name from a display name: strip
/// everything but alphanumerics, underscores, whitespace and hyphens, then
/// turn spaces into underscores.
pub fn sanitize_dir_name(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect::<String>()
        .replace(' ', "_")
}
