use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::ensure_https;
use crate::extract::{CandidateElement, ElementKind};

/// Default base for the Vimeo player config endpoint.
pub const VIMEO_PLAYER_BASE: &str = "https://player.vimeo.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Direct,
    Vimeo,
}

/// What became of one candidate. `Unsupported` is informational;
/// `Failed` marks a resolvable candidate that could not be resolved this run
/// and counts against the target's terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready {
        provider: Provider,
        url: String,
        file_name: String,
    },
    /// Destination already on disk; nothing to resolve or fetch.
    AlreadyPresent {
        provider: Provider,
        file_name: String,
    },
    Unsupported {
        src: Option<String>,
    },
    Failed {
        provider: Provider,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub ordinal: usize,
    pub resolution: Resolution,
}

/// Markup-only classification; decides the provider arm and the identity the
/// destination filename derives from, without touching the network.
#[derive(Debug, PartialEq, Eq)]
enum Classified {
    Direct { url: String, file_name: String },
    Vimeo { id: String },
    Unsupported { src: Option<String> },
}

fn classify(candidate: &CandidateElement) -> Classified {
    let src = candidate
        .src
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match (candidate.kind, src) {
        (ElementKind::MediaTag, Some(src)) => match basename(src) {
            Some(file_name) => Classified::Direct {
                url: ensure_https(src),
                file_name,
            },
            None => Classified::Unsupported {
                src: Some(src.to_string()),
            },
        },
        (ElementKind::Iframe, Some(src)) if src.contains("vimeo.com") => match vimeo_id(src) {
            Some(id) => Classified::Vimeo { id },
            None => Classified::Unsupported {
                src: Some(src.to_string()),
            },
        },
        (_, src) => Classified::Unsupported {
            src: src.map(str::to_string),
        },
    }
}

/// Resolves candidates to fetchable media URLs. Only the Vimeo arm talks to
/// the network, and only when its destination file is not already on disk.
pub struct Resolver {
    client: reqwest::Client,
    player_base: String,
}

impl Resolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_player_base(client, VIMEO_PLAYER_BASE)
    }

    /// Point the config endpoint at a different base (used by tests).
    pub fn with_player_base(client: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            client,
            player_base: base.into(),
        }
    }

    /// Resolve every candidate of one page. Filenames are derived before any
    /// network call, so an already-downloaded item costs nothing; when two
    /// candidates derive the same name, later ones get an ordinal prefix.
    pub async fn resolve_all(
        &self,
        dir: &Path,
        candidates: &[CandidateElement],
    ) -> Vec<ResolvedMedia> {
        let mut taken: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let resolution = match classify(candidate) {
                Classified::Direct { url, file_name } => {
                    let file_name = dedupe_name(&mut taken, candidate.ordinal, file_name);
                    if dir.join(&file_name).exists() {
                        Resolution::AlreadyPresent {
                            provider: Provider::Direct,
                            file_name,
                        }
                    } else {
                        Resolution::Ready {
                            provider: Provider::Direct,
                            url,
                            file_name,
                        }
                    }
                }
                Classified::Vimeo { id } => {
                    // Synthesized from the identifier, never from response
                    // content.
                    let file_name =
                        dedupe_name(&mut taken, candidate.ordinal, format!("vimeo_{id}.mp4"));
                    if dir.join(&file_name).exists() {
                        Resolution::AlreadyPresent {
                            provider: Provider::Vimeo,
                            file_name,
                        }
                    } else {
                        match self.vimeo_progressive_url(&id).await {
                            Ok(url) => Resolution::Ready {
                                provider: Provider::Vimeo,
                                url,
                                file_name,
                            },
                            Err(e) => Resolution::Failed {
                                provider: Provider::Vimeo,
                                reason: e.to_string(),
                            },
                        }
                    }
                }
                Classified::Unsupported { src } => Resolution::Unsupported { src },
            };
            out.push(ResolvedMedia {
                ordinal: candidate.ordinal,
                resolution,
            });
        }
        out
    }

    async fn vimeo_progressive_url(&self, id: &str) -> Result<String> {
        let endpoint = format!("{}/video/{}/config", self.player_base, id);
        debug!(endpoint = %endpoint, "querying player config");
        let resp = self
            .client
            .get(&endpoint)
            .send()
            .await
            .context("config request failed")?;
        if !resp.status().is_success() {
            bail!("config endpoint returned {}", resp.status());
        }
        let config: PlayerConfig = resp
            .json()
            .await
            .context("config response did not match the expected shape")?;
        Ok(config.request.files.progressive.url)
    }
}

// Subset of the player config payload. Any missing or reshaped field is a
// deserialization error, which downgrades the one candidate to failed.
#[derive(Debug, Deserialize)]
struct PlayerConfig {
    request: ConfigRequest,
}

#[derive(Debug, Deserialize)]
struct ConfigRequest {
    files: ConfigFiles,
}

#[derive(Debug, Deserialize)]
struct ConfigFiles {
    progressive: ProgressiveFile,
}

#[derive(Debug, Deserialize)]
struct ProgressiveFile {
    url: String,
}

fn dedupe_name(taken: &mut HashSet<String>, ordinal: usize, name: String) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let prefixed = format!("candidate{ordinal}_{name}");
    taken.insert(prefixed.clone());
    prefixed
}

/// Last path component of the raw source, query and fragment stripped.
fn basename(src: &str) -> Option<String> {
    let path = src.split(['?', '#']).next().unwrap_or(src);
    let name = path.rsplit('/').next().unwrap_or(path).trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Trailing numeric path segment of a vimeo embed URL.
fn vimeo_id(src: &str) -> Option<String> {
    let url = Url::parse(&ensure_https(src)).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    (!segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()))
        .then(|| segment.to_string())
}
