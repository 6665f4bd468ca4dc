use std::path::Path;

use anyhow::{Context, Result};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How a candidate element references its video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    MediaTag,
    Iframe,
}

/// One extracted video-bearing fragment, keyed by its 1-based document-order
/// ordinal. The ordinal names the snippet file, so it must be deterministic
/// across runs over the same page.
#[derive(Debug, Clone)]
pub struct CandidateElement {
    pub kind: ElementKind,
    pub ordinal: usize,
    pub src: Option<String>,
    pub html: String,
}

impl CandidateElement {
    pub fn snippet_name(&self) -> String {
        format!("candidate_{}.html", self.ordinal)
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Select every `video` and `iframe` element in document order. Malformed
/// markup parses leniently; it can shrink the result, never raise.
pub fn extract(document: &str) -> Vec<CandidateElement> {
    let doc = Html::parse_document(document);
    let candidates: Vec<CandidateElement> = doc
        .select(&selector("video, iframe"))
        .enumerate()
        .map(|(i, el)| CandidateElement {
            kind: if el.value().name().eq_ignore_ascii_case("video") {
                ElementKind::MediaTag
            } else {
                ElementKind::Iframe
            },
            ordinal: i + 1,
            src: el.value().attr("src").map(str::to_string),
            html: el.html(),
        })
        .collect();
    debug!(count = candidates.len(), "extracted candidate elements");
    candidates
}

/// Persist each candidate as its own snippet file, creating the directory if
/// needed. Existing snippets are left untouched so a re-run with a changed
/// extractor cannot rewrite history.
pub async fn persist_candidates(dir: &Path, candidates: &[CandidateElement]) -> Result<()> {
    if candidates.is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir).await?;
    for candidate in candidates {
        let path = dir.join(candidate.snippet_name());
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            continue;
        }
        tokio::fs::write(&path, &candidate.html)
            .await
            .with_context(|| format!("failed to write snippet {}", path.display()))?;
        debug!(path = %path.display(), "snippet written");
    }
    Ok(())
}

/// Reload candidates from snippet files, walking ordinals from 1 until the
/// first gap. Returns `None` when no snippets exist, which tells the caller
/// to extract from the stored page instead.
pub async fn load_candidates(dir: &Path) -> Result<Option<Vec<CandidateElement>>> {
    let mut out = Vec::new();
    loop {
        let ordinal = out.len() + 1;
        let path = dir.join(format!("candidate_{ordinal}.html"));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            break;
        }
        let html = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read snippet {}", path.display()))?;
        match from_snippet(&html, ordinal) {
            Some(candidate) => out.push(candidate),
            None => {
                // A snippet that no longer parses still occupies its ordinal;
                // it will classify as unsupported downstream.
                warn!(path = %path.display(), "snippet does not parse as a candidate element");
                out.push(CandidateElement {
                    kind: ElementKind::Iframe,
                    ordinal,
                    src: None,
                    html,
                });
            }
        }
    }
    if out.is_empty() {
        Ok(None)
    } else {
        Ok(Some(out))
    }
}

fn from_snippet(html: &str, ordinal: usize) -> Option<CandidateElement> {
    let fragment = Html::parse_fragment(html);
    let el = fragment.select(&selector("video, iframe")).next()?;
    Some(CandidateElement {
        kind: if el.value().name().eq_ignore_ascii_case("video") {
            ElementKind::MediaTag
        } else {
            ElementKind::Iframe
        },
        ordinal,
        src: el.value().attr("src").map(str::to_string),
        html: el.html(),
    })
}
