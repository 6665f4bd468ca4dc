use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::{ensure_https, sanitize_dir_name};

/// One institution under crawl. Immutable once loaded from the roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub base_url: String,
}

impl Target {
    /// Filesystem-safe directory name derived from the display name.
    pub fn dir_name(&self) -> String {
        sanitize_dir_name(&self.name)
    }
}

/// Row shape shared by the survey file and the derived roster. Unknown
/// survey columns are ignored during deserialization.
#[derive(Debug, Serialize, Deserialize)]
struct RosterRow {
    #[serde(rename = "WEBADDR")]
    web_addr: String,
    #[serde(rename = "INSTNM")]
    name: String,
}

/// Build the roster CSV from the raw institution survey file, keeping only
/// addresses on an `edu` host. No-op when the roster already exists.
pub fn build_roster(survey_csv: &Path, roster_csv: &Path) -> Result<usize> {
    if roster_csv.exists() {
        info!(path = %roster_csv.display(), "roster already exists, skipping build");
        return Ok(0);
    }

    let raw = std::fs::read(survey_csv)
        .with_context(|| format!("failed to read survey file {}", survey_csv.display()))?;
    let text = decode_latin1(&raw);

    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let mut writer = csv::Writer::from_path(roster_csv)
        .with_context(|| format!("failed to create roster {}", roster_csv.display()))?;

    let mut kept = 0usize;
    for row in reader.deserialize::<RosterRow>() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "skipping malformed survey row");
                continue;
            }
        };
        if row.web_addr.trim().is_empty() {
            continue;
        }
        let full_url = ensure_https(&row.web_addr);
        if !is_edu_host(&full_url) {
            debug!(url = %full_url, "skipping non-edu address");
            continue;
        }
        writer.serialize(RosterRow {
            web_addr: full_url,
            name: row.name.trim().to_string(),
        })?;
        kept += 1;
    }
    writer.flush()?;
    info!(count = kept, path = %roster_csv.display(), "roster written");
    Ok(kept)
}

/// Load the roster into targets. An unreadable roster is the one condition
/// that aborts a run, so errors here carry full context.
pub fn load_roster(roster_csv: &Path) -> Result<Vec<Target>> {
    let mut reader = csv::Reader::from_path(roster_csv)
        .with_context(|| format!("cannot read roster {}", roster_csv.display()))?;
    let mut targets = Vec::new();
    for row in reader.deserialize::<RosterRow>() {
        let row = row.context("malformed roster row")?;
        if row.web_addr.trim().is_empty() {
            continue;
        }
        targets.push(Target {
            name: row.name.trim().to_string(),
            base_url: ensure_https(&row.web_addr),
        });
    }
    Ok(targets)
}

/// Collapse roster entries whose display names sanitize to the same
/// directory; the first occurrence wins. Two such entries are the same
/// on-disk target, and scheduling both would race on its files.
pub fn dedupe_by_dir(targets: &[Target]) -> Vec<&Target> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(targets.len());
    for target in targets {
        if seen.insert(target.dir_name()) {
            unique.push(target);
        } else {
            debug!(institution = %target.name, "duplicate directory name, skipping");
        }
    }
    unique
}

/// The survey data is latin-1; every byte maps 1:1 to its code point.
fn decode_latin1(raw: &[u8]) -> String {
    raw.iter().map(|&b| b as char).collect()
}

fn is_edu_host(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == "edu" || h.ends_with(".edu")))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edu_hosts_are_recognized() {
        assert!(is_edu_host("https://www.example.edu"));
        assert!(is_edu_host("https://example.edu/path"));
        assert!(!is_edu_host("https://example.com"));
        assert!(!is_edu_host("https://edu.example.org"));
        assert!(!is_edu_host("not a url"));
    }

    #[test]
    fn build_filters_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let survey = dir.path().join("survey.csv");
        let roster = dir.path().join("crawler.csv");
        std::fs::write(
            &survey,
            "UNITID,INSTNM,WEBADDR,STATE\n\
             1,Example College,www.example.edu,XX\n\
             2,Com Site,www.example.com,XX\n\
             3,No Address,,XX\n",
        )
        .unwrap();

        let kept = build_roster(&survey, &roster).unwrap();
        assert_eq!(kept, 1);

        let targets = load_roster(&roster).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "Example College");
        assert_eq!(targets[0].base_url, "https://www.example.edu");
        assert_eq!(targets[0].dir_name(), "Example_College");
    }

    #[test]
    fn build_is_idempotent_when_roster_exists() {
        let dir = tempfile::tempdir().unwrap();
        let survey = dir.path().join("survey.csv");
        let roster = dir.path().join("crawler.csv");
        std::fs::write(&survey, "INSTNM,WEBADDR\nExample College,www.example.edu\n").unwrap();

        build_roster(&survey, &roster).unwrap();
        let first = std::fs::read_to_string(&roster).unwrap();

        // Second build must not touch the existing roster.
        let kept = build_roster(&survey, &roster).unwrap();
        assert_eq!(kept, 0);
        assert_eq!(std::fs::read_to_string(&roster).unwrap(), first);
    }

    #[test]
    fn latin1_survey_bytes_survive_into_names() {
        let dir = tempfile::tempdir().unwrap();
        let survey = dir.path().join("survey.csv");
        let roster = dir.path().join("crawler.csv");
        // 0xE9 is latin-1 for e-acute.
        std::fs::write(
            &survey,
            b"INSTNM,WEBADDR\nJos\xe9 State College,www.jose.edu\n",
        )
        .unwrap();

        build_roster(&survey, &roster).unwrap();
        let targets = load_roster(&roster).unwrap();
        assert_eq!(targets[0].name, "Jos\u{e9} State College");
        assert_eq!(targets[0].dir_name(), "Jos\u{e9}_State_College");
    }

    #[test]
    fn duplicate_directory_names_collapse_to_one_target() {
        let targets = vec![
            Target {
                name: "Example College".to_string(),
                base_url: "https://a.example.edu".to_string(),
            },
            Target {
                name: " Example College ".to_string(),
                base_url: "https://b.example.edu".to_string(),
            },
            Target {
                name: "Other College".to_string(),
                base_url: "https://c.example.edu".to_string(),
            },
        ];
        let unique = dedupe_by_dir(&targets);
        assert_eq!(unique.len(), 2);
        // The first occurrence wins.
        assert_eq!(unique[0].base_url, "https://a.example.edu");
        assert_eq!(unique[1].name, "Other College");
    }

    #[test]
    fn missing_roster_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_roster(&dir.path().join("missing.csv")).is_err());
    }
}
