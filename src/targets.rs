//! Target list loading and validation.
//!
//! The target file is plain text with one profile URL per line. Blank lines and
//! lines starting with `#` are skipped. Every other line must parse as an
//! `http(s)` URL whose host belongs to the expected domain; anything else is
//! dropped with a warning and does not fail the run.

use std::fmt;
use std::path::Path;

use thiserror::Error;
use tokio::fs;
use tracing::{info, instrument, warn};
use url::Url;

use crate::error::TargetError;

/// A validated profile URL. The unit of work for one scrape attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
}

/// Why a line of the target file was not accepted.
#[derive(Debug, Error)]
pub enum TargetRejection {
    #[error("not a URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("host `{0}` is outside the expected domain")]
    ForeignHost(String),
}

impl Target {
    /// Parse and validate a single URL against `expected_host`.
    ///
    /// The host must equal `expected_host` or be a subdomain of it, so
    /// `www.linkedin.com` is accepted for `linkedin.com` while
    /// `notlinkedin.com` is not.
    pub fn parse(raw: &str, expected_host: &str) -> Result<Self, TargetRejection> {
        let url = Url::parse(raw.trim())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TargetRejection::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url.host_str().ok_or(TargetRejection::MissingHost)?;
        let expected = expected_host.trim_start_matches('.').to_ascii_lowercase();
        let belongs = host == expected || host.ends_with(&format!(".{expected}"));
        if !belongs {
            return Err(TargetRejection::ForeignHost(host.to_string()));
        }
        Ok(Self { url })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Identity used to join worker responses back to submitted targets.
    pub fn key(&self) -> String {
        identity_key(self.as_str())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical join key for a profile URL.
///
/// Lower-cases the host, drops a leading `www.`, the query, the fragment and
/// any trailing slash, so the URL a worker echoes back still matches the one
/// that was submitted.
pub fn identity_key(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default();
            let host = host.strip_prefix("www.").unwrap_or(host);
            format!("{}{}", host, parsed.path().trim_end_matches('/'))
        }
        Err(_) => url.trim().trim_end_matches('/').to_ascii_lowercase(),
    }
}

/// Parse target-file content, warning about and skipping rejected lines.
pub fn parse_targets(content: &str, expected_host: &str) -> Vec<Target> {
    content
        .lines()
        .map(str::trim)
        .enumerate()
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|(idx, line)| match Target::parse(line, expected_host) {
            Ok(target) => Some(target),
            Err(e) => {
                warn!(line = idx + 1, url = %line, reason = %e, "Skipping invalid URL");
                None
            }
        })
        .collect()
}

/// Read and validate the target file at `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_targets(path: &Path, expected_host: &str) -> Result<Vec<Target>, TargetError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| TargetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let targets = parse_targets(&content, expected_host);
    info!(count = targets.len(), "Loaded profile URLs");
    Ok(targets)
}
