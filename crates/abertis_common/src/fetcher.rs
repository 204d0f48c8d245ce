//! Remote fetcher - directory listings and streamed downloads
//!
//! The listing endpoint is a GitHub "contents" API: a JSON array of entries
//! with `name` and `download_url`. Release archives embed their date in the
//! file name; the newest one wins.

use crate::error::FetchError;
use crate::file_installer::part_path;
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// One entry of a directory listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingEntry {
    pub name: String,
    /// Null for directories
    #[serde(default)]
    pub download_url: Option<String>,
}

/// A release selected from a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteCandidate {
    pub name: String,
    pub date: Option<NaiveDate>,
    pub download_url: String,
}

impl RemoteCandidate {
    /// Date for display, or "unknown"
    pub fn version_label(&self, date_format: &str) -> String {
        self.date
            .map(|d| d.format(date_format).to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Compile a release name pattern (case-insensitive, group 1 = date token)
pub fn compile_pattern(pattern: &str) -> Result<Regex, FetchError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| FetchError::InvalidPattern(e.to_string()))
}

/// Pick the newest entry matching `pattern`.
///
/// A parseable date always beats an unparseable one. If no matching date
/// parses, the first match wins. Equal dates keep the earlier entry.
pub fn select_latest(
    entries: &[ListingEntry],
    pattern: &Regex,
    date_format: &str,
) -> Result<RemoteCandidate, FetchError> {
    let mut best: Option<RemoteCandidate> = None;

    for entry in entries {
        let Some(captures) = pattern.captures(&entry.name) else {
            continue;
        };
        let Some(url) = entry.download_url.as_deref().filter(|u| !u.is_empty()) else {
            debug!("Skipping {}: no download url", entry.name);
            continue;
        };
        let date = captures
            .get(1)
            .and_then(|m| NaiveDate::parse_from_str(m.as_str(), date_format).ok());

        let replace = match (&best, date) {
            (None, _) => true,
            (Some(current), Some(date)) => match current.date {
                Some(best_date) => date > best_date,
                None => true,
            },
            (Some(_), None) => false,
        };

        if replace {
            best = Some(RemoteCandidate {
                name: entry.name.clone(),
                date,
                download_url: url.to_string(),
            });
        }
    }

    best.ok_or_else(|| FetchError::NoMatch(pattern.as_str().to_string()))
}

/// Remote operations the sequencer needs
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Stream `url` into `destination`, visible only once complete
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        timeout_secs: u64,
    ) -> Result<u64, FetchError>;

    /// Newest listing entry matching `name_pattern`
    async fn find_latest(
        &self,
        listing_url: &str,
        name_pattern: &str,
        date_format: &str,
    ) -> Result<RemoteCandidate, FetchError>;
}

/// reqwest-backed fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    user_agent: String,
    listing_timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(listing_timeout_secs: u64) -> Self {
        Self {
            user_agent: format!("abertis-installer/{}", env!("CARGO_PKG_VERSION")),
            listing_timeout_secs,
        }
    }

    fn client(&self, timeout_secs: u64) -> Result<reqwest::Client, FetchError> {
        reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        timeout_secs: u64,
    ) -> Result<u64, FetchError> {
        info!("Downloading {}", url);
        let client = self.client(timeout_secs)?;
        let mut response = client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, timeout_secs))?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part = part_path(destination);
        let streamed: Result<u64, FetchError> = async {
            let mut file = tokio::fs::File::create(&part).await?;
            let mut written = 0u64;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| FetchError::from_reqwest(e, timeout_secs))?
            {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(written)
        }
        .await;

        let installed = match streamed {
            Ok(written) => tokio::fs::rename(&part, destination)
                .await
                .map(|_| written)
                .map_err(FetchError::from),
            Err(e) => Err(e),
        };

        match installed {
            Ok(written) => {
                info!("Downloaded {} bytes to {}", written, destination.display());
                Ok(written)
            }
            Err(e) => {
                warn!("Download of {} failed: {}", url, e);
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn find_latest(
        &self,
        listing_url: &str,
        name_pattern: &str,
        date_format: &str,
    ) -> Result<RemoteCandidate, FetchError> {
        let pattern = compile_pattern(name_pattern)?;
        let client = self.client(self.listing_timeout_secs)?;
        let response = client
            .get(listing_url)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.listing_timeout_secs))?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                status: response.status().as_u16(),
                url: listing_url.to_string(),
            });
        }

        let entries: Vec<ListingEntry> = response
            .json()
            .await
            .map_err(|e| FetchError::InvalidListing(e.to_string()))?;
        debug!("Listing returned {} entries", entries.len());

        let candidate = select_latest(&entries, &pattern, date_format)?;
        info!(
            "Latest release: {} ({})",
            candidate.name,
            candidate.version_label(date_format)
        );
        Ok(candidate)
    }
}
