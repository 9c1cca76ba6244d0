//! Nagios XI update check
//!
//! Nagios publishes every XI release on a plain HTML page. The first text
//! node on that page beginning with `xi-` is the most recent release; this
//! module fetches the page, finds that node and compares it against the
//! version the XI API reports as installed.

use std::{cmp::Ordering, time::Duration};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Page listing every published Nagios XI release, newest first.
pub const DEFAULT_VERSIONS_URI: &str = "https://assets.nagios.com/downloads/nagiosxi/versions.php";

const RELEASE_PREFIX: &str = "xi-";

const USER_AGENT: &str = concat!("nagios_exporter/", env!("CARGO_PKG_VERSION"));

static TEXT_NODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r">([^<]+)<").expect("Invalid regex pattern provided"));
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("Invalid regex pattern provided"));

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`check`]
pub enum Error {
    /// The versions page could not be fetched.
    #[error("Failed to fetch the Nagios XI versions page: {0}")]
    Request(#[from] reqwest::Error),
    /// The versions page answered with a non-success status.
    #[error("Nagios XI versions page responded with status {0}")]
    Status(reqwest::StatusCode),
    /// No release could be found on the versions page.
    #[error("No Nagios XI release found on the versions page")]
    NoRelease,
}

/// Configuration for the update check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Page listing published XI releases
    pub versions_uri: String,
    /// Timeout for fetching that page
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            versions_uri: DEFAULT_VERSIONS_URI.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of an update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    /// Version reported by the XI API
    pub installed: String,
    /// Newest published release, without the `xi-` prefix
    pub latest: String,
    /// Whether `latest` is newer than `installed`
    pub available: bool,
}

/// Find the newest release named in the versions page `html`.
///
/// Returns the first text node that starts with `xi-`, prefix included.
#[must_use]
pub fn latest_release(html: &str) -> Option<&str> {
    TEXT_NODE
        .captures_iter(html)
        .filter_map(|cap| cap.get(1))
        .map(|text| text.as_str().trim())
        .find(|text| text.starts_with(RELEASE_PREFIX))
}

fn components(version: &str) -> Vec<u64> {
    // Only digit runs match, so a parse can fail only by overflowing.
    NUMBER
        .find_iter(version)
        .map(|m| m.as_str().parse().unwrap_or(u64::MAX))
        .collect()
}

/// Compare two release strings numerically, component by component. Missing
/// trailing components count as zero, so `5.9` equals `5.9.0`.
#[must_use]
pub fn compare_versions(lhs: &str, rhs: &str) -> Ordering {
    let lhs = components(lhs.trim_start_matches(RELEASE_PREFIX));
    let rhs = components(rhs.trim_start_matches(RELEASE_PREFIX));
    let len = lhs.len().max(rhs.len());
    for idx in 0..len {
        let l = lhs.get(idx).copied().unwrap_or(0);
        let r = rhs.get(idx).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// Build the client used for [`check`]. Certificates are always verified.
///
/// # Errors
///
/// Returns an error if no TLS backend is available.
pub fn client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().user_agent(USER_AGENT).build()
}

/// Fetch the versions page and compare its newest release with `installed`.
///
/// # Errors
///
/// Returns an error if the page cannot be fetched or names no release.
pub async fn check(
    client: &reqwest::Client,
    config: &Config,
    installed: &str,
) -> Result<UpdateInfo, Error> {
    let resp = client
        .get(&config.versions_uri)
        .timeout(config.timeout)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Status(status));
    }
    let html = resp.text().await?;

    let latest = latest_release(&html).ok_or(Error::NoRelease)?;
    let latest = latest.trim_start_matches(RELEASE_PREFIX).to_string();
    debug!("Latest published Nagios XI release: {latest}, installed: {installed}");

    Ok(UpdateInfo {
        installed: installed.to_string(),
        available: compare_versions(&latest, installed) == Ordering::Greater,
        latest,
    })
}
