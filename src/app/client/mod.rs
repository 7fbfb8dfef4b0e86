//! Mirror client: liveness probes, index fetches and URL resolution
//!
//! The resolver, the orchestrator and the health monitor only ever talk to
//! mirrors through the [`MirrorProbe`] trait, so the network can be swapped for
//! a scripted fake in tests.
//!
//! The module is organized into specialized components:
//! - `config`: HTTP client configuration and building
//! - `http`: reqwest-backed probe with rate limiting and bounded timeouts

use async_trait::async_trait;
use url::Url;

use crate::errors::{ProbeError, ProbeResult};

pub mod config;
pub mod http;

pub use config::ClientConfig;
pub use http::HttpProbe;

/// Network capability used to check mirrors
#[async_trait]
pub trait MirrorProbe: Send + Sync {
    /// Issue a liveness probe (HEAD) and return the response status code
    ///
    /// # Errors
    ///
    /// Returns `ProbeError` on transport failure or timeout
    async fn head(&self, url: &Url) -> ProbeResult<u16>;

    /// Fetch a small text artifact (the mirror index)
    ///
    /// # Errors
    ///
    /// Returns `ProbeError` on transport failure, timeout or non-success status
    async fn fetch_text(&self, url: &Url) -> ProbeResult<String>;
}

/// Parse a mirror base URL so that it always denotes a directory
pub fn normalize_base_url(base: &str) -> ProbeResult<Url> {
    let mut url = Url::parse(base.trim()).map_err(|e| ProbeError::InvalidUrl {
        url: base.to_string(),
        error: e.to_string(),
    })?;

    if url.cannot_be_a_base() {
        return Err(ProbeError::InvalidUrl {
            url: base.to_string(),
            error: "URL cannot be a base".to_string(),
        });
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Resolve a repository-relative path against a mirror base URL
///
/// This is standard URL-reference resolution, so duplicate separators and
/// dot segments are normalized rather than concatenated.
pub fn resolve_link(base: &Url, path: &str) -> ProbeResult<Url> {
    let base = if base.path().ends_with('/') {
        base.clone()
    } else {
        normalize_base_url(base.as_str())?
    };

    let relative = escape_path(path.trim_start_matches('/'));
    // "./" keeps a first segment containing ':' from reading as a scheme
    base.join(&format!("./{}", relative))
        .map_err(|e| ProbeError::InvalidUrl {
            url: format!("{}{}", base, relative),
            error: e.to_string(),
        })
}

/// Escape the characters `Url::join` would not take literally in a file name
fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '?' => escaped.push_str("%3F"),
            '#' => escaped.push_str("%23"),
            _ => escaped.push(c),
        }
    }
    escaped
}
