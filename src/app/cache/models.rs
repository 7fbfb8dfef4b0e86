//! Row and outcome types of the resolution cache

use serde::Serialize;
use url::Url;

use crate::constants::cache::BLOCKED_COUNTRY_SEPARATOR;

pub(crate) const FLAG_PASS: &str = "PASS";
pub(crate) const FLAG_SKIP: &str = "SKIP";

/// Cached result of probing for a file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "outcome", rename_all = "UPPERCASE")]
pub enum Outcome {
    /// The mirror held the file at last probe
    Pass { mirror: String },
    /// A full tiered search for requesters of `country` found no mirror
    Skip { country: String },
}

impl Outcome {
    pub fn pass(mirror: impl Into<String>) -> Self {
        Self::Pass {
            mirror: mirror.into(),
        }
    }

    pub fn skip(country: impl Into<String>) -> Self {
        Self::Skip {
            country: country.into(),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Outcome::Skip { .. })
    }
}

/// A cached link to a file on a mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLink {
    pub url: Url,
    pub mirror: String,
}

/// Mirror registry row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct MirrorRow {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub continent: String,
    pub country: String,
    pub blocked_countries: String,
}

impl MirrorRow {
    /// Whether requesters from `country` must not be sent to this mirror
    pub fn blocks(&self, country: &str) -> bool {
        split_blocked(&self.blocked_countries).any(|c| c == country)
    }

    /// Decoded blocked country list
    pub fn blocked(&self) -> Vec<String> {
        split_blocked(&self.blocked_countries)
            .map(str::to_string)
            .collect()
    }
}

/// Record row joined with its mirror name
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct RecordRow {
    pub flag: String,
    pub mirror: Option<String>,
    pub country: Option<String>,
}

pub(crate) fn join_blocked<'a>(countries: impl IntoIterator<Item = &'a String>) -> String {
    countries
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(BLOCKED_COUNTRY_SEPARATOR)
}

fn split_blocked(stored: &str) -> impl Iterator<Item = &str> {
    stored
        .split(BLOCKED_COUNTRY_SEPARATOR)
        .map(str::trim)
        .filter(|c| !c.is_empty())
}
