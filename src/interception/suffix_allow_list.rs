// src/interception/suffix_allow_list.rs
//! Allow-list of URL suffixes that receive cross-origin isolation headers
//!
//! Matching is a literal, case-sensitive `ends_with` over the full response
//! URL, query string included.

use crate::utils::errors::{ProxyError, Result};
use tracing::{debug, info};

/// Resources that need cross-origin isolation out of the box
pub const DEFAULT_SUFFIXES: [&str; 4] = [
    "what-forth-again.html",
    "what-do-you-mean-homoiconic.html",
    "4th.worker.js",
    "lisp.worker.js",
];

/// Suffix predicate over response URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixAllowList {
    suffixes: Vec<String>,
}

impl SuffixAllowList {
    /// Build an allow-list from configured suffixes
    pub fn new<I, S>(suffixes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let suffixes: Vec<String> = suffixes.into_iter().map(Into::into).collect();

        // An empty suffix would match every URL
        if suffixes.iter().any(|s| s.is_empty()) {
            return Err(ProxyError::ConfigError(
                "Empty suffix in isolation allow-list".to_string(),
            ));
        }

        info!("Isolating {} resource suffixes", suffixes.len());
        Ok(Self { suffixes })
    }

    /// Whether `url` names an allow-listed resource
    pub fn matches(&self, url: &str) -> bool {
        let hit = self.suffixes.iter().any(|suffix| url.ends_with(suffix.as_str()));
        if hit {
            debug!("Allow-list match for {}", url);
        }
        hit
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }
}

impl Default for SuffixAllowList {
    fn default() -> Self {
        Self {
            suffixes: DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }
}
