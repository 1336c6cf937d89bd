//! Canonical listing record and the admission pipeline shared by every source.

use std::fmt;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod header;
pub mod time;

pub use header::is_header_row;
pub use time::{TimeNormalizer, TimeProfile, TimeResolution};

/// Tolerance window applied by sources whose timestamps are known to drift.
pub const DEFAULT_TOLERANCE_DAYS: i64 = 30;

const HTTP_SCHEMES: &[&str] = &["http://", "https://"];

/// Raw seven-field tuple extracted by an adapter before any validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub name: String,
    pub url: String,
    pub category: String,
    pub time_text: String,
    pub min_spend: String,
    pub description: String,
    pub features: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenTime {
    /// Unix seconds, always positive.
    Scheduled(i64),
    /// Promotional label carried verbatim.
    Sentinel(String),
}

impl OpenTime {
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            OpenTime::Scheduled(ts) => Some(*ts),
            OpenTime::Sentinel(_) => None,
        }
    }
}

impl fmt::Display for OpenTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenTime::Scheduled(ts) => write!(f, "{ts}"),
            OpenTime::Sentinel(label) => f.write_str(label),
        }
    }
}

/// Identity of a listing: same canonical URL opening at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub url: String,
    pub open_time: OpenTime,
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.url, self.open_time)
    }
}

/// Canonical normalized listing. Only obtainable through [`Record::admit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    name: String,
    url: String,
    category: String,
    open_time: OpenTime,
    min_spend: String,
    description: String,
    features: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedTime {
    Reject,
    UseNow,
}

/// Per-source admission rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionPolicy {
    pub time_profile: TimeProfile,
    /// Keep sentinel labels as the open time instead of treating them as unresolved.
    pub accept_sentinel: bool,
    pub unresolved: UnresolvedTime,
    /// Timestamps further than this from now (or non-positive) are reset to now.
    pub tolerance: Option<TimeDelta>,
    /// Prefixed to URLs that carry no scheme at all.
    pub default_scheme: Option<&'static str>,
    pub min_url_len: usize,
}

impl AdmissionPolicy {
    /// Markup tables: sentinel rows are listings, anything else must resolve.
    pub fn table() -> Self {
        Self {
            time_profile: TimeProfile::Listing,
            accept_sentinel: true,
            unresolved: UnresolvedTime::Reject,
            tolerance: None,
            default_scheme: None,
            min_url_len: 1,
        }
    }

    /// Script-call listings never drop a row for its time; they reset it.
    pub fn script_call() -> Self {
        Self {
            time_profile: TimeProfile::Listing,
            accept_sentinel: false,
            unresolved: UnresolvedTime::UseNow,
            tolerance: Some(TimeDelta::days(DEFAULT_TOLERANCE_DAYS)),
            default_scheme: None,
            min_url_len: 5,
        }
    }

    /// JSON feed entries routinely omit the scheme and sometimes the time.
    pub fn feed() -> Self {
        Self {
            time_profile: TimeProfile::Feed,
            accept_sentinel: false,
            unresolved: UnresolvedTime::UseNow,
            tolerance: None,
            default_scheme: Some("http://"),
            min_url_len: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("row looks like a table header")]
    HeaderRow,
    #[error("missing url")]
    MissingUrl,
    #[error("url too short: {0}")]
    MalformedUrl(String),
    #[error("url has no http(s) scheme: {0}")]
    Schemeless(String),
    #[error("open time could not be resolved: {0}")]
    UnresolvedTime(String),
    #[error("open time is not positive: {0}")]
    NonPositiveTime(i64),
}

impl Record {
    /// Runs the header, URL and time checks on one raw tuple.
    pub fn admit(
        raw: &RawListing,
        clock: &TimeNormalizer,
        policy: &AdmissionPolicy,
    ) -> Result<Self, Rejection> {
        if is_header_row(raw) {
            return Err(Rejection::HeaderRow);
        }

        let url = raw.url.trim();
        if url.is_empty() {
            return Err(Rejection::MissingUrl);
        }
        if url.chars().count() < policy.min_url_len {
            return Err(Rejection::MalformedUrl(url.to_string()));
        }
        let url = match policy.default_scheme {
            Some(scheme) if !url.contains("://") => format!("{scheme}{url}"),
            _ => url.to_string(),
        };
        let url = canonicalize_url(&url);
        if !has_http_scheme(&url) {
            return Err(Rejection::Schemeless(url));
        }

        let open_time = resolve_open_time(&raw.time_text, clock, policy)?;

        Ok(Self {
            name: raw.name.clone(),
            url,
            category: raw.category.clone(),
            open_time,
            min_spend: raw.min_spend.clone(),
            description: raw.description.clone(),
            features: raw.features.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn open_time(&self) -> &OpenTime {
        &self.open_time
    }

    pub fn min_spend(&self) -> &str {
        &self.min_spend
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn features(&self) -> &str {
        &self.features
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            url: self.url.clone(),
            open_time: self.open_time.clone(),
        }
    }
}

fn resolve_open_time(
    text: &str,
    clock: &TimeNormalizer,
    policy: &AdmissionPolicy,
) -> Result<OpenTime, Rejection> {
    let now = clock.now().timestamp();
    match clock.resolve(text, policy.time_profile) {
        TimeResolution::Sentinel(text) if policy.accept_sentinel => Ok(OpenTime::Sentinel(text)),
        TimeResolution::Sentinel(text) | TimeResolution::Unparsed(text) => match policy.unresolved {
            UnresolvedTime::Reject => Err(Rejection::UnresolvedTime(text)),
            UnresolvedTime::UseNow => Ok(OpenTime::Scheduled(now)),
        },
        TimeResolution::Timestamp(ts) => match policy.tolerance {
            Some(window) if ts <= 0 || (ts - now).abs() > window.num_seconds() => {
                Ok(OpenTime::Scheduled(now))
            }
            _ if ts <= 0 => Err(Rejection::NonPositiveTime(ts)),
            _ => Ok(OpenTime::Scheduled(ts)),
        },
    }
}

/// Strips the query string and fragment.
pub fn canonicalize_url(url: &str) -> String {
    let without_query = url.split('?').next().unwrap_or_default();
    without_query.split('#').next().unwrap_or_default().to_string()
}

pub fn has_http_scheme(url: &str) -> bool {
    HTTP_SCHEMES.iter().any(|scheme| {
        url.get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}
