//! Source adapter contract + the three listing payload shapes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use kaiqu_core::{AdmissionPolicy, RawListing, Record, TimeNormalizer};
use kaiqu_storage::{FetchError, FetchOptions, HttpFetcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub mod json;
pub mod script_call;
pub mod table;

pub use json::{JsonAdapter, JsonKeyMap};
pub use script_call::{QuoteScanner, ScanState, ScriptCallAdapter};
pub use table::TableAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadShape {
    Table,
    ScriptCall,
    Json,
}

/// Decoded payload of one source, keyed by the URL it was finally served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
        }
    }
}

/// Per-run state handed to every adapter. The clock is captured once so every
/// source resolves "today" and the current year identically.
#[derive(Debug, Clone, Copy)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub clock: TimeNormalizer,
}

impl AdapterContext {
    pub fn new(run_id: Uuid, now: DateTime<Local>) -> Self {
        Self {
            run_id,
            clock: TimeNormalizer::new(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingTarget {
    pub url: String,
    pub timeout: Option<Duration>,
    pub encoding: Option<String>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
    #[error("invalid call pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;
    fn shape(&self) -> PayloadShape;
    fn policy(&self) -> &AdmissionPolicy;

    fn request_headers(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        target: &ListingTarget,
    ) -> Result<FetchedPage, AdapterError> {
        let options = FetchOptions {
            timeout: target.timeout,
            default_encoding: target.encoding.as_deref(),
            headers: self.request_headers(),
        };
        let resp = http.fetch_text(self.source_id(), &target.url, options).await?;
        debug!(run_id = %ctx.run_id, source_id = self.source_id(), "listing fetched");
        Ok(FetchedPage::new(resp.final_url, resp.text))
    }

    /// Raw tuples in source order. Malformed elements are skipped, not reported.
    fn extract(&self, page: &FetchedPage) -> Result<Vec<RawListing>, AdapterError>;

    fn parse_listing(
        &self,
        page: &FetchedPage,
        ctx: &AdapterContext,
    ) -> Result<Vec<Record>, AdapterError> {
        let raw = self.extract(page)?;
        Ok(admit_all(self.source_id(), raw, &ctx.clock, self.policy()))
    }
}

/// Header/time/URL checks over a batch; rejected rows are dropped.
pub fn admit_all(
    source_id: &str,
    raw: Vec<RawListing>,
    clock: &TimeNormalizer,
    policy: &AdmissionPolicy,
) -> Vec<Record> {
    raw.into_iter()
        .filter_map(|listing| match Record::admit(&listing, clock, policy) {
            Ok(record) => Some(record),
            Err(rejection) => {
                debug!(source_id, url = %listing.url, %rejection, "row rejected");
                None
            }
        })
        .collect()
}

/// Adapter selection as written in the source registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum AdapterSettings {
    Table {
        #[serde(default = "table::default_row_selector")]
        row_selector: String,
    },
    ScriptCall {
        #[serde(default = "script_call::default_call_name")]
        call_name: String,
    },
    Json {
        #[serde(default)]
        keys: JsonKeyMap,
    },
}

impl AdapterSettings {
    pub fn shape(&self) -> PayloadShape {
        match self {
            AdapterSettings::Table { .. } => PayloadShape::Table,
            AdapterSettings::ScriptCall { .. } => PayloadShape::ScriptCall,
            AdapterSettings::Json { .. } => PayloadShape::Json,
        }
    }

    pub fn default_for(shape: PayloadShape) -> Self {
        match shape {
            PayloadShape::Table => AdapterSettings::Table {
                row_selector: table::default_row_selector(),
            },
            PayloadShape::ScriptCall => AdapterSettings::ScriptCall {
                call_name: script_call::default_call_name(),
            },
            PayloadShape::Json => AdapterSettings::Json {
                keys: JsonKeyMap::default(),
            },
        }
    }
}

pub fn adapter_for_source(
    source_id: &str,
    settings: &AdapterSettings,
) -> Result<Box<dyn SourceAdapter>, AdapterError> {
    Ok(match settings {
        AdapterSettings::Table { row_selector } => {
            Box::new(TableAdapter::new(source_id, row_selector)?)
        }
        AdapterSettings::ScriptCall { call_name } => {
            Box::new(ScriptCallAdapter::new(source_id, call_name)?)
        }
        AdapterSettings::Json { keys } => Box::new(JsonAdapter::new(source_id, keys.clone())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kaiqu_core::OpenTime;

    fn ctx() -> AdapterContext {
        AdapterContext::new(
            Uuid::nil(),
            Local.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).single().unwrap(),
        )
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let table: AdapterSettings = serde_json::from_str(r#"{"shape":"table"}"#).unwrap();
        assert_eq!(table, AdapterSettings::default_for(PayloadShape::Table));
        let script: AdapterSettings =
            serde_json::from_str(r#"{"shape":"script_call","call_name":"o5"}"#).unwrap();
        assert_eq!(
            script,
            AdapterSettings::ScriptCall {
                call_name: "o5".to_string()
            }
        );
        let json: AdapterSettings =
            serde_json::from_str(r#"{"shape":"json","keys":{"url":["href"]}}"#).unwrap();
        let AdapterSettings::Json { keys } = json else {
            panic!("expected json settings");
        };
        assert_eq!(keys.url, vec!["href".to_string()]);
        assert_eq!(keys.name, JsonKeyMap::default().name);
    }

    #[test]
    fn factory_builds_each_shape_with_its_policy() {
        for shape in [PayloadShape::Table, PayloadShape::ScriptCall, PayloadShape::Json] {
            let adapter = adapter_for_source("s", &AdapterSettings::default_for(shape)).unwrap();
            assert_eq!(adapter.shape(), shape);
            assert_eq!(adapter.source_id(), "s");
        }
        let table =
            adapter_for_source("s", &AdapterSettings::default_for(PayloadShape::Table)).unwrap();
        assert!(table.policy().accept_sentinel);
    }

    #[test]
    fn invalid_row_selector_is_a_configuration_error() {
        let err = adapter_for_source(
            "s",
            &AdapterSettings::Table {
                row_selector: "tr[".to_string(),
            },
        )
        .err()
        .expect("selector error");
        assert!(matches!(err, AdapterError::Selector { .. }));
    }

    #[test]
    fn admit_all_drops_rejected_rows_and_keeps_order() {
        let ctx = ctx();
        let rows = vec![
            RawListing {
                url: "http://b.example".into(),
                time_text: "1760900000".into(),
                ..Default::default()
            },
            RawListing {
                url: "".into(),
                time_text: "1760900000".into(),
                ..Default::default()
            },
            RawListing {
                url: "http://a.example".into(),
                time_text: "1760900001".into(),
                ..Default::default()
            },
        ];
        let records = admit_all("s", rows, &ctx.clock, &AdmissionPolicy::table());
        let urls: Vec<_> = records.iter().map(|r| r.url()).collect();
        assert_eq!(urls, vec!["http://b.example", "http://a.example"]);
        assert_eq!(records[1].open_time(), &OpenTime::Scheduled(1_760_900_001));
    }
}
