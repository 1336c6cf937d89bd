//! One ingestion run: fetch every configured source, admit, dedup, render, write.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use kaiqu_adapters::{
    adapter_for_source, admit_all, AdapterContext, AdapterSettings, FetchedPage, ListingTarget,
    PayloadShape, SourceAdapter,
};
use kaiqu_core::DedupKey;
use kaiqu_storage::{HttpClientConfig, HttpFetcher, OutputStore, DEFAULT_USER_AGENT};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod dedup;
pub mod render;

pub use dedup::{DedupOutcome, Deduplicator, SourcedRecord};
pub use render::{render_lines, render_markdown};

pub const DEFAULT_SOURCES_FILE: &str = "sources.yaml";
pub const DEFAULT_OUTPUT_DIR: &str = "data";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub sources_path: PathBuf,
    pub output_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let workspace_root = std::env::var("KAIQU_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        Self {
            sources_path: std::env::var("KAIQU_SOURCES")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOURCES_FILE)),
            output_dir: std::env::var("KAIQU_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            user_agent: std::env::var("KAIQU_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: std::env::var("KAIQU_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            workspace_root,
        }
    }

    /// Relative paths are taken from the workspace root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub url: String,
    /// Charset used when the response does not declare one.
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    pub adapter: AdapterSettings,
}

impl SourceConfig {
    fn new(source_id: &str, url: &str, shape: PayloadShape) -> Self {
        Self {
            source_id: source_id.to_string(),
            display_name: None,
            enabled: true,
            url: url.to_string(),
            encoding: None,
            timeout_secs: None,
            adapter: AdapterSettings::default_for(shape),
        }
    }

    pub fn target(&self) -> ListingTarget {
        ListingTarget {
            url: self.url.clone(),
            timeout: self.timeout_secs.map(Duration::from_secs),
            encoding: self.encoding.clone(),
        }
    }
}

/// Which retained records go into a filtered line document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OutputFilter {
    /// Canonical URL contains the needle.
    UrlContains(String),
    /// Dedup key was produced by this source, whichever source's record was retained.
    Source(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredOutput {
    pub file_name: String,
    pub filter: OutputFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub title: String,
    pub markdown_file: String,
    pub lines_file: String,
    pub filtered: Vec<FilteredOutput>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            title: "开区信息采集结果".to_string(),
            markdown_file: "9pk.md".to_string(),
            lines_file: "9pk_lines.txt".to_string(),
            filtered: vec![
                FilteredOutput {
                    file_name: "30ok.txt".to_string(),
                    filter: OutputFilter::Source("api".to_string()),
                },
                FilteredOutput {
                    file_name: "jjj.txt".to_string(),
                    filter: OutputFilter::UrlContains("jjj.com".to_string()),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub outputs: OutputConfig,
}

impl SourceRegistry {
    /// The listing pages and feed the collector was first built against.
    pub fn builtin() -> Self {
        let mut jjj = SourceConfig::new("jjj", "https://jjj.com", PayloadShape::ScriptCall);
        jjj.encoding = Some("gb2312".to_string());
        let mut api = SourceConfig::new(
            "api",
            "https://k-4-5.fhjkwerv.com:9001/api/gameAd/getList",
            PayloadShape::Json,
        );
        api.timeout_secs = Some(15);
        Self {
            sources: vec![
                SourceConfig::new("9pk", "https://zhaosf.aitingshuchang.com/", PayloadShape::Table),
                SourceConfig::new(
                    "9pk-2",
                    "https://zhaosf.aitingshuchang.com/index2.html",
                    PayloadShape::Table,
                ),
                jjj,
                api,
            ],
            outputs: OutputConfig::default(),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    /// A missing file means the built-in registry; an unreadable or malformed one is an error.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(text) => {
                Self::from_yaml(&text).with_context(|| format!("loading {}", path.display()))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no source registry file, using built-in sources");
                Ok(Self::builtin())
            }
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    FetchFailed(String),
    ParseFailed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub url: String,
    pub status: SourceStatus,
    pub extracted: usize,
    pub admitted: usize,
}

impl SourceReport {
    fn new(source_id: &str, url: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            url: url.to_string(),
            status: SourceStatus::Ok,
            extracted: 0,
            admitted: 0,
        }
    }
}

/// Extract and admit one fetched payload. Extraction failures leave the source empty.
pub fn ingest_page(
    adapter: &dyn SourceAdapter,
    page: &FetchedPage,
    ctx: &AdapterContext,
) -> (Vec<SourcedRecord>, SourceReport) {
    let mut report = SourceReport::new(adapter.source_id(), &page.url);
    let raw = match adapter.extract(page) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(
                run_id = %ctx.run_id,
                source_id = adapter.source_id(),
                error = %err,
                "payload could not be parsed"
            );
            report.status = SourceStatus::ParseFailed(err.to_string());
            return (Vec::new(), report);
        }
    };
    report.extracted = raw.len();
    let admitted = admit_all(adapter.source_id(), raw, &ctx.clock, adapter.policy());
    let records: Vec<SourcedRecord> = admitted
        .into_iter()
        .map(|record| SourcedRecord {
            source_id: adapter.source_id().to_string(),
            record,
        })
        .collect();
    report.admitted = records.len();
    (records, report)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDocument {
    pub file_name: String,
    pub body: String,
}

fn filter_matches(
    filter: &OutputFilter,
    item: &SourcedRecord,
    source_keys: &HashSet<DedupKey>,
) -> bool {
    match filter {
        OutputFilter::UrlContains(needle) => item.record.url().contains(needle.as_str()),
        OutputFilter::Source(_) => source_keys.contains(&item.record.dedup_key()),
    }
}

/// Every payload of a run, rendered in memory. Filtered documents with no matching
/// record are left out.
pub fn build_documents(
    outputs: &OutputConfig,
    candidates: &[SourcedRecord],
    retained: &[SourcedRecord],
    captured_at: DateTime<Local>,
) -> Vec<OutputDocument> {
    let records = retained.iter().map(|item| &item.record);
    let mut docs = vec![
        OutputDocument {
            file_name: outputs.markdown_file.clone(),
            body: render_markdown(records.clone(), &outputs.title, captured_at),
        },
        OutputDocument {
            file_name: outputs.lines_file.clone(),
            body: render_lines(records),
        },
    ];

    for filtered in &outputs.filtered {
        let source_keys: HashSet<DedupKey> = match &filtered.filter {
            OutputFilter::Source(source_id) => candidates
                .iter()
                .filter(|c| &c.source_id == source_id)
                .map(|c| c.record.dedup_key())
                .collect(),
            OutputFilter::UrlContains(_) => HashSet::new(),
        };
        let selected: Vec<&SourcedRecord> = retained
            .iter()
            .filter(|item| filter_matches(&filtered.filter, item, &source_keys))
            .collect();
        if selected.is_empty() {
            info!(file_name = %filtered.file_name, "no records for filtered output, skipping");
            continue;
        }
        docs.push(OutputDocument {
            file_name: filtered.file_name.clone(),
            body: render_lines(selected.into_iter().map(|item| &item.record)),
        });
    }
    docs
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputManifestEntry {
    pub file_name: String,
    pub path: String,
    pub bytes: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedWrite {
    pub file_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub candidates: usize,
    pub retained: usize,
    pub duplicates_dropped: usize,
    pub written: Vec<OutputManifestEntry>,
    pub failed_writes: Vec<FailedWrite>,
}

struct ConfiguredSource {
    config: SourceConfig,
    adapter: Box<dyn SourceAdapter>,
}

pub struct SyncPipeline {
    sources: Vec<ConfiguredSource>,
    outputs: OutputConfig,
    http: HttpFetcher,
    store: OutputStore,
    dedup: Deduplicator,
}

impl SyncPipeline {
    /// Builds every enabled source's adapter up front; a bad adapter setting fails here.
    pub fn new(config: &SyncConfig, registry: SourceRegistry) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let store = OutputStore::new(config.resolve(&config.output_dir));

        let mut sources = Vec::new();
        for source in registry.enabled() {
            let adapter = adapter_for_source(&source.source_id, &source.adapter)
                .with_context(|| format!("configuring adapter for {}", source.source_id))?;
            sources.push(ConfiguredSource {
                config: source.clone(),
                adapter,
            });
        }

        Ok(Self {
            sources,
            outputs: registry.outputs,
            http,
            store,
            dedup: Deduplicator::new(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        self.store.root()
    }

    pub async fn run_once(&self) -> SyncRunSummary {
        self.run_once_at(Local::now()).await
    }

    /// Run with an explicit clock. Source and write failures are logged and recorded in
    /// the summary; nothing here aborts the run.
    pub async fn run_once_at(&self, now: DateTime<Local>) -> SyncRunSummary {
        let started_at = Utc::now();
        let ctx = AdapterContext::new(Uuid::new_v4(), now);
        info!(run_id = %ctx.run_id, sources = self.sources.len(), "sync run started");

        let mut candidates = Vec::new();
        let mut reports = Vec::new();
        for source in &self.sources {
            let target = source.config.target();
            let page = match source.adapter.fetch_listing(&self.http, &ctx, &target).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(
                        run_id = %ctx.run_id,
                        source_id = %source.config.source_id,
                        url = %target.url,
                        error = %err,
                        "source fetch failed"
                    );
                    let mut report = SourceReport::new(&source.config.source_id, &target.url);
                    report.status = SourceStatus::FetchFailed(err.to_string());
                    reports.push(report);
                    continue;
                }
            };
            let (records, report) = ingest_page(source.adapter.as_ref(), &page, &ctx);
            info!(
                run_id = %ctx.run_id,
                source_id = %report.source_id,
                extracted = report.extracted,
                admitted = report.admitted,
                "source ingested"
            );
            candidates.extend(records);
            reports.push(report);
        }

        let candidate_count = candidates.len();
        let DedupOutcome { retained, dropped } = self.dedup.apply(candidates.clone());
        info!(
            run_id = %ctx.run_id,
            candidates = candidate_count,
            retained = retained.len(),
            dropped,
            "dedup complete"
        );

        let docs = build_documents(&self.outputs, &candidates, &retained, now);
        let mut written = Vec::new();
        let mut failed_writes = Vec::new();
        for doc in docs {
            match self.store.write_atomic(&doc.file_name, doc.body.as_bytes()).await {
                Ok(out) => {
                    info!(
                        run_id = %ctx.run_id,
                        path = %out.path.display(),
                        bytes = out.byte_size,
                        "output written"
                    );
                    written.push(OutputManifestEntry {
                        file_name: out.file_name,
                        path: out.path.display().to_string(),
                        bytes: out.byte_size,
                        sha256: out.sha256,
                    });
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(
                        run_id = %ctx.run_id,
                        file_name = %doc.file_name,
                        error = %message,
                        "output write failed"
                    );
                    failed_writes.push(FailedWrite {
                        file_name: doc.file_name,
                        error: message,
                    });
                }
            }
        }

        SyncRunSummary {
            run_id: ctx.run_id,
            started_at,
            finished_at: Utc::now(),
            sources: reports,
            candidates: candidate_count,
            retained: retained.len(),
            duplicates_dropped: dropped,
            written,
            failed_writes,
        }
    }
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env();
    let registry = SourceRegistry::load(&config.resolve(&config.sources_path)).await?;
    let pipeline = SyncPipeline::new(&config, registry)?;
    Ok(pipeline.run_once().await)
}
