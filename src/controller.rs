//! Application controller: the single owner of the record store.
//!
//! Import, fetch, analysis, clear, export and repair flows are sequenced
//! here. Every user-visible outcome is recorded in the [`ActivityLog`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::analysis::orchestrator::{AnalysisEvent, AnalysisOrchestrator, OrchestratorConfig, RunStatus};
use crate::analysis::summary::{build_chart_data, build_summary, ChartData, SummaryOptions, SummaryViewModel};
use crate::config::SentiscopeConfig;
use crate::error::{Result, SentiscopeError};
use crate::error_recovery::{check_status, spawn_status_monitor, BackoffSchedule, ServerStatus, StatusProbe};
use crate::logging::ActivityLog;
use crate::preprocessing::import_parser::{ImportParser, ParseStrategy};
use crate::preprocessing::normalizer::RecordNormalizer;
use crate::preprocessing::validators::{CompositeValidator, IssueSeverity, ValidationResult};
use crate::remote::{BackendClient, BatchSubmitter, Credentials, SearchType};
use crate::store::{RecordStore, StoreCounts};
use crate::types::{AnalysisResult, Platform, SocialRecord};
use crate::utils::{retry_with_backoff, RetryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Merge,
    /// Clear the store (and cached analysis) before importing.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportOutcome {
    Imported {
        twitter_added: usize,
        instagram_added: usize,
        strategy: ParseStrategy,
    },
    /// Parsed fine but every record was already in the store.
    DuplicatesOnly { duplicates: usize },
    NoDataFound,
}

impl ImportOutcome {
    pub fn added(&self) -> usize {
        match self {
            ImportOutcome::Imported {
                twitter_added,
                instagram_added,
                ..
            } => twitter_added + instagram_added,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub fetched: usize,
    pub added: usize,
    pub analysis: AnalysisResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportTarget {
    /// Backend writes the report to this path.
    SavedFile(PathBuf),
    /// Backend picks the location and returns the report inline.
    Inline,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Saved(PathBuf),
    Inline {
        html: Option<String>,
        pdf_path: Option<String>,
        docx_path: Option<String>,
    },
}

pub struct Controller {
    config: SentiscopeConfig,
    store: RecordStore,
    parser: ImportParser,
    normalizer: RecordNormalizer,
    validator: CompositeValidator,
    orchestrator: AnalysisOrchestrator,
    client: BackendClient,
    activity: ActivityLog,
    status: Arc<RwLock<ServerStatus>>,
    credentials: RwLock<HashMap<Platform, Credentials>>,
    monitor_stop: Arc<RwLock<bool>>,
}

impl Controller {
    /// Controller whose batches go to the configured backend.
    pub fn new(config: SentiscopeConfig) -> Result<Self> {
        let client = BackendClient::from_config(&config)?;
        let submitter: Arc<dyn BatchSubmitter> = Arc::new(client.clone());
        Self::build(config, client, submitter)
    }

    /// Controller with a custom batch submitter; other calls still use HTTP.
    pub fn with_submitter(config: SentiscopeConfig, submitter: Arc<dyn BatchSubmitter>) -> Result<Self> {
        let client = BackendClient::from_config(&config)?;
        Self::build(config, client, submitter)
    }

    fn build(config: SentiscopeConfig, client: BackendClient, submitter: Arc<dyn BatchSubmitter>) -> Result<Self> {
        config.validate()?;
        let orchestrator = AnalysisOrchestrator::new(submitter, OrchestratorConfig::from(&config));
        Ok(Self {
            activity: ActivityLog::new(config.activity_log_capacity),
            store: RecordStore::new(),
            parser: ImportParser::new(),
            normalizer: RecordNormalizer::new(),
            validator: CompositeValidator::new(),
            orchestrator,
            client,
            status: Arc::new(RwLock::new(ServerStatus::Unknown)),
            credentials: RwLock::new(HashMap::new()),
            monitor_stop: Arc::new(RwLock::new(false)),
            config,
        })
    }

    pub fn config(&self) -> &SentiscopeConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AnalysisEvent> {
        self.orchestrator.subscribe()
    }

    pub async fn run_status(&self) -> RunStatus {
        self.orchestrator.status().await
    }

    pub async fn counts(&self) -> StoreCounts {
        self.store.counts().await
    }

    // ========================================================================
    // Import / export
    // ========================================================================

    #[instrument(skip(self, text), fields(len = text.len()))]
    pub async fn import_blob(&self, text: &str, mode: ImportMode) -> Result<ImportOutcome> {
        let parsed = match self.parser.parse_import_blob(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.activity.error(format!("Import failed: {}", e));
                return Err(e);
            }
        };

        let twitter = self.normalizer.normalize_all(&parsed.payload.twitter, Platform::Twitter);
        let instagram = self.normalizer.normalize_all(&parsed.payload.instagram, Platform::Instagram);
        if twitter.skipped + instagram.skipped > 0 {
            warn!("Skipped {} items without text", twitter.skipped + instagram.skipped);
        }
        if twitter.records.is_empty() && instagram.records.is_empty() {
            self.activity.warn("No valid Twitter or Instagram data found in the import");
            return Ok(ImportOutcome::NoDataFound);
        }

        let incoming: Vec<SocialRecord> = twitter.records.iter().chain(&instagram.records).cloned().collect();
        self.report_issues(&self.validator.validate(&incoming));

        let summary = match mode {
            ImportMode::Merge => self.store.merge_records(twitter.records, instagram.records).await,
            ImportMode::Replace => {
                self.store
                    .clear_and_replace(twitter.records, instagram.records)
                    .await
            }
        };

        if summary.added() == 0 {
            self.activity.warn(format!(
                "All {} imported records already exist; clear the data to re-import",
                summary.duplicates
            ));
            return Ok(ImportOutcome::DuplicatesOnly {
                duplicates: summary.duplicates,
            });
        }

        self.activity.info(format!(
            "Imported {} Twitter and {} Instagram records ({} duplicates skipped)",
            summary.twitter_added, summary.instagram_added, summary.duplicates
        ));
        Ok(ImportOutcome::Imported {
            twitter_added: summary.twitter_added,
            instagram_added: summary.instagram_added,
            strategy: parsed.strategy,
        })
    }

    /// Quality report over the current working set.
    pub async fn validation_report(&self) -> ValidationResult {
        self.validator.validate(&self.store.working_set().await)
    }

    fn report_issues(&self, result: &ValidationResult) {
        let warnings = result
            .issues
            .iter()
            .filter(|i| i.severity != IssueSeverity::Info)
            .count();
        if warnings > 0 {
            self.activity.warn(format!(
                "Import has {} data quality warnings (score {:.2})",
                warnings, result.quality_score
            ));
        }
        for suggestion in &result.suggestions {
            debug!("Suggestion: {}", suggestion);
        }
    }

    pub async fn import_file(&self, path: &Path, mode: ImportMode) -> Result<ImportOutcome> {
        let text = tokio::fs::read_to_string(path).await?;
        info!("Importing {}", path.display());
        self.import_blob(&text, mode).await
    }

    /// Writes a repaired copy of `input` to `output`; returns whether the
    /// written copy parses.
    pub async fn repair_file(&self, input: &Path, output: &Path) -> Result<bool> {
        let text = tokio::fs::read_to_string(input).await?;
        let (repaired, parses) = self.parser.repair_text(&text);
        tokio::fs::write(output, repaired).await?;
        if parses {
            self.activity
                .info(format!("Repaired copy written to {}", output.display()));
        } else {
            self.activity.warn(format!(
                "Repaired copy written to {} but it still does not parse",
                output.display()
            ));
        }
        Ok(parses)
    }

    pub async fn export_raw_data(&self, path: &Path) -> Result<()> {
        if self.store.is_empty().await {
            return Err(SentiscopeError::Validation("no data to export".to_string()));
        }
        let document = self.store.export_document().await?;
        tokio::fs::write(path, serde_json::to_string_pretty(&document)?).await?;
        self.activity
            .info(format!("Raw data exported to {}", path.display()));
        Ok(())
    }

    pub async fn clear_data(&self) {
        self.store.clear().await;
        self.activity.info("All data cleared");
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Analyzes the working set. Runs that produced no records, because every
    /// batch failed or the run was cancelled first, are returned but do not
    /// replace the cached result.
    pub async fn run_analysis(&self) -> Result<AnalysisResult> {
        let records = self.store.working_set().await;
        let result = match self.orchestrator.analyze(records).await {
            Ok(result) => result,
            Err(e) => {
                self.activity.warn(format!("Analysis not run: {}", e));
                return Err(e);
            }
        };

        for error in &result.errors {
            self.activity
                .error(format!("Batch {} failed: {}", error.batch, error.message));
        }

        if !replaces_cached_analysis(&result) {
            if result.has_errors() {
                self.activity
                    .error("Every batch failed; keeping the previous analysis");
            } else {
                self.activity
                    .warn("Analysis cancelled before any batch completed; keeping the previous analysis");
            }
        } else {
            self.activity.info(format!(
                "Analysis {:?}: {} records analyzed",
                result.outcome,
                result.total()
            ));
            self.store.set_analysis(result.clone()).await;
        }
        Ok(result)
    }

    pub async fn cancel_analysis(&self) {
        self.orchestrator.cancel().await;
    }

    pub async fn analysis(&self) -> Option<AnalysisResult> {
        self.store.analysis().await
    }

    pub async fn summary(&self) -> Option<SummaryViewModel> {
        let result = self.store.analysis().await?;
        Some(build_summary(&result, &SummaryOptions::from(&self.config)))
    }

    pub async fn chart_data(&self) -> Option<ChartData> {
        let result = self.store.analysis().await?;
        Some(build_chart_data(&result, self.config.chart_top_n))
    }

    // ========================================================================
    // Backend
    // ========================================================================

    pub async fn server_status(&self) -> ServerStatus {
        *self.status.read().await
    }

    pub async fn check_status(&self) -> ServerStatus {
        let status = check_status(&self.client, &self.status).await;
        if !status.is_connected() {
            self.activity
                .warn(format!("Backend at {} is {:?}", self.client.base_url(), status));
        }
        status
    }

    /// Re-probes in the background until connected or [`Self::stop_status_monitor`].
    pub async fn start_status_monitor(&self) -> JoinHandle<ServerStatus> {
        *self.monitor_stop.write().await = false;
        let probe: Arc<dyn StatusProbe> = Arc::new(self.client.clone());
        spawn_status_monitor(
            probe,
            self.status.clone(),
            BackoffSchedule::from_config(&self.config),
            self.monitor_stop.clone(),
        )
    }

    pub async fn stop_status_monitor(&self) {
        *self.monitor_stop.write().await = true;
    }

    pub async fn is_platform_connected(&self, platform: Platform) -> bool {
        self.credentials.read().await.contains_key(&platform)
    }

    #[instrument(skip(self, credentials), fields(source = %credentials.platform()))]
    pub async fn connect(&self, credentials: Credentials) -> Result<()> {
        credentials.validate()?;
        let platform = credentials.platform();
        let outcome = retry_with_backoff(
            || self.client.verify_credentials(&credentials),
            RetryConfig::from_config(&self.config),
            "verify credentials",
        )
        .await;

        match outcome {
            Ok(()) => {
                self.credentials.write().await.insert(platform, credentials);
                self.activity.info(format!("Connected to {}", platform.label()));
                Ok(())
            }
            Err(e) => {
                self.activity
                    .error(format!("{} connection failed: {}", platform.label(), e));
                Err(e)
            }
        }
    }

    /// Collects posts, merges them and analyzes the updated working set.
    pub async fn fetch(
        &self,
        platform: Platform,
        search_type: &str,
        query: &str,
        max_results: usize,
    ) -> Result<FetchOutcome> {
        if !self.server_status().await.is_connected() {
            return Err(SentiscopeError::RemoteUnavailable(
                "backend is not connected".to_string(),
            ));
        }
        let credentials = self
            .credentials
            .read()
            .await
            .get(&platform)
            .cloned()
            .ok_or_else(|| {
                SentiscopeError::Validation(format!("connect to {} before fetching", platform.label()))
            })?;
        let search_type: SearchType = search_type.parse()?;
        let query = query.trim();
        if query.is_empty() {
            return Err(SentiscopeError::Validation("search query is empty".to_string()));
        }

        let items = retry_with_backoff(
            || self.client.collect(&credentials, search_type, query, max_results),
            RetryConfig::from_config(&self.config),
            "collect",
        )
        .await?;

        let report = self.normalizer.normalize_all(&items, platform);
        let merged = self.store.merge_platform(platform, report.records).await;
        self.activity.info(format!(
            "Fetched {} {} posts for {} '{}' ({} new)",
            items.len(),
            platform.label(),
            search_type.as_str(),
            query,
            merged.added_count
        ));

        let analysis = self.run_analysis().await?;
        Ok(FetchOutcome {
            fetched: items.len(),
            added: merged.added_count,
            analysis,
        })
    }

    // ========================================================================
    // Reports
    // ========================================================================

    async fn require_analysis(&self) -> Result<AnalysisResult> {
        self.store
            .analysis()
            .await
            .ok_or_else(|| SentiscopeError::Validation("no analysis results available".to_string()))
    }

    pub async fn generate_report(&self, target: ReportTarget) -> Result<ReportOutcome> {
        let analysis = analysis_payload(&self.require_analysis().await?);
        let outcome = match target {
            ReportTarget::SavedFile(path) => {
                let body = json!({
                    "analysis_results": analysis,
                    "twitter_data": wire_records(&self.store.records(Platform::Twitter).await),
                    "instagram_data": wire_records(&self.store.records(Platform::Instagram).await),
                    "output_path": path.to_string_lossy(),
                });
                self.client.post_report("/generate-report", &body).await?;
                ReportOutcome::Saved(path)
            }
            ReportTarget::Inline => {
                let body = json!({
                    "analysis_results": analysis,
                    "report_type": "comprehensive",
                    "include_visualizations": true,
                });
                let response = self.client.post_report("/generate_report", &body).await?;
                let report = response.get("report").unwrap_or(&response);
                let field = |key: &str| report.get(key).and_then(Value::as_str).map(String::from);
                ReportOutcome::Inline {
                    html: field("html"),
                    pdf_path: field("pdf_path"),
                    docx_path: field("docx_path"),
                }
            }
        };
        self.activity.info("Report generated");
        Ok(outcome)
    }

    pub async fn export_html(&self, path: &Path) -> Result<()> {
        let analysis = analysis_payload(&self.require_analysis().await?);
        let counts = self.store.counts().await;
        let body = json!({
            "analysis_results": analysis,
            "twitter_count": counts.twitter,
            "instagram_count": counts.instagram,
            "output_path": path.to_string_lossy(),
        });
        self.client.post_report("/export-html", &body).await?;
        self.activity.info(format!("HTML exported to {}", path.display()));
        Ok(())
    }

    pub async fn export_excel(&self, path: &Path) -> Result<()> {
        let analysis = analysis_payload(&self.require_analysis().await?);
        let body = json!({
            "analysis_results": analysis,
            "twitter_data": wire_records(&self.store.records(Platform::Twitter).await),
            "instagram_data": wire_records(&self.store.records(Platform::Instagram).await),
            "output_path": path.to_string_lossy(),
        });
        self.client.post_report("/export-excel", &body).await?;
        self.activity.info(format!("Excel exported to {}", path.display()));
        Ok(())
    }
}

fn wire_records(records: &[SocialRecord]) -> Vec<Value> {
    records.iter().map(SocialRecord::to_wire).collect()
}

/// Analysis in the shape the report endpoints expect.
/// An empty result only replaces the cache when the run completed cleanly.
fn replaces_cached_analysis(result: &AnalysisResult) -> bool {
    !(result.records.is_empty() && (result.has_errors() || result.partial))
}

fn analysis_payload(result: &AnalysisResult) -> Value {
    let hashtags = result.upstream_hashtag_analysis.clone().unwrap_or_else(|| {
        json!({
            "top_hashtags": result
                .hashtag_rollup
                .iter()
                .map(|s| json!({ "hashtag": s.tag, "count": s.count }))
                .collect::<Vec<_>>(),
        })
    });
    json!({
        "data": wire_records(&result.records),
        "sentiment_counts": result.sentiment_counts,
        "platform_counts": result.platform_counts,
        "hashtag_analysis": hashtags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RunOutcome, Sentiment};

    #[test]
    fn test_analysis_payload_prefers_upstream_hashtags() {
        let upstream = json!({"top_hashtags": [{"hashtag": "x", "count": 9}]});
        let result = AnalysisResult::from_records(vec![], vec![], RunOutcome::Completed, Some(upstream.clone()));
        assert_eq!(analysis_payload(&result)["hashtag_analysis"], upstream);

        let empty = AnalysisResult::empty();
        assert!(analysis_payload(&empty)["hashtag_analysis"]["top_hashtags"]
            .as_array()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_empty_cancelled_run_keeps_cache() {
        let cancelled = AnalysisResult::from_records(vec![], vec![], RunOutcome::Cancelled, None);
        assert!(!replaces_cached_analysis(&cancelled));

        let completed_empty = AnalysisResult::from_records(vec![], vec![], RunOutcome::Completed, None);
        assert!(replaces_cached_analysis(&completed_empty));

        let record = SocialRecord {
            id: "1".into(),
            platform: Platform::Twitter,
            text: "hi".into(),
            timestamp: "2024-01-01T00:00:00+00:00".into(),
            username: None,
            location: None,
            hashtags: vec![],
            hashtag_display: vec![],
            engagement: Default::default(),
            sentiment: Some(Sentiment::Positive),
        };
        let partial = AnalysisResult::from_records(vec![record], vec![], RunOutcome::Cancelled, None);
        assert!(replaces_cached_analysis(&partial));
    }

    #[test]
    fn test_import_outcome_added() {
        let outcome = ImportOutcome::Imported {
            twitter_added: 2,
            instagram_added: 3,
            strategy: ParseStrategy::Direct,
        };
        assert_eq!(outcome.added(), 5);
        assert_eq!(ImportOutcome::DuplicatesOnly { duplicates: 4 }.added(), 0);
    }
}
