use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SentiscopeConfig;
use crate::error::{Result, SentiscopeError};
use crate::error_recovery::RetryBudget;
use crate::preprocessing::normalizer::RecordNormalizer;
use crate::preprocessing::validators::analyzable;
use crate::remote::BatchSubmitter;
use crate::types::{AnalysisResult, BatchError, Platform, RunOutcome, Sentiment, SocialRecord};
use crate::utils::with_timeout;

// ============================================================================
// Run State and Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnalysisEvent {
    Started {
        run_id: String,
        total_records: usize,
        total_batches: usize,
    },
    BatchStarted {
        run_id: String,
        batch_number: usize,
        total_batches: usize,
    },
    BatchCompleted {
        run_id: String,
        batch_number: usize,
        records: usize,
    },
    BatchRetrying {
        run_id: String,
        batch_number: usize,
        error: String,
    },
    BatchFailed {
        run_id: String,
        batch_number: usize,
        error: String,
    },
    ProgressUpdate {
        run_id: String,
        completed: usize,
        total: usize,
        progress: f32,
    },
    Cancelled {
        run_id: String,
        completed: usize,
    },
    Completed {
        run_id: String,
        outcome: RunOutcome,
    },
}

/// `Idle -> Running(batch i/N) -> {Completed | CompletedWithErrors | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Idle,
    Running { batch: usize, total_batches: usize },
    Completed,
    CompletedWithErrors,
    Cancelled,
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, RunStatus::Running { .. })
    }
}

impl From<RunOutcome> for RunStatus {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed => RunStatus::Completed,
            RunOutcome::CompletedWithErrors => RunStatus::CompletedWithErrors,
            RunOutcome::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// Resets the status to `Idle` if a run is dropped before it finishes.
struct RunGuard {
    status: Arc<RwLock<RunStatus>>,
    armed: bool,
}

impl RunGuard {
    fn new(status: Arc<RwLock<RunStatus>>) -> Self {
        Self { status, armed: true }
    }

    async fn finish(mut self, final_status: RunStatus) {
        *self.status.write().await = final_status;
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Analysis run dropped before completion, resetting status");
        if let Ok(mut status) = self.status.try_write() {
            *status = RunStatus::Idle;
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let status = self.status.clone();
            handle.spawn(async move {
                *status.write().await = RunStatus::Idle;
            });
        }
    }
}

// ============================================================================
// Batch Processing
// ============================================================================

#[derive(Debug, Clone)]
pub struct Batch {
    /// 1-based.
    pub number: usize,
    pub records: Vec<SocialRecord>,
    pub start_index: usize,
    pub end_index: usize,
}

impl Batch {
    pub fn create_batches(records: &[SocialRecord], batch_size: usize) -> Vec<Batch> {
        let batch_size = batch_size.max(1);
        records
            .chunks(batch_size)
            .enumerate()
            .map(|(i, chunk)| Batch {
                number: i + 1,
                records: chunk.to_vec(),
                start_index: i * batch_size,
                end_index: std::cmp::min((i + 1) * batch_size, records.len()),
            })
            .collect()
    }
}

/// Reports `completed/total`, never moving backwards.
pub struct ProgressTracker {
    run_id: String,
    event_sender: broadcast::Sender<AnalysisEvent>,
    total: usize,
    completed: RwLock<usize>,
}

impl ProgressTracker {
    pub fn new(run_id: String, total: usize, event_sender: broadcast::Sender<AnalysisEvent>) -> Self {
        Self {
            run_id,
            event_sender,
            total,
            completed: RwLock::new(0),
        }
    }

    pub async fn update(&self, completed: usize) {
        let mut current = self.completed.write().await;
        *current = (*current).max(completed.min(self.total));

        let _ = self.event_sender.send(AnalysisEvent::ProgressUpdate {
            run_id: self.run_id.clone(),
            completed: *current,
            total: self.total,
            progress: *current as f32 / self.total.max(1) as f32,
        });
    }

    pub async fn get_current(&self) -> (usize, f32) {
        let completed = *self.completed.read().await;
        (completed, completed as f32 / self.total.max(1) as f32)
    }
}

/// Records from one `/analyze` response, matched back to what was sent.
fn parse_batch_response(
    body: Value,
    batch: &Batch,
    normalizer: &RecordNormalizer,
) -> Result<(Vec<SocialRecord>, Option<Value>)> {
    let items = match body.get("data") {
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(SentiscopeError::BatchSubmission {
                batch: batch.number,
                message: "'data' is not an array".to_string(),
            })
        }
        None => {
            return Err(SentiscopeError::BatchSubmission {
                batch: batch.number,
                message: "response has no 'data' field".to_string(),
            })
        }
    };

    let submitted: HashMap<&str, &SocialRecord> =
        batch.records.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let id = match item.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let sentiment = item
            .get("sentiment")
            .and_then(Value::as_str)
            .and_then(Sentiment::from_label);

        let record = match id.as_deref().and_then(|id| submitted.get(id)) {
            Some(original) => SocialRecord {
                sentiment: sentiment.or(original.sentiment),
                ..(*original).clone()
            },
            None => {
                let platform = item
                    .get("platform")
                    .and_then(Value::as_str)
                    .and_then(Platform::parse)
                    .unwrap_or(Platform::Twitter);
                match normalizer.normalize(item, platform) {
                    Some(record) => record,
                    None => {
                        debug!("Batch {}: dropping unmatched result without text", batch.number);
                        continue;
                    }
                }
            }
        };
        records.push(record);
    }

    let hashtag_analysis = body.get("hashtag_analysis").filter(|v| !v.is_null()).cloned();
    Ok((records, hashtag_analysis))
}

// ============================================================================
// Analysis Orchestrator
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub retry_delay: Duration,
    pub max_retry_budget: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&SentiscopeConfig::default())
    }
}

impl From<&SentiscopeConfig> for OrchestratorConfig {
    fn from(config: &SentiscopeConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_timeout: config.batch_timeout(),
            retry_delay: config.retry_delay(),
            max_retry_budget: config.max_retry_budget,
        }
    }
}

/// Runs batches strictly one after another against a [`BatchSubmitter`].
pub struct AnalysisOrchestrator {
    submitter: Arc<dyn BatchSubmitter>,
    config: OrchestratorConfig,
    normalizer: RecordNormalizer,
    status: Arc<RwLock<RunStatus>>,
    should_stop: Arc<RwLock<bool>>,
    event_sender: broadcast::Sender<AnalysisEvent>,
}

impl AnalysisOrchestrator {
    pub fn new(submitter: Arc<dyn BatchSubmitter>, config: OrchestratorConfig) -> Self {
        let (event_sender, _) = broadcast::channel(256);
        Self {
            submitter,
            config,
            normalizer: RecordNormalizer::new(),
            status: Arc::new(RwLock::new(RunStatus::Idle)),
            should_stop: Arc::new(RwLock::new(false)),
            event_sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.event_sender.subscribe()
    }

    pub async fn status(&self) -> RunStatus {
        *self.status.read().await
    }

    /// Requests cancellation; takes effect before the next batch is submitted.
    pub async fn cancel(&self) {
        *self.should_stop.write().await = true;
    }

    /// Shared stop flag, for cancelling from another task.
    pub fn stop_flag(&self) -> Arc<RwLock<bool>> {
        self.should_stop.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Analyzes the working set. Batch failures are collected into the
    /// result; only an empty working set or a concurrent run is an error.
    pub async fn analyze(&self, records: Vec<SocialRecord>) -> Result<AnalysisResult> {
        {
            let mut status = self.status.write().await;
            if status.is_running() {
                warn!("Rejected analysis request: a run is already in progress");
                return Err(SentiscopeError::AnalysisInProgress);
            }
            *status = RunStatus::Running {
                batch: 0,
                total_batches: 0,
            };
        }
        let guard = RunGuard::new(self.status.clone());
        *self.should_stop.write().await = false;

        match self.run(records).await {
            Ok(result) => {
                guard.finish(RunStatus::from(result.outcome)).await;
                Ok(result)
            }
            Err(e) => {
                guard.finish(RunStatus::Idle).await;
                Err(e)
            }
        }
    }

    async fn run(&self, records: Vec<SocialRecord>) -> Result<AnalysisResult> {
        let valid = analyzable(&records);
        if valid.is_empty() {
            return Err(SentiscopeError::NoAnalyzableData);
        }
        let skipped = records.len() - valid.len();
        if skipped > 0 {
            info!("Skipping {} records without text", skipped);
        }

        let run_id = Uuid::new_v4().to_string();
        let total = valid.len();
        let batches = Batch::create_batches(&valid, self.config.batch_size);
        let total_batches = batches.len();
        let budget = RetryBudget::new(self.config.max_retry_budget);
        let progress = ProgressTracker::new(run_id.clone(), total, self.event_sender.clone());
        let started = Instant::now();

        info!(
            "Starting analysis run {} over {} records in {} batches",
            run_id, total, total_batches
        );
        let _ = self.event_sender.send(AnalysisEvent::Started {
            run_id: run_id.clone(),
            total_records: total,
            total_batches,
        });

        let mut aggregated: Vec<SocialRecord> = Vec::with_capacity(total);
        let mut errors: Vec<BatchError> = Vec::new();
        let mut upstream_hashtags: Option<Value> = None;
        let mut cancelled = false;

        for batch in &batches {
            if *self.should_stop.read().await {
                info!("Run {} cancelled before batch {}", run_id, batch.number);
                cancelled = true;
                break;
            }

            *self.status.write().await = RunStatus::Running {
                batch: batch.number,
                total_batches,
            };
            let _ = self.event_sender.send(AnalysisEvent::BatchStarted {
                run_id: run_id.clone(),
                batch_number: batch.number,
                total_batches,
            });

            match self.process_batch(&run_id, batch, &budget).await {
                Ok((records, hashtag_analysis)) => {
                    debug!("Batch {} returned {} records", batch.number, records.len());
                    let _ = self.event_sender.send(AnalysisEvent::BatchCompleted {
                        run_id: run_id.clone(),
                        batch_number: batch.number,
                        records: records.len(),
                    });
                    aggregated.extend(records);
                    if hashtag_analysis.is_some() {
                        upstream_hashtags = hashtag_analysis;
                    }
                }
                Err(e) => {
                    error!("Batch {}/{} failed: {}", batch.number, total_batches, e);
                    let _ = self.event_sender.send(AnalysisEvent::BatchFailed {
                        run_id: run_id.clone(),
                        batch_number: batch.number,
                        error: e.to_string(),
                    });
                    errors.push(BatchError {
                        batch: batch.number,
                        message: e.to_string(),
                    });
                }
            }

            progress.update(batch.end_index).await;
        }

        let outcome = if cancelled {
            let (completed, _) = progress.get_current().await;
            let _ = self.event_sender.send(AnalysisEvent::Cancelled {
                run_id: run_id.clone(),
                completed,
            });
            RunOutcome::Cancelled
        } else if errors.is_empty() {
            RunOutcome::Completed
        } else {
            RunOutcome::CompletedWithErrors
        };

        info!(
            "Run {} finished as {:?} in {:?}: {} records, {} failed batches, {} retries used",
            run_id,
            outcome,
            started.elapsed(),
            aggregated.len(),
            errors.len(),
            budget.used()
        );

        let _ = self.event_sender.send(AnalysisEvent::Completed {
            run_id,
            outcome,
        });

        Ok(AnalysisResult::from_records(aggregated, errors, outcome, upstream_hashtags))
    }

    /// Submits one batch, retrying transient failures while the run's
    /// retry budget lasts.
    async fn process_batch(
        &self,
        run_id: &str,
        batch: &Batch,
        budget: &RetryBudget,
    ) -> Result<(Vec<SocialRecord>, Option<Value>)> {
        loop {
            let operation_name = format!("batch {}", batch.number);
            let attempt = with_timeout(
                || self.submitter.submit(&batch.records),
                self.config.batch_timeout,
                &operation_name,
            )
            .await
            .and_then(|body| parse_batch_response(body, batch, &self.normalizer));

            match attempt {
                Ok(parsed) => return Ok(parsed),
                Err(e) if e.is_retryable() && budget.try_consume() => {
                    warn!(
                        "Batch {} failed ({}), retrying; {} retries left in this run",
                        batch.number,
                        e,
                        budget.remaining()
                    );
                    let _ = self.event_sender.send(AnalysisEvent::BatchRetrying {
                        run_id: run_id.to_string(),
                        batch_number: batch.number,
                        error: e.to_string(),
                    });
                    sleep(self.config.retry_delay).await;
                }
                Err(e @ SentiscopeError::BatchSubmission { .. }) => return Err(e),
                Err(e) => {
                    return Err(SentiscopeError::BatchSubmission {
                        batch: batch.number,
                        message: e.to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Engagement;
    use serde_json::json;

    fn record(id: usize) -> SocialRecord {
        SocialRecord {
            id: id.to_string(),
            platform: Platform::Twitter,
            text: format!("text {}", id),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            username: None,
            location: None,
            hashtags: vec![],
            hashtag_display: vec![],
            engagement: Engagement::default(),
            sentiment: None,
        }
    }

    #[test]
    fn test_create_batches() {
        let records: Vec<SocialRecord> = (0..2500).map(record).collect();
        let batches = Batch::create_batches(&records, 1000);
        let sizes: Vec<usize> = batches.iter().map(|b| b.records.len()).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert_eq!(batches[2].number, 3);
        assert_eq!(batches[2].start_index, 2000);
        assert_eq!(batches[2].end_index, 2500);
    }

    #[test]
    fn test_parse_batch_response_matches_ids() {
        let batch = Batch::create_batches(&[record(1), record(2)], 10).remove(0);
        let body = json!({
            "data": [
                {"id": "2", "sentiment": "negative"},
                {"id": "1", "sentiment": "Positive"},
                {"id": "x", "text": "not submitted", "platform": "instagram"}
            ],
            "hashtag_analysis": {"top_hashtags": []}
        });
        let (records, hashtags) = parse_batch_response(body, &batch, &RecordNormalizer::new()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, "2");
        assert_eq!(records[0].text, "text 2");
        assert_eq!(records[0].sentiment, Some(Sentiment::Negative));
        assert_eq!(records[2].platform, Platform::Instagram);
        assert!(hashtags.is_some());
    }

    #[test]
    fn test_parse_batch_response_rejects_malformed() {
        let batch = Batch::create_batches(&[record(1)], 10).remove(0);
        let normalizer = RecordNormalizer::new();
        for body in [json!({}), json!({"data": {"id": 1}}), json!([1, 2])] {
            assert!(matches!(
                parse_batch_response(body, &batch, &normalizer),
                Err(SentiscopeError::BatchSubmission { batch: 1, .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let (tx, mut rx) = broadcast::channel(8);
        let tracker = ProgressTracker::new("run".into(), 10, tx);
        tracker.update(6).await;
        tracker.update(4).await;
        tracker.update(50).await;
        let mut seen = Vec::new();
        while let Ok(AnalysisEvent::ProgressUpdate { completed, .. }) = rx.try_recv() {
            seen.push(completed);
        }
        assert_eq!(seen, vec![6, 6, 10]);
        assert_eq!(tracker.get_current().await, (10, 1.0));
    }
}
