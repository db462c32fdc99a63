//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use sentiscope::remote::BatchSubmitter;
use sentiscope::types::Engagement;
use sentiscope::{Platform, Sentiment, SentiscopeConfig, SentiscopeError, SocialRecord};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Creates a test configuration with small batches and no retry delay
pub fn test_config() -> SentiscopeConfig {
    let mut config = SentiscopeConfig::default();
    config.server_url = "http://127.0.0.1:9".to_string();
    config.batch_size = 2;
    config.retry_delay_ms = 1;
    config.max_retry_budget = 0;
    config
}

pub fn record(id: &str, platform: Platform, text: &str) -> SocialRecord {
    SocialRecord {
        id: id.to_string(),
        platform,
        text: text.to_string(),
        timestamp: "2024-03-01T12:00:00+00:00".to_string(),
        username: Some(format!("user_{}", id)),
        location: None,
        hashtags: vec![],
        hashtag_display: vec![],
        engagement: Engagement::default(),
        sentiment: None,
    }
}

pub fn twitter_records(n: usize) -> Vec<SocialRecord> {
    (0..n)
        .map(|i| record(&format!("tw{}", i), Platform::Twitter, &format!("tweet number {}", i)))
        .collect()
}

/// A `{twitter, instagram}` export document with raw platform fields.
pub fn export_document() -> String {
    json!({
        "twitter": [
            {"tweet_id": "1001", "tweet_text": "Loving the #Sunshine today", "username": "alice",
             "location": "Paris", "created_at": "2024-03-01T10:00:00Z", "likes": 3},
            {"tweet_id": "1002", "tweet_text": "Rainy again #weather", "username": "bob",
             "created_at": "2024-03-02T10:00:00Z"},
            {"tweet_id": "1003", "tweet_text": "", "username": "carol"}
        ],
        "instagram": [
            {"shortcode": "ABC", "caption": "Beach day #sunshine", "ownerUsername": "dave",
             "timestamp": "2024-03-03T10:00:00Z"}
        ],
        "exportDate": "2024-03-04T00:00:00Z"
    })
    .to_string()
}

/// Deterministic sentiment label from the record text.
pub fn label_for(text: &str) -> Sentiment {
    let lower = text.to_lowercase();
    if lower.contains("lov") || lower.contains("beach") || lower.contains("great") {
        Sentiment::Positive
    } else if lower.contains("rain") || lower.contains("bad") {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}

/// In-process backend: labels records by keyword, fails chosen batches and
/// remembers the batch sizes it saw.
#[derive(Default)]
pub struct ScriptedSubmitter {
    calls: AtomicUsize,
    failing_calls: HashSet<usize>,
    malformed_calls: HashSet<usize>,
    delay: Option<Duration>,
    sizes: Mutex<Vec<usize>>,
}

impl ScriptedSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1-based call numbers that fail with a retryable error.
    pub fn failing(mut self, calls: &[usize]) -> Self {
        self.failing_calls = calls.iter().copied().collect();
        self
    }

    /// 1-based call numbers that answer without a `data` array.
    pub fn malformed(mut self, calls: &[usize]) -> Self {
        self.malformed_calls = calls.iter().copied().collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchSubmitter for ScriptedSubmitter {
    async fn submit(&self, batch: &[SocialRecord]) -> sentiscope::Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.sizes.lock().unwrap().push(batch.len());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_calls.contains(&call) {
            return Err(SentiscopeError::RemoteUnavailable(format!("call {} refused", call)));
        }
        if self.malformed_calls.contains(&call) {
            return Ok(json!({"error": "internal"}));
        }

        let data: Vec<Value> = batch
            .iter()
            .map(|r| {
                let mut wire = r.to_wire();
                wire["sentiment"] = json!(label_for(&r.text).as_str());
                wire
            })
            .collect();
        Ok(json!({
            "data": data,
            "hashtag_analysis": {"top_hashtags": [{"hashtag": "call", "count": call}]}
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
