//! In-memory record store with first-write-wins deduplication.
//!
//! Every mutation goes through one async mutex so two in-flight import or
//! fetch operations cannot interleave their merges.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::types::{AnalysisResult, Platform, SocialRecord};

#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    pub merged: Vec<SocialRecord>,
    pub added_count: usize,
    pub duplicates: usize,
}

/// Appends the records of `incoming` whose ids are not yet known. Ids
/// repeated inside `incoming` keep their first occurrence.
pub fn merge(existing: &[SocialRecord], incoming: Vec<SocialRecord>) -> MergeResult {
    let mut seen: HashSet<String> = existing.iter().map(|r| r.id.clone()).collect();
    let mut merged = existing.to_vec();
    let incoming_len = incoming.len();

    for record in incoming {
        if seen.insert(record.id.clone()) {
            merged.push(record);
        }
    }

    let added_count = merged.len() - existing.len();
    MergeResult {
        merged,
        added_count,
        duplicates: incoming_len - added_count,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub twitter_added: usize,
    pub instagram_added: usize,
    pub duplicates: usize,
}

impl MergeSummary {
    pub fn added(&self) -> usize {
        self.twitter_added + self.instagram_added
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub twitter: usize,
    pub instagram: usize,
}

impl StoreCounts {
    pub fn total(&self) -> usize {
        self.twitter + self.instagram
    }
}

#[derive(Debug, Default)]
struct StoreState {
    twitter: Vec<SocialRecord>,
    instagram: Vec<SocialRecord>,
    cached_analysis: Option<AnalysisResult>,
}

impl StoreState {
    fn bucket_mut(&mut self, platform: Platform) -> &mut Vec<SocialRecord> {
        match platform {
            Platform::Twitter => &mut self.twitter,
            Platform::Instagram => &mut self.instagram,
        }
    }

    /// Leaves the bucket untouched when nothing new arrived.
    fn merge_into(&mut self, platform: Platform, incoming: Vec<SocialRecord>) -> MergeResult {
        let bucket = self.bucket_mut(platform);
        let result = merge(bucket, incoming);
        if result.added_count > 0 {
            *bucket = result.merged.clone();
        }
        result
    }

    fn clear(&mut self) {
        self.twitter.clear();
        self.instagram.clear();
        self.cached_analysis = None;
    }
}

#[derive(Debug, Default)]
pub struct RecordStore {
    state: Mutex<StoreState>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn merge_platform(&self, platform: Platform, incoming: Vec<SocialRecord>) -> MergeResult {
        let mut state = self.state.lock().await;
        let result = state.merge_into(platform, incoming);
        debug!(
            "Merged {} {} records ({} duplicates)",
            result.added_count, platform, result.duplicates
        );
        result
    }

    /// Merges both platforms under a single lock.
    pub async fn merge_records(&self, twitter: Vec<SocialRecord>, instagram: Vec<SocialRecord>) -> MergeSummary {
        let mut state = self.state.lock().await;
        let tw = state.merge_into(Platform::Twitter, twitter);
        let ig = state.merge_into(Platform::Instagram, instagram);
        MergeSummary {
            twitter_added: tw.added_count,
            instagram_added: ig.added_count,
            duplicates: tw.duplicates + ig.duplicates,
        }
    }

    /// Wipes both buckets and the cached analysis.
    pub async fn clear(&self) {
        self.state.lock().await.clear();
        info!("Record store cleared");
    }

    pub async fn clear_and_replace(&self, twitter: Vec<SocialRecord>, instagram: Vec<SocialRecord>) -> MergeSummary {
        let mut state = self.state.lock().await;
        state.clear();
        let tw = state.merge_into(Platform::Twitter, twitter);
        let ig = state.merge_into(Platform::Instagram, instagram);
        info!(
            "Store replaced with {} twitter and {} instagram records",
            tw.added_count, ig.added_count
        );
        MergeSummary {
            twitter_added: tw.added_count,
            instagram_added: ig.added_count,
            duplicates: tw.duplicates + ig.duplicates,
        }
    }

    /// Twitter records first, then instagram, each in insertion order.
    pub async fn working_set(&self) -> Vec<SocialRecord> {
        let state = self.state.lock().await;
        state.twitter.iter().chain(state.instagram.iter()).cloned().collect()
    }

    pub async fn records(&self, platform: Platform) -> Vec<SocialRecord> {
        let state = self.state.lock().await;
        match platform {
            Platform::Twitter => state.twitter.clone(),
            Platform::Instagram => state.instagram.clone(),
        }
    }

    pub async fn counts(&self) -> StoreCounts {
        let state = self.state.lock().await;
        StoreCounts {
            twitter: state.twitter.len(),
            instagram: state.instagram.len(),
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.counts().await.total() == 0
    }

    pub async fn set_analysis(&self, result: AnalysisResult) {
        self.state.lock().await.cached_analysis = Some(result);
    }

    pub async fn analysis(&self) -> Option<AnalysisResult> {
        self.state.lock().await.cached_analysis.clone()
    }

    /// `{twitter, instagram, exportDate}` document of the raw store contents.
    pub async fn export_document(&self) -> Result<Value> {
        let state = self.state.lock().await;
        Ok(json!({
            "twitter": serde_json::to_value(&state.twitter)?,
            "instagram": serde_json::to_value(&state.instagram)?,
            "exportDate": Utc::now().to_rfc3339(),
        }))
    }
}
