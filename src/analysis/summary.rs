//! View-models derived from an [`AnalysisResult`]: summary cards, chart
//! series and sample posts. Rendering and export consume these directly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::SentiscopeConfig;
use crate::types::{AnalysisResult, BatchError, HashtagRollup, HashtagStats, Platform, Sentiment, SocialRecord};
use crate::utils::{percentage, sample_items};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleMode {
    /// First N records in aggregate order.
    Deterministic,
    /// Reproducible shuffle; samples are flagged as randomized.
    Seeded(u64),
}

#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub top_n: usize,
    pub sample_size: usize,
    pub sample_mode: SampleMode,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            top_n: 5,
            sample_size: 5,
            sample_mode: SampleMode::Deterministic,
        }
    }
}

impl From<&SentiscopeConfig> for SummaryOptions {
    fn from(config: &SentiscopeConfig) -> Self {
        Self {
            top_n: config.summary_top_n,
            sample_size: config.sample_size,
            sample_mode: config
                .sample_seed
                .map_or(SampleMode::Deterministic, SampleMode::Seeded),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentShare {
    pub sentiment: Sentiment,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAttribution {
    pub username: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopHashtag {
    pub tag: String,
    pub display: String,
    pub count: usize,
    pub users: Vec<UserAttribution>,
    /// `None` when no usage carried a parseable timestamp.
    pub span_days: Option<i64>,
}

impl TopHashtag {
    fn from_stats(stats: &HashtagStats) -> Self {
        Self {
            tag: stats.tag.clone(),
            display: stats.display.clone(),
            count: stats.count,
            users: stats
                .users
                .iter()
                .map(|u| UserAttribution {
                    username: u.clone(),
                    location: stats.user_location.get(u).cloned().flatten(),
                })
                .collect(),
            span_days: stats.span_days(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryViewModel {
    pub total: usize,
    pub sentiments: Vec<SentimentShare>,
    pub platforms: Vec<(Platform, usize)>,
    pub top_hashtags: Vec<TopHashtag>,
    pub average_sentiment: f64,
    pub samples: Vec<SocialRecord>,
    pub samples_randomized: bool,
    pub errors: Vec<BatchError>,
    pub partial: bool,
}

/// Top `n` tags by count, descending; ties keep first-seen order.
pub fn top_hashtags(rollup: &HashtagRollup, n: usize) -> Vec<&HashtagStats> {
    let mut stats: Vec<&HashtagStats> = rollup.iter().collect();
    stats.sort_by(|a, b| b.count.cmp(&a.count));
    stats.truncate(n);
    stats
}

/// Mean of +1/0/-1 over records that carry a sentiment, to two decimals.
pub fn average_sentiment(records: &[SocialRecord]) -> f64 {
    let scores: Vec<f64> = records
        .iter()
        .filter_map(|r| r.sentiment.map(|s| s.score()))
        .collect();
    if scores.is_empty() {
        return 0.0;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    (mean * 100.0).round() / 100.0
}

pub fn build_summary(result: &AnalysisResult, options: &SummaryOptions) -> SummaryViewModel {
    let total = result.total();

    let sentiments = Sentiment::ALL
        .iter()
        .map(|&sentiment| {
            let count = result.sentiment_counts.get(sentiment);
            SentimentShare {
                sentiment,
                count,
                percentage: percentage(count, total),
            }
        })
        .collect();

    let platforms = [Platform::Twitter, Platform::Instagram]
        .iter()
        .map(|&p| (p, result.platform_counts.get(p)))
        .collect();

    let top_hashtags = top_hashtags(&result.hashtag_rollup, options.top_n)
        .into_iter()
        .map(TopHashtag::from_stats)
        .collect();

    let (samples, samples_randomized) = match options.sample_mode {
        SampleMode::Deterministic => (sample_items(&result.records, options.sample_size, None), false),
        SampleMode::Seeded(seed) => (sample_items(&result.records, options.sample_size, Some(seed)), true),
    };

    SummaryViewModel {
        total,
        sentiments,
        platforms,
        top_hashtags,
        average_sentiment: average_sentiment(&result.records),
        samples,
        samples_randomized,
        errors: result.errors.clone(),
        partial: result.partial,
    }
}

// ============================================================================
// Chart data
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub title: String,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

impl ChartSeries {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            labels: Vec::new(),
            values: Vec::new(),
        }
    }

    fn push(&mut self, label: impl Into<String>, value: f64) {
        self.labels.push(label.into());
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub sentiment: ChartSeries,
    pub hashtags: ChartSeries,
    pub platforms: ChartSeries,
    /// Posts per calendar day (UTC), in date order.
    pub activity: ChartSeries,
}

pub fn build_chart_data(result: &AnalysisResult, top_n: usize) -> ChartData {
    let mut sentiment = ChartSeries::new("Sentiment Distribution");
    for s in Sentiment::ALL {
        let count = result.sentiment_counts.get(s);
        sentiment.push(format!("{} ({})", s, count), count as f64);
    }

    let mut hashtags = ChartSeries::new("Top Hashtags");
    for stats in top_hashtags(&result.hashtag_rollup, top_n) {
        hashtags.push(format!("#{}", stats.display), stats.count as f64);
    }

    let mut platforms = ChartSeries::new("Platform Distribution");
    for p in [Platform::Twitter, Platform::Instagram] {
        let count = result.platform_counts.get(p);
        if count > 0 {
            platforms.push(p.label(), count as f64);
        }
    }

    let mut per_day: BTreeMap<String, usize> = BTreeMap::new();
    for record in &result.records {
        if let Some(ts) = record.parsed_timestamp() {
            *per_day.entry(ts.format("%Y-%m-%d").to_string()).or_default() += 1;
        }
    }
    let mut activity = ChartSeries::new("Posting Activity");
    for (day, count) in per_day {
        activity.push(day, count as f64);
    }

    ChartData {
        sentiment,
        hashtags,
        platforms,
        activity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Engagement, RunOutcome};

    fn record(id: &str, sentiment: Option<Sentiment>, tags: &[&str], ts: &str) -> SocialRecord {
        SocialRecord {
            id: id.to_string(),
            platform: Platform::Twitter,
            text: id.to_string(),
            timestamp: ts.to_string(),
            username: Some(format!("user{}", id)),
            location: None,
            hashtags: tags.iter().map(|t| t.to_lowercase()).collect(),
            hashtag_display: tags.iter().map(|t| t.to_string()).collect(),
            engagement: Engagement::default(),
            sentiment,
        }
    }

    fn result(records: Vec<SocialRecord>) -> AnalysisResult {
        AnalysisResult::from_records(records, vec![], RunOutcome::Completed, None)
    }

    #[test]
    fn test_empty_result_has_zero_percentages() {
        let summary = build_summary(&AnalysisResult::empty(), &SummaryOptions::default());
        assert_eq!(summary.total, 0);
        assert!(summary.sentiments.iter().all(|s| s.percentage == 0.0));
        assert_eq!(summary.average_sentiment, 0.0);
        assert!(summary.samples.is_empty());
    }

    #[test]
    fn test_percentages_one_decimal() {
        let r = result(vec![
            record("1", Some(Sentiment::Positive), &[], "2024-01-01T00:00:00Z"),
            record("2", Some(Sentiment::Negative), &[], "2024-01-01T00:00:00Z"),
            record("3", Some(Sentiment::Negative), &[], "2024-01-01T00:00:00Z"),
        ]);
        let summary = build_summary(&r, &SummaryOptions::default());
        assert_eq!(summary.sentiments[0].percentage, 33.3);
        assert_eq!(summary.sentiments[2].percentage, 66.7);
        assert_eq!(summary.average_sentiment, -0.33);
    }

    #[test]
    fn test_top_hashtags_tie_break_first_seen() {
        let r = result(vec![
            record("1", None, &["b", "a"], "2024-01-01T00:00:00Z"),
            record("2", None, &["a", "c"], "2024-01-02T00:00:00Z"),
            record("3", None, &["c"], "2024-01-03T00:00:00Z"),
            record("4", None, &["b"], "2024-01-03T00:00:00Z"),
        ]);
        let tags: Vec<&str> = top_hashtags(&r.hashtag_rollup, 10).iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(tags, vec!["b", "a", "c"]);
        assert_eq!(top_hashtags(&r.hashtag_rollup, 1).len(), 1);
    }

    #[test]
    fn test_seeded_samples_are_flagged() {
        let records: Vec<SocialRecord> = (0..20)
            .map(|i| record(&i.to_string(), None, &[], "2024-01-01T00:00:00Z"))
            .collect();
        let r = result(records);
        let options = SummaryOptions {
            sample_mode: SampleMode::Seeded(42),
            ..Default::default()
        };
        let summary = build_summary(&r, &options);
        assert!(summary.samples_randomized);
        assert_eq!(summary.samples.len(), 5);

        let deterministic = build_summary(&r, &SummaryOptions::default());
        assert!(!deterministic.samples_randomized);
        assert_eq!(deterministic.samples[0].id, "0");
    }

    #[test]
    fn test_chart_activity_sorted_by_day() {
        let r = result(vec![
            record("1", Some(Sentiment::Positive), &["x"], "2024-01-03T10:00:00Z"),
            record("2", None, &["x"], "2024-01-01T10:00:00Z"),
            record("3", None, &[], "2024-01-03T12:00:00Z"),
            record("4", None, &[], "garbage"),
        ]);
        let charts = build_chart_data(&r, 10);
        assert_eq!(charts.activity.labels, vec!["2024-01-01", "2024-01-03"]);
        assert_eq!(charts.activity.values, vec![1.0, 2.0]);
        assert_eq!(charts.hashtags.labels, vec!["#x"]);
        assert_eq!(charts.sentiment.labels[1], "Neutral (3)");
        assert_eq!(charts.platforms.len(), 1);
    }
}
