use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Instagram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Instagram => "instagram",
        }
    }

    /// Prefix used for synthesized ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Platform::Twitter => "tw",
            Platform::Instagram => "ig",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Platform::Twitter => "Twitter",
            Platform::Instagram => "Instagram",
        }
    }

    pub fn parse(s: &str) -> Option<Platform> {
        match s.trim().to_lowercase().as_str() {
            "twitter" | "x" => Some(Platform::Twitter),
            "instagram" => Some(Platform::Instagram),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub const ALL: [Sentiment; 3] = [Sentiment::Positive, Sentiment::Neutral, Sentiment::Negative];

    /// Case-insensitive label parsing; also accepts the short forms some
    /// backends emit.
    pub fn from_label(label: &str) -> Option<Sentiment> {
        match label.trim().to_lowercase().as_str() {
            "positive" | "pos" => Some(Sentiment::Positive),
            "neutral" | "neu" => Some(Sentiment::Neutral),
            "negative" | "neg" => Some(Sentiment::Negative),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Neutral => "Neutral",
            Sentiment::Negative => "Negative",
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            Sentiment::Positive => 1.0,
            Sentiment::Neutral => 0.0,
            Sentiment::Negative => -1.0,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub likes: u64,
    pub retweets: u64,
    pub replies: u64,
}

/// Canonical post shape shared by both platforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialRecord {
    pub id: String,
    pub platform: Platform,
    pub text: String,
    /// RFC 3339 timestamp, ingestion time when the source had none.
    pub timestamp: String,
    pub username: Option<String>,
    pub location: Option<String>,
    /// Lower-cased rollup keys, without the leading `#`.
    pub hashtags: Vec<String>,
    /// Same tags in their original case, index-aligned with `hashtags`.
    #[serde(default)]
    pub hashtag_display: Vec<String>,
    #[serde(default)]
    pub engagement: Engagement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
}

impl SocialRecord {
    pub fn is_valid_for_analysis(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// JSON object sent to the analysis backend. Carries the platform-native
    /// text field alongside the unified one so either naming is understood.
    pub fn to_wire(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("id".into(), json!(self.id));
        obj.insert("platform".into(), json!(self.platform.as_str()));
        obj.insert("text".into(), json!(self.text));
        match self.platform {
            Platform::Twitter => obj.insert("tweet_text".into(), json!(self.text)),
            Platform::Instagram => obj.insert("caption".into(), json!(self.text)),
        };
        obj.insert("timestamp".into(), json!(self.timestamp));
        obj.insert("username".into(), json!(self.username));
        obj.insert("location".into(), json!(self.location));
        obj.insert("hashtags".into(), json!(self.hashtags));
        obj.insert("likes".into(), json!(self.engagement.likes));
        obj.insert("retweets".into(), json!(self.engagement.retweets));
        obj.insert("replies".into(), json!(self.engagement.replies));
        if let Some(sentiment) = self.sentiment {
            obj.insert("sentiment".into(), json!(sentiment.as_str()));
        }
        Value::Object(obj)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentCounts {
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
}

impl SentimentCounts {
    /// Records without a recognised label count as neutral, so the buckets
    /// always sum to the number of records.
    pub fn from_records(records: &[SocialRecord]) -> Self {
        let mut counts = SentimentCounts::default();
        for record in records {
            counts.add(record.sentiment.unwrap_or(Sentiment::Neutral));
        }
        counts
    }

    pub fn add(&mut self, sentiment: Sentiment) {
        match sentiment {
            Sentiment::Positive => self.positive += 1,
            Sentiment::Neutral => self.neutral += 1,
            Sentiment::Negative => self.negative += 1,
        }
    }

    pub fn get(&self, sentiment: Sentiment) -> usize {
        match sentiment {
            Sentiment::Positive => self.positive,
            Sentiment::Neutral => self.neutral,
            Sentiment::Negative => self.negative,
        }
    }

    pub fn total(&self) -> usize {
        self.positive + self.neutral + self.negative
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCounts {
    pub twitter: usize,
    pub instagram: usize,
}

impl PlatformCounts {
    pub fn from_records(records: &[SocialRecord]) -> Self {
        let mut counts = PlatformCounts::default();
        for record in records {
            match record.platform {
                Platform::Twitter => counts.twitter += 1,
                Platform::Instagram => counts.instagram += 1,
            }
        }
        counts
    }

    pub fn get(&self, platform: Platform) -> usize {
        match platform {
            Platform::Twitter => self.twitter,
            Platform::Instagram => self.instagram,
        }
    }
}

/// Per-tag usage statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashtagStats {
    pub tag: String,
    /// Case of the first occurrence.
    pub display: String,
    pub count: usize,
    /// Distinct attributing usernames in first-seen order.
    pub users: Vec<String>,
    /// First-seen location per username.
    pub user_location: HashMap<String, Option<String>>,
    pub timestamps: Vec<DateTime<Utc>>,
}

impl HashtagStats {
    fn new(tag: &str, display: &str) -> Self {
        Self {
            tag: tag.to_string(),
            display: display.to_string(),
            count: 0,
            users: Vec::new(),
            user_location: HashMap::new(),
            timestamps: Vec::new(),
        }
    }

    fn observe(&mut self, record: &SocialRecord) {
        self.count += 1;

        if let Some(username) = record.username.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            if !self.user_location.contains_key(username) {
                self.users.push(username.to_string());
                self.user_location
                    .insert(username.to_string(), record.location.clone());
            }
        }

        if let Some(ts) = record.parsed_timestamp() {
            self.timestamps.push(ts);
        }
    }

    /// Whole days between the earliest and latest use, at least one.
    /// `None` when no timestamp could be parsed.
    pub fn span_days(&self) -> Option<i64> {
        let min = self.timestamps.iter().min()?;
        let max = self.timestamps.iter().max()?;
        let millis = (*max - *min).num_milliseconds() as f64;
        Some(((millis / 86_400_000.0).round() as i64).max(1))
    }
}

/// Hashtag rollup keyed by lower-cased tag, kept in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashtagRollup {
    entries: Vec<HashtagStats>,
}

impl HashtagRollup {
    pub fn from_records(records: &[SocialRecord]) -> Self {
        let mut entries: Vec<HashtagStats> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in records {
            for (i, tag) in record.hashtags.iter().enumerate() {
                let key = tag.to_lowercase();
                let display = record.hashtag_display.get(i).unwrap_or(tag);
                let slot = *index.entry(key.clone()).or_insert_with(|| {
                    entries.push(HashtagStats::new(&key, display));
                    entries.len() - 1
                });
                entries[slot].observe(record);
            }
        }

        Self { entries }
    }

    pub fn get(&self, tag: &str) -> Option<&HashtagStats> {
        let key = tag.trim_start_matches('#').to_lowercase();
        self.entries.iter().find(|e| e.tag == key)
    }

    /// Entries in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &HashtagStats> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed,
    CompletedWithErrors,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    /// 1-based batch number.
    pub batch: usize,
    pub message: String,
}

/// Merged result of one analysis run. Superseded, never merged, by the next run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub records: Vec<SocialRecord>,
    pub sentiment_counts: SentimentCounts,
    pub platform_counts: PlatformCounts,
    pub hashtag_rollup: HashtagRollup,
    /// `hashtag_analysis` payload of the last batch that carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_hashtag_analysis: Option<Value>,
    pub errors: Vec<BatchError>,
    pub outcome: RunOutcome,
    pub partial: bool,
    pub completed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Derives every aggregate from `records` so counts and rollup are
    /// internally consistent.
    pub fn from_records(
        records: Vec<SocialRecord>,
        errors: Vec<BatchError>,
        outcome: RunOutcome,
        upstream_hashtag_analysis: Option<Value>,
    ) -> Self {
        Self {
            sentiment_counts: SentimentCounts::from_records(&records),
            platform_counts: PlatformCounts::from_records(&records),
            hashtag_rollup: HashtagRollup::from_records(&records),
            partial: outcome == RunOutcome::Cancelled,
            records,
            upstream_hashtag_analysis,
            errors,
            outcome,
            completed_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::from_records(Vec::new(), Vec::new(), RunOutcome::Completed, None)
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, user: Option<&str>, location: Option<&str>, tags: &[&str], ts: &str) -> SocialRecord {
        SocialRecord {
            id: id.to_string(),
            platform: Platform::Twitter,
            text: format!("post {}", id),
            timestamp: ts.to_string(),
            username: user.map(String::from),
            location: location.map(String::from),
            hashtags: tags.iter().map(|t| t.to_lowercase()).collect(),
            hashtag_display: tags.iter().map(|t| t.to_string()).collect(),
            engagement: Engagement::default(),
            sentiment: None,
        }
    }

    #[test]
    fn test_sentiment_labels_are_case_insensitive() {
        assert_eq!(Sentiment::from_label("POSITIVE"), Some(Sentiment::Positive));
        assert_eq!(Sentiment::from_label(" negative "), Some(Sentiment::Negative));
        assert_eq!(Sentiment::from_label("mixed"), None);
    }

    #[test]
    fn test_unlabelled_records_count_as_neutral() {
        let mut a = record("1", None, None, &[], "2024-01-01T00:00:00Z");
        a.sentiment = Some(Sentiment::Positive);
        let b = record("2", None, None, &[], "2024-01-01T00:00:00Z");
        let counts = SentimentCounts::from_records(&[a, b]);
        assert_eq!(counts.positive, 1);
        assert_eq!(counts.neutral, 1);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn test_rollup_keeps_first_location_per_user() {
        let records = vec![
            record("1", Some("alice"), Some("Paris"), &["Rust"], "2024-01-01T00:00:00Z"),
            record("2", Some("alice"), Some("Berlin"), &["rust"], "2024-01-04T00:00:00Z"),
        ];
        let rollup = HashtagRollup::from_records(&records);
        let stats = rollup.get("#RUST").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.display, "Rust");
        assert_eq!(stats.users, vec!["alice".to_string()]);
        assert_eq!(stats.user_location["alice"].as_deref(), Some("Paris"));
        assert_eq!(stats.span_days(), Some(3));
    }

    #[test]
    fn test_span_days_has_floor_of_one_and_none_without_timestamps() {
        let same_day = HashtagRollup::from_records(&[
            record("1", None, None, &["x"], "2024-01-01T00:00:00Z"),
            record("2", None, None, &["x"], "2024-01-01T05:00:00Z"),
        ]);
        assert_eq!(same_day.get("x").unwrap().span_days(), Some(1));

        let undated = HashtagRollup::from_records(&[record("1", None, None, &["x"], "yesterday")]);
        assert_eq!(undated.get("x").unwrap().span_days(), None);
    }

    #[test]
    fn test_to_wire_carries_platform_text_field() {
        let mut r = record("9", Some("bob"), None, &["a"], "2024-01-01T00:00:00Z");
        let wire = r.to_wire();
        assert_eq!(wire["tweet_text"], "post 9");
        r.platform = Platform::Instagram;
        assert_eq!(r.to_wire()["caption"], "post 9");
    }
}
