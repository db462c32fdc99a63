use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::types::{Engagement, Platform, Sentiment, SocialRecord};

static HASHTAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\w+)").unwrap());

const FINGERPRINT_TEXT_CHARS: usize = 20;
const DIGEST_HEX_CHARS: usize = 16;

// ============================================================================
// Text Normalizers
// ============================================================================

pub trait TextNormalizer: Send + Sync {
    fn normalize(&self, text: String) -> String;
    fn name(&self) -> &str;
}

pub struct UnicodeNormalizer;

impl TextNormalizer for UnicodeNormalizer {
    fn normalize(&self, text: String) -> String {
        text.nfc().collect()
    }

    fn name(&self) -> &str {
        "UnicodeNormalizer"
    }
}

/// Trims surrounding whitespace and drops NUL bytes left by broken exports.
pub struct WhitespaceNormalizer;

impl TextNormalizer for WhitespaceNormalizer {
    fn normalize(&self, text: String) -> String {
        let trimmed = text.trim();
        if trimmed.len() == text.len() && !trimmed.contains('\0') {
            return text;
        }
        trimmed.replace('\0', "")
    }

    fn name(&self) -> &str {
        "WhitespaceNormalizer"
    }
}

// ============================================================================
// Field access
// ============================================================================

fn field_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| field_str(obj, k)).map(String::from)
}

/// String or number identifier; numbers are rendered without a fraction.
fn id_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn count_field(obj: &Map<String, Value>, keys: &[&str]) -> u64 {
    keys.iter()
        .find_map(|k| match obj.get(*k)? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().replace(',', "").parse().ok(),
            _ => None,
        })
        .unwrap_or(0)
}

fn nested_str(obj: &Map<String, Value>, outer: &str, inner: &str) -> Option<String> {
    obj.get(outer)
        .and_then(Value::as_object)
        .and_then(|o| field_str(o, inner))
        .map(String::from)
}

/// Parses the timestamp formats seen in exports: RFC 3339, RFC 2822, the
/// classic Twitter API format, naive `YYYY-MM-DD HH:MM:SS`, and unix time.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            // Values this large are milliseconds
            if raw.abs() >= 100_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .or_else(|_| DateTime::parse_from_rfc2822(s))
                .or_else(|_| DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y"))
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                        .ok()
                        .map(|naive| Utc.from_utc_datetime(&naive))
                })
                .or_else(|| s.parse::<i64>().ok().and_then(|n| parse_timestamp(&Value::from(n))))
        }
        _ => None,
    }
}

fn raw_timestamp_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Native hashtag list: strings, or objects carrying `text`/`tag`/`name`.
fn native_hashtags(obj: &Map<String, Value>) -> Option<Vec<String>> {
    let list = obj.get("hashtags").and_then(Value::as_array)?;
    let tags: Vec<String> = list
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(o) => ["text", "tag", "name"].iter().find_map(|k| field_str(o, k)),
            _ => None,
        })
        .map(|t| t.trim().trim_start_matches('#').to_string())
        .filter(|t| !t.is_empty())
        .collect();
    Some(tags)
}

fn extract_hashtags(text: &str) -> Vec<String> {
    HASHTAG_REGEX
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn digest_hex(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..DIGEST_HEX_CHARS].to_string()
}

// ============================================================================
// Record Normalizer
// ============================================================================

/// Field names consulted per platform, in order of preference.
struct FieldMap {
    text: &'static [&'static str],
    native_id: &'static [&'static str],
    username: &'static [&'static str],
    location: &'static [&'static str],
}

const TWITTER_FIELDS: FieldMap = FieldMap {
    text: &["tweet_text", "text", "full_text"],
    native_id: &["tweet_id", "id_str"],
    username: &["username", "user_name", "screen_name"],
    location: &["user_location", "location"],
};

const INSTAGRAM_FIELDS: FieldMap = FieldMap {
    text: &["caption", "text"],
    native_id: &["media_id", "shortcode", "shortCode"],
    username: &["ownerUsername", "username"],
    location: &["locationName", "location"],
};

const TIMESTAMP_FIELDS: [&str; 5] = ["created_at", "date_time", "timestamp", "taken_at", "date"];
const LIKE_FIELDS: [&str; 5] = ["likes", "like_count", "tweet_like_count", "favorite_count", "likesCount"];
const RETWEET_FIELDS: [&str; 3] = ["retweets", "retweet_count", "tweet_retweet_count"];
const REPLY_FIELDS: [&str; 6] = [
    "replies",
    "reply_count",
    "tweet_reply_count",
    "comment_count",
    "commentsCount",
    "comments_count",
];

/// Converts raw platform objects into [`SocialRecord`]s. Pure: the same raw
/// item always yields the same id.
pub struct RecordNormalizer {
    text_normalizers: Vec<Box<dyn TextNormalizer>>,
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeReport {
    pub records: Vec<SocialRecord>,
    /// Items dropped for lacking usable text.
    pub skipped: usize,
}

impl RecordNormalizer {
    pub fn new() -> Self {
        Self {
            text_normalizers: vec![Box::new(UnicodeNormalizer), Box::new(WhitespaceNormalizer)],
        }
    }

    fn fields(platform: Platform) -> &'static FieldMap {
        match platform {
            Platform::Twitter => &TWITTER_FIELDS,
            Platform::Instagram => &INSTAGRAM_FIELDS,
        }
    }

    fn clean_text(&self, text: &str) -> String {
        self.text_normalizers
            .iter()
            .fold(text.to_string(), |acc, n| n.normalize(acc))
    }

    fn raw_text(obj: &Map<String, Value>, platform: Platform) -> Option<String> {
        Self::fields(platform).text.iter().find_map(|key| match obj.get(*key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            // Instagram API captions may arrive as `{ "text": ... }`
            Value::Object(o) => field_str(o, "text").map(String::from),
            _ => None,
        })
    }

    /// Returns `None` when the item has no usable text for its platform.
    pub fn normalize(&self, raw: &Value, platform: Platform) -> Option<SocialRecord> {
        let obj = raw.as_object()?;
        let fields = Self::fields(platform);

        let text = self.clean_text(&Self::raw_text(obj, platform)?);
        if text.is_empty() {
            return None;
        }

        let raw_timestamp = TIMESTAMP_FIELDS
            .iter()
            .filter_map(|k| obj.get(*k))
            .find(|v| raw_timestamp_text(v).is_some());
        let timestamp = match raw_timestamp {
            Some(value) => parse_timestamp(value)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| {
                    debug!("Unparseable timestamp {}, using ingestion time", value);
                    Utc::now().to_rfc3339()
                }),
            None => Utc::now().to_rfc3339(),
        };

        let id = id_field(obj, "id")
            .or_else(|| fields.native_id.iter().find_map(|k| id_field(obj, k)))
            .or_else(|| {
                raw_timestamp.and_then(raw_timestamp_text).map(|ts| {
                    let prefix: String = text.chars().take(FINGERPRINT_TEXT_CHARS).collect();
                    format!("{}_{}_{}", platform.id_prefix(), prefix, ts)
                })
            })
            .unwrap_or_else(|| format!("{}_{}", platform.id_prefix(), digest_hex(raw)));

        let username = first_str(obj, fields.username).or_else(|| match platform {
            Platform::Twitter => nested_str(obj, "user", "screen_name"),
            Platform::Instagram => nested_str(obj, "owner", "username"),
        });
        let location = first_str(obj, fields.location).or_else(|| match platform {
            Platform::Twitter => nested_str(obj, "user", "location"),
            Platform::Instagram => nested_str(obj, "location", "name"),
        });

        let hashtag_display = native_hashtags(obj).unwrap_or_else(|| extract_hashtags(&text));
        let hashtags = hashtag_display.iter().map(|t| t.to_lowercase()).collect();

        let engagement = Engagement {
            likes: count_field(obj, &LIKE_FIELDS),
            retweets: count_field(obj, &RETWEET_FIELDS),
            replies: count_field(obj, &REPLY_FIELDS),
        };

        let sentiment = field_str(obj, "sentiment").and_then(Sentiment::from_label);

        Some(SocialRecord {
            id,
            platform,
            text,
            timestamp,
            username,
            location,
            hashtags,
            hashtag_display,
            engagement,
            sentiment,
        })
    }

    pub fn normalize_all(&self, items: &[Value], platform: Platform) -> NormalizeReport {
        let mut report = NormalizeReport::default();
        for item in items {
            match self.normalize(item, platform) {
                Some(record) => report.records.push(record),
                None => report.skipped += 1,
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_twitter_item_with_native_id() {
        let raw = json!({
            "tweet_id": 1234567890123u64,
            "tweet_text": "Loving #Rust and #rustlang today",
            "username": "ferris",
            "user_location": "Crab City",
            "created_at": "2024-03-01T12:00:00Z",
            "tweet_like_count": 7,
            "tweet_retweet_count": "3",
        });
        let record = RecordNormalizer::new().normalize(&raw, Platform::Twitter).unwrap();
        assert_eq!(record.id, "1234567890123");
        assert_eq!(record.hashtags, vec!["rust", "rustlang"]);
        assert_eq!(record.hashtag_display, vec!["Rust", "rustlang"]);
        assert_eq!(record.username.as_deref(), Some("ferris"));
        assert_eq!(record.engagement.likes, 7);
        assert_eq!(record.engagement.retweets, 3);
        assert_eq!(record.timestamp, "2024-03-01T12:00:00+00:00");
        assert!(record.sentiment.is_none());
    }

    #[test]
    fn test_instagram_caption_object_and_owner() {
        let raw = json!({
            "shortCode": "Bx12",
            "caption": {"text": "Sunset #Beach"},
            "owner": {"username": "sunny"},
            "taken_at": 1700000000,
            "commentsCount": 4
        });
        let record = RecordNormalizer::new().normalize(&raw, Platform::Instagram).unwrap();
        assert_eq!(record.id, "Bx12");
        assert_eq!(record.text, "Sunset #Beach");
        assert_eq!(record.username.as_deref(), Some("sunny"));
        assert_eq!(record.hashtags, vec!["beach"]);
        assert_eq!(record.engagement.replies, 4);
        assert!(record.timestamp.starts_with("2023-11-14T22:13:20"));
    }

    #[test]
    fn test_missing_text_yields_none() {
        let normalizer = RecordNormalizer::new();
        assert!(normalizer.normalize(&json!({"tweet_text": "   "}), Platform::Twitter).is_none());
        assert!(normalizer.normalize(&json!({"caption": "x"}), Platform::Twitter).is_none());
        assert!(normalizer.normalize(&json!("not an object"), Platform::Twitter).is_none());
    }

    #[test]
    fn test_fingerprint_and_digest_ids_are_stable() {
        let normalizer = RecordNormalizer::new();
        let dated = json!({"tweet_text": "A fairly long tweet body that gets truncated", "created_at": "Wed Oct 10 20:19:24 +0000 2018"});
        let a = normalizer.normalize(&dated, Platform::Twitter).unwrap();
        let b = normalizer.normalize(&dated, Platform::Twitter).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, "tw_A fairly long tweet _Wed Oct 10 20:19:24 +0000 2018");
        assert_eq!(a.timestamp, "2018-10-10T20:19:24+00:00");

        let undated = json!({"caption": "no id, no time"});
        let c = normalizer.normalize(&undated, Platform::Instagram).unwrap();
        let d = normalizer.normalize(&undated, Platform::Instagram).unwrap();
        assert_eq!(c.id, d.id);
        assert!(c.id.starts_with("ig_"));
        assert_eq!(c.id.len(), 3 + DIGEST_HEX_CHARS);
    }

    #[test]
    fn test_unparseable_timestamp_falls_back_to_ingestion_time() {
        let raw = json!({"tweet_id": "1", "tweet_text": "hi", "created_at": "last tuesday"});
        let before = Utc::now() - chrono::Duration::seconds(1);
        let record = RecordNormalizer::new().normalize(&raw, Platform::Twitter).unwrap();
        let parsed = record.parsed_timestamp().unwrap();
        assert!(parsed >= before);
        assert_eq!(record.id, "1");

        // the raw text still feeds the fingerprint id
        let no_id = json!({"tweet_text": "hi", "created_at": "last tuesday"});
        let fingerprinted = RecordNormalizer::new().normalize(&no_id, Platform::Twitter).unwrap();
        assert_eq!(fingerprinted.id, "tw_hi_last tuesday");
        assert!(fingerprinted.parsed_timestamp().is_some());
    }

    #[test]
    fn test_text_is_nfc_normalized() {
        let decomposed = "Cafe\u{301} #cafe\u{301}";
        let record = RecordNormalizer::new()
            .normalize(&json!({"tweet_text": decomposed}), Platform::Twitter)
            .unwrap();
        assert_eq!(record.text, "Caf\u{e9} #caf\u{e9}");
        assert_eq!(record.hashtags, vec!["caf\u{e9}"]);
    }

    #[test]
    fn test_sentiment_label_is_read() {
        let record = RecordNormalizer::new()
            .normalize(&json!({"id": "1", "text": "ok", "sentiment": "NEGATIVE"}), Platform::Twitter)
            .unwrap();
        assert_eq!(record.sentiment, Some(Sentiment::Negative));
    }

    #[test]
    fn test_normalize_all_counts_skips() {
        let items = vec![json!({"tweet_text": "a", "id": 1}), json!({"other": 1})];
        let report = RecordNormalizer::new().normalize_all(&items, Platform::Twitter);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.skipped, 1);
    }
}
