use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::repair::{scan_string, RepairPipeline};
use crate::error::{Result, SentiscopeError};
use crate::types::Platform;

static OBJECT_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());
static ARRAY_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").unwrap());
static MISSING_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["\d\w]\s*["a-zA-Z]"#).unwrap());
static TWITTER_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r#""twitter"\s*:\s*\["#).unwrap());
static INSTAGRAM_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r#""instagram"\s*:\s*\["#).unwrap());

const TWITTER_SIGNATURES: [&str; 4] = ["tweet_text", "tweet_like_count", "tweet_retweet_count", "followers_count"];
const INSTAGRAM_SIGNATURES: [&str; 5] = ["media_type", "shortCode", "ownerUsername", "displayUrl", "caption"];
const TWITTER_HINT_FIELDS: [&str; 4] = ["tweet_id", "text", "in_reply_to_status_id", "tweet_text"];
const INSTAGRAM_HINT_FIELDS: [&str; 5] = ["media_type", "caption", "permalink", "shortcode", "ownerUsername"];

const CLASSIFY_SAMPLE: usize = 5;
const PATCH_WINDOW: usize = 20;
const MAX_PATCHES: usize = 32;
const SNIPPET_RADIUS: usize = 30;
const MAX_SEARCH_DEPTH: usize = 32;

/// Which step of the recovery cascade produced the parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseStrategy {
    Direct,
    Repaired,
    SubstringExtraction,
    LineOriented,
    TargetedPatch,
    FieldScoped,
}

impl ParseStrategy {
    pub const CASCADE: [ParseStrategy; 6] = [
        ParseStrategy::Direct,
        ParseStrategy::Repaired,
        ParseStrategy::SubstringExtraction,
        ParseStrategy::LineOriented,
        ParseStrategy::TargetedPatch,
        ParseStrategy::FieldScoped,
    ];
}

/// Platform-bucketed raw items recovered from an import blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportPayload {
    pub twitter: Vec<Value>,
    pub instagram: Vec<Value>,
}

impl ImportPayload {
    pub fn is_empty(&self) -> bool {
        self.twitter.is_empty() && self.instagram.is_empty()
    }

    pub fn items(&self, platform: Platform) -> &[Value] {
        match platform {
            Platform::Twitter => &self.twitter,
            Platform::Instagram => &self.instagram,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedImport {
    pub payload: ImportPayload,
    pub strategy: ParseStrategy,
}

pub struct ImportParser {
    pipeline: RepairPipeline,
}

impl Default for ImportParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportParser {
    pub fn new() -> Self {
        Self {
            pipeline: RepairPipeline::standard(),
        }
    }

    pub fn pipeline(&self) -> &RepairPipeline {
        &self.pipeline
    }

    /// Recovers a structured value and buckets it by platform.
    pub fn parse_import_blob(&self, text: &str) -> Result<ParsedImport> {
        let (value, strategy) = self.recover(text)?;
        let payload = match value {
            Value::Array(items) => classify_array(items),
            Value::Object(map) => extract_from_object(map),
            other => {
                return Err(SentiscopeError::ImportParse {
                    message: format!("expected a JSON object or array, found {}", json_kind(&other)),
                    offset: None,
                    snippet: None,
                })
            }
        };
        info!(
            "Import parsed via {:?}: {} twitter, {} instagram items",
            strategy,
            payload.twitter.len(),
            payload.instagram.len()
        );
        Ok(ParsedImport { payload, strategy })
    }

    /// Runs the cascade; the first strategy that yields a value wins.
    pub fn recover(&self, text: &str) -> Result<(Value, ParseStrategy)> {
        let stripped = text.trim_start_matches('\u{feff}').trim();
        let direct_error = match serde_json::from_str::<Value>(stripped) {
            Ok(value) => return Ok((value, ParseStrategy::Direct)),
            Err(e) => e,
        };
        debug!("Direct parse failed: {}", direct_error);

        for strategy in &ParseStrategy::CASCADE[1..] {
            if let Some(value) = self.attempt(*strategy, stripped) {
                debug!("Recovered import blob with {:?}", strategy);
                return Ok((value, *strategy));
            }
            debug!("Strategy {:?} failed", strategy);
        }

        let offset = error_offset(stripped, &direct_error);
        Err(SentiscopeError::ImportParse {
            message: direct_error.to_string(),
            offset: Some(offset),
            snippet: Some(snippet_around(stripped, offset)),
        })
    }

    fn attempt(&self, strategy: ParseStrategy, text: &str) -> Option<Value> {
        match strategy {
            ParseStrategy::Direct => serde_json::from_str(text).ok(),
            ParseStrategy::Repaired => self.repair_and_parse(text),
            ParseStrategy::SubstringExtraction => {
                let span = largest_bracket_span(text)?;
                self.repair_and_parse(span)
            }
            ParseStrategy::LineOriented => text.lines().find_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                serde_json::from_str::<Value>(line)
                    .ok()
                    .filter(|v| v.is_object() || v.is_array())
            }),
            ParseStrategy::TargetedPatch => {
                let patched = patch_missing_separators(text);
                self.repair_and_parse(&patched)
            }
            ParseStrategy::FieldScoped => self.extract_platform_fields(text),
        }
    }

    /// Best-effort repaired copy of `text` and whether it now parses. Falls
    /// back to repairing only the largest bracketed span.
    pub fn repair_text(&self, text: &str) -> (String, bool) {
        let repaired = self.pipeline.apply(text);
        if serde_json::from_str::<Value>(&repaired).is_ok() {
            return (repaired, true);
        }
        if let Some(span) = largest_bracket_span(text) {
            let narrowed = self.pipeline.apply(span);
            if serde_json::from_str::<Value>(&narrowed).is_ok() {
                return (narrowed, true);
            }
        }
        (repaired, false)
    }

    fn repair_and_parse(&self, text: &str) -> Option<Value> {
        serde_json::from_str(&self.pipeline.apply(text)).ok()
    }

    fn extract_platform_fields(&self, text: &str) -> Option<Value> {
        let mut recovered = Map::new();
        for (key, pattern) in [("twitter", &*TWITTER_FIELD), ("instagram", &*INSTAGRAM_FIELD)] {
            let Some(found) = pattern.find(text) else {
                continue;
            };
            let start = found.end() - 1;
            let end = matching_bracket(text, start).unwrap_or(text.len());
            match self.repair_and_parse(&text[start..end]) {
                Some(array @ Value::Array(_)) => {
                    recovered.insert(key.to_string(), array);
                }
                _ => debug!("Could not recover the {} array in isolation", key),
            }
        }
        if recovered.is_empty() {
            None
        } else {
            Some(Value::Object(recovered))
        }
    }
}

/// Convenience wrapper around a default [`ImportParser`].
pub fn parse_import_blob(text: &str) -> Result<ParsedImport> {
    ImportParser::new().parse_import_blob(text)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Cascade helpers
// ============================================================================

fn largest_bracket_span(text: &str) -> Option<&str> {
    let object = OBJECT_SPAN.find(text).map(|m| m.as_str());
    let array = ARRAY_SPAN.find(text).map(|m| m.as_str());
    match (object, array) {
        (Some(o), Some(a)) => Some(if a.len() > o.len() { a } else { o }),
        (o, a) => o.or(a),
    }
}

/// Byte offset of a serde_json error position within `text`.
fn error_offset(text: &str, error: &serde_json::Error) -> usize {
    if error.line() == 0 {
        return 0;
    }
    let line_start: usize = text
        .split_inclusive('\n')
        .take(error.line() - 1)
        .map(str::len)
        .sum();
    let mut offset = (line_start + error.column().saturating_sub(1)).min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn snippet_around(text: &str, offset: usize) -> String {
    let start = floor_boundary(text, offset.saturating_sub(SNIPPET_RADIUS));
    let end = floor_boundary(text, offset + SNIPPET_RADIUS);
    let offset = floor_boundary(text, offset);
    let mut rest = text[offset..end].chars();
    match rest.next() {
        Some(at) => format!("{}>>{}<<{}", &text[start..offset], at, rest.as_str()),
        None => format!("{}>><<", &text[start..offset]),
    }
}

/// Repeatedly inserts a comma at the parser's reported error position while
/// the surrounding window looks like two adjacent values.
fn patch_missing_separators(text: &str) -> String {
    let mut patched = text.to_string();
    let mut last_offset = None;

    for _ in 0..MAX_PATCHES {
        let err = match serde_json::from_str::<Value>(&patched) {
            Ok(_) => break,
            Err(e) => e,
        };
        let offset = error_offset(&patched, &err);
        if last_offset.map_or(false, |last| offset <= last) || offset >= patched.len() {
            break;
        }
        let window_start = floor_boundary(&patched, offset.saturating_sub(PATCH_WINDOW));
        let window_end = floor_boundary(&patched, offset + PATCH_WINDOW);
        if !MISSING_SEPARATOR.is_match(&patched[window_start..window_end]) {
            break;
        }
        patched.insert(offset, ',');
        last_offset = Some(offset);
    }

    patched
}

/// Index just past the bracket that closes the one at `open`, skipping strings.
fn matching_bracket(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while let Some(c) = text[i..].chars().next() {
        match c {
            '"' => {
                let (end, terminated) = scan_string(text, i, '"');
                if !terminated {
                    return None;
                }
                i = end;
                continue;
            }
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += c.len_utf8();
    }
    None
}

// ============================================================================
// Classification
// ============================================================================

fn signature_score(samples: &[Value], signatures: &[&str]) -> usize {
    samples
        .iter()
        .filter_map(Value::as_object)
        .map(|obj| signatures.iter().filter(|sig| obj.contains_key(**sig)).count())
        .sum()
}

fn has_truthy(obj: &Map<String, Value>, key: &str) -> bool {
    match obj.get(key) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(_) => true,
    }
}

/// Buckets a bare top-level array by platform-signature majority over the
/// first few elements. Ties fall back to a `username` field (twitter);
/// otherwise the data stays unclassified.
pub fn classify_array(items: Vec<Value>) -> ImportPayload {
    let samples = &items[..items.len().min(CLASSIFY_SAMPLE)];
    let twitter_score = signature_score(samples, &TWITTER_SIGNATURES);
    let instagram_score = signature_score(samples, &INSTAGRAM_SIGNATURES);
    debug!(
        "Array signatures: twitter={}, instagram={}",
        twitter_score, instagram_score
    );

    let platform = if twitter_score > instagram_score {
        Some(Platform::Twitter)
    } else if instagram_score > twitter_score {
        Some(Platform::Instagram)
    } else if samples
        .iter()
        .filter_map(Value::as_object)
        .any(|obj| has_truthy(obj, "username"))
    {
        Some(Platform::Twitter)
    } else {
        None
    };

    match platform {
        Some(Platform::Twitter) => ImportPayload {
            twitter: items,
            instagram: Vec::new(),
        },
        Some(Platform::Instagram) => ImportPayload {
            twitter: Vec::new(),
            instagram: items,
        },
        None => {
            debug!("Unable to classify array of {} items", items.len());
            ImportPayload::default()
        }
    }
}

fn non_empty_array<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Vec<Value>> {
    obj.get(key).and_then(Value::as_array).filter(|a| !a.is_empty())
}

fn extract_from_object(map: Map<String, Value>) -> ImportPayload {
    let mut payload = ImportPayload {
        twitter: non_empty_array(&map, "twitter").cloned().unwrap_or_default(),
        instagram: non_empty_array(&map, "instagram").cloned().unwrap_or_default(),
    };
    if payload.twitter.is_empty() || payload.instagram.is_empty() {
        let root = Value::Object(map);
        deep_search(&root, &mut payload, 0);
    }
    payload
}

fn any_sample_has(items: &[Value], fields: &[&str]) -> bool {
    items
        .iter()
        .take(CLASSIFY_SAMPLE)
        .filter_map(Value::as_object)
        .any(|obj| fields.iter().any(|f| has_truthy(obj, f)))
}

/// Fills whichever bucket is still empty with the first matching nested
/// array: explicit `twitter`/`instagram` keys first, then arrays whose items
/// carry only one platform's hint fields.
fn deep_search(value: &Value, payload: &mut ImportPayload, depth: usize) {
    if depth > MAX_SEARCH_DEPTH || (!payload.twitter.is_empty() && !payload.instagram.is_empty()) {
        return;
    }

    match value {
        Value::Object(obj) => {
            if payload.twitter.is_empty() {
                if let Some(items) = non_empty_array(obj, "twitter") {
                    debug!("Found twitter data at depth {}", depth);
                    payload.twitter = items.clone();
                }
            }
            if payload.instagram.is_empty() {
                if let Some(items) = non_empty_array(obj, "instagram") {
                    debug!("Found instagram data at depth {}", depth);
                    payload.instagram = items.clone();
                }
            }
            for child in obj.values() {
                if child.is_object() || child.is_array() {
                    deep_search(child, payload, depth + 1);
                }
            }
        }
        Value::Array(items) => {
            if !items.is_empty() && payload.is_empty() {
                let twitterish = any_sample_has(items, &TWITTER_HINT_FIELDS);
                let instagramish = any_sample_has(items, &INSTAGRAM_HINT_FIELDS);
                if twitterish && !instagramish {
                    debug!("Array at depth {} looks like twitter data", depth);
                    payload.twitter = items.clone();
                    return;
                }
                if instagramish && !twitterish {
                    debug!("Array at depth {} looks like instagram data", depth);
                    payload.instagram = items.clone();
                    return;
                }
            }
            for child in items {
                if child.is_object() || child.is_array() {
                    deep_search(child, payload, depth + 1);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_parse_of_export_document() {
        let parsed = parse_import_blob(
            r#"{"twitter": [{"tweet_text": "a"}], "instagram": [{"caption": "b"}], "exportDate": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::Direct);
        assert_eq!(parsed.payload.twitter.len(), 1);
        assert_eq!(parsed.payload.instagram.len(), 1);
    }

    #[test]
    fn test_missing_comma_recovered_by_repair() {
        let parser = ImportParser::new();
        let (value, strategy) = parser.recover(r#"{"a":1 "b":2}"#).unwrap();
        assert_eq!(value, json!({"a": 1, "b": 2}));
        assert_eq!(strategy, ParseStrategy::Repaired);
    }

    #[test]
    fn test_repair_text_reports_parseability() {
        let parser = ImportParser::new();
        let (fixed, ok) = parser.repair_text("{'twitter': [{'tweet_text': 'hi'},]}");
        assert!(ok);
        assert_eq!(
            serde_json::from_str::<Value>(&fixed).unwrap(),
            json!({"twitter": [{"tweet_text": "hi"}]})
        );
    }

    #[test]
    fn test_substring_extraction_skips_surrounding_noise() {
        let parser = ImportParser::new();
        let (value, strategy) = parser
            .recover("exported by tool v2: {\"twitter\": [{\"tweet_text\": \"x\"}]} -- end")
            .unwrap();
        assert_eq!(strategy, ParseStrategy::SubstringExtraction);
        assert_eq!(value["twitter"][0]["tweet_text"], "x");
    }

    #[test]
    fn test_unrecoverable_input_reports_snippet() {
        let err = parse_import_blob("@@ this is not json").unwrap_err();
        match err {
            SentiscopeError::ImportParse { offset, snippet, .. } => {
                assert_eq!(offset, Some(0));
                assert!(snippet.unwrap().starts_with(">>@<<"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_scalar_top_level_rejected() {
        assert!(matches!(
            parse_import_blob("42"),
            Err(SentiscopeError::ImportParse { .. })
        ));
    }

    #[test]
    fn test_error_offset_counts_previous_lines() {
        let text = "{\n  \"a\": 1\n  \"b\": 2\n}";
        let err = serde_json::from_str::<Value>(text).unwrap_err();
        let offset = error_offset(text, &err);
        assert_eq!(&text[offset..offset + 1], "\"");
        assert_eq!(patch_missing_separators(text), "{\n  \"a\": 1\n  ,\"b\": 2\n}");
    }

    #[test]
    fn test_field_scoped_extraction() {
        let parser = ImportParser::new();
        let text = r#"garbage "twitter": [{"tweet_text": "a"}] more "instagram": [{"caption": "b"}] trailing }}"#;
        let value = parser.extract_platform_fields(text).unwrap();
        assert_eq!(value["twitter"].as_array().unwrap().len(), 1);
        assert_eq!(value["instagram"][0]["caption"], "b");
    }

    #[test]
    fn test_classify_majority_signature() {
        let items = vec![
            json!({"tweet_text": "1"}),
            json!({"tweet_text": "2"}),
            json!({"tweet_text": "3"}),
            json!({"tweet_text": "4"}),
            json!({"caption": "5"}),
        ];
        let payload = classify_array(items);
        assert_eq!(payload.twitter.len(), 5);
        assert!(payload.instagram.is_empty());
    }

    #[test]
    fn test_classify_tie_uses_username() {
        let tie = vec![
            json!({"tweet_text": "1"}),
            json!({"tweet_text": "2"}),
            json!({"caption": "3"}),
            json!({"caption": "4"}),
            json!({"other": true}),
        ];
        assert!(classify_array(tie.clone()).is_empty());

        let mut with_user = tie;
        with_user[4] = json!({"username": "carol"});
        assert_eq!(classify_array(with_user).twitter.len(), 5);
    }

    #[test]
    fn test_deep_search_finds_nested_arrays() {
        let payload = parse_import_blob(
            r#"{"export": {"meta": {}, "results": {"twitter": [{"tweet_text": "deep"}]}}, "posts": [{"media_type": "IMAGE", "caption": "c"}]}"#,
        )
        .unwrap()
        .payload;
        assert_eq!(payload.twitter[0]["tweet_text"], "deep");
        assert!(payload.instagram.is_empty());
    }

    #[test]
    fn test_deep_search_heuristic_only_when_nothing_found() {
        let payload = parse_import_blob(r#"{"data": {"items": [{"shortcode": "abc", "caption": "hi"}]}}"#)
            .unwrap()
            .payload;
        assert_eq!(payload.instagram.len(), 1);
        assert!(payload.twitter.is_empty());
    }
}
