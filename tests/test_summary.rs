mod common;

use common::record;
use sentiscope::analysis::summary::{build_chart_data, build_summary, top_hashtags, SummaryOptions};
use sentiscope::types::RunOutcome;
use sentiscope::{AnalysisResult, Platform, Sentiment, SocialRecord};

fn tagged(id: &str, user: &str, location: Option<&str>, tags: &[&str], ts: &str) -> SocialRecord {
    let mut r = record(id, Platform::Twitter, &format!("post {}", id));
    r.username = Some(user.to_string());
    r.location = location.map(String::from);
    r.hashtags = tags.iter().map(|t| t.to_lowercase()).collect();
    r.hashtag_display = tags.iter().map(|t| t.to_string()).collect();
    r.timestamp = ts.to_string();
    r
}

#[test]
fn test_empty_result_percentages_are_zero() {
    let summary = build_summary(&AnalysisResult::empty(), &SummaryOptions::default());
    assert_eq!(summary.total, 0);
    for share in &summary.sentiments {
        assert_eq!(share.percentage, 0.0);
        assert!(!share.percentage.is_nan());
    }
}

#[test]
fn test_first_location_wins_per_user() {
    let records = vec![
        tagged("1", "ana", Some("Lisbon"), &["x"], "2024-01-01T00:00:00+00:00"),
        tagged("2", "ana", Some("Porto"), &["X"], "2024-01-05T00:00:00+00:00"),
    ];
    let result = AnalysisResult::from_records(records, vec![], RunOutcome::Completed, None);

    let stats = result.hashtag_rollup.get("#X").unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.users, vec!["ana"]);
    assert_eq!(stats.user_location["ana"].as_deref(), Some("Lisbon"));
    assert_eq!(stats.span_days(), Some(4));

    let summary = build_summary(&result, &SummaryOptions::default());
    let top = &summary.top_hashtags[0];
    assert_eq!(top.users.len(), 1);
    assert_eq!(top.users[0].location.as_deref(), Some("Lisbon"));
}

#[test]
fn test_span_is_at_least_one_day() {
    let records = vec![
        tagged("1", "a", None, &["t"], "2024-01-01T00:00:00+00:00"),
        tagged("2", "b", None, &["t"], "2024-01-01T03:00:00+00:00"),
    ];
    let result = AnalysisResult::from_records(records, vec![], RunOutcome::Completed, None);
    assert_eq!(result.hashtag_rollup.get("t").unwrap().span_days(), Some(1));
}

#[test]
fn test_span_without_timestamps_is_none() {
    let records = vec![tagged("1", "a", None, &["t"], "not a date")];
    let result = AnalysisResult::from_records(records, vec![], RunOutcome::Completed, None);
    let summary = build_summary(&result, &SummaryOptions::default());
    assert_eq!(summary.top_hashtags[0].span_days, None);
}

#[test]
fn test_summary_and_chart_top_n() {
    let records: Vec<SocialRecord> = (0..12)
        .map(|i| {
            let tag = format!("tag{}", i);
            let mut r = tagged(&i.to_string(), "u", None, &[tag.as_str()], "2024-01-01T00:00:00+00:00");
            r.sentiment = Some(Sentiment::Positive);
            r
        })
        .collect();
    let result = AnalysisResult::from_records(records, vec![], RunOutcome::Completed, None);

    let summary = build_summary(&result, &SummaryOptions::default());
    assert_eq!(summary.top_hashtags.len(), 5);
    assert_eq!(summary.top_hashtags[0].tag, "tag0");
    assert_eq!(summary.average_sentiment, 1.0);
    assert_eq!(summary.sentiments[0].percentage, 100.0);

    let charts = build_chart_data(&result, 10);
    assert_eq!(charts.hashtags.len(), 10);
    assert_eq!(top_hashtags(&result.hashtag_rollup, 10).len(), 10);
}
