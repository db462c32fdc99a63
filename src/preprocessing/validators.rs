use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::{Platform, SocialRecord};

// ============================================================================
// Validation Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub suggestions: Vec<String>,
    pub quality_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub issue_type: IssueType,
    pub message: String,
    pub record_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IssueType {
    EmptyText,
    NoAnalyzableRecords,
    DuplicateId,
    UnparsedTimestamp,
    MissingUsername,
}

// ============================================================================
// Base Validator Trait
// ============================================================================

pub trait Validator: Send + Sync {
    fn validate(&self, records: &[SocialRecord]) -> ValidationResult;
    fn name(&self) -> &str;
}

/// Records that may be submitted for analysis, in their original order.
pub fn analyzable(records: &[SocialRecord]) -> Vec<SocialRecord> {
    records
        .iter()
        .filter(|r| r.is_valid_for_analysis())
        .cloned()
        .collect()
}

// ============================================================================
// Analyzability Validator
// ============================================================================

/// Flags records whose text is empty after trimming. They stay in the store
/// but never reach a batch.
pub struct AnalyzabilityValidator;

impl Validator for AnalyzabilityValidator {
    fn validate(&self, records: &[SocialRecord]) -> ValidationResult {
        let mut issues = Vec::new();

        for (i, record) in records.iter().enumerate() {
            if !record.is_valid_for_analysis() {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Warning,
                    issue_type: IssueType::EmptyText,
                    message: format!("Record {} has no text and will be skipped", record.id),
                    record_index: Some(i),
                });
            }
        }

        let valid = records.len() - issues.len();
        if valid == 0 {
            issues.push(ValidationIssue {
                severity: IssueSeverity::Error,
                issue_type: IssueType::NoAnalyzableRecords,
                message: "No record carries analyzable text".to_string(),
                record_index: None,
            });
        }

        let mut suggestions = Vec::new();
        if valid < records.len() {
            suggestions.push("Records without text are excluded from analysis".to_string());
        }

        ValidationResult {
            is_valid: valid > 0,
            issues,
            suggestions,
            quality_score: valid as f32 / records.len().max(1) as f32,
        }
    }

    fn name(&self) -> &str {
        "AnalyzabilityValidator"
    }
}

// ============================================================================
// Duplicate Id Detector
// ============================================================================

pub struct DuplicateIdDetector;

impl Validator for DuplicateIdDetector {
    fn validate(&self, records: &[SocialRecord]) -> ValidationResult {
        let mut issues = Vec::new();
        let mut seen: HashSet<(Platform, &str)> = HashSet::new();

        for (i, record) in records.iter().enumerate() {
            if !seen.insert((record.platform, record.id.as_str())) {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Warning,
                    issue_type: IssueType::DuplicateId,
                    message: format!("Duplicate {} id {}", record.platform, record.id),
                    record_index: Some(i),
                });
            }
        }

        let duplicate_count = issues.len();
        let mut suggestions = Vec::new();
        if duplicate_count > 0 {
            suggestions.push(format!(
                "Found {} duplicate records; only the first of each is kept",
                duplicate_count
            ));
        }

        ValidationResult {
            is_valid: true, // Duplicates are dropped on merge, not rejected
            issues,
            suggestions,
            quality_score: 1.0 - (duplicate_count as f32 / records.len().max(1) as f32),
        }
    }

    fn name(&self) -> &str {
        "DuplicateIdDetector"
    }
}

// ============================================================================
// Metadata Validator
// ============================================================================

/// Informational checks on the fields the summary relies on.
pub struct MetadataValidator;

impl Validator for MetadataValidator {
    fn validate(&self, records: &[SocialRecord]) -> ValidationResult {
        let mut issues = Vec::new();
        let mut complete = 0usize;

        for (i, record) in records.iter().enumerate() {
            let mut ok = true;
            if record.parsed_timestamp().is_none() {
                ok = false;
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Info,
                    issue_type: IssueType::UnparsedTimestamp,
                    message: format!("Timestamp '{}' is not ISO-8601", record.timestamp),
                    record_index: Some(i),
                });
            }
            if record.username.is_none() {
                ok = false;
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Info,
                    issue_type: IssueType::MissingUsername,
                    message: format!("Record {} has no username", record.id),
                    record_index: Some(i),
                });
            }
            if ok {
                complete += 1;
            }
        }

        let mut suggestions = Vec::new();
        if issues.iter().any(|i| i.issue_type == IssueType::UnparsedTimestamp) {
            suggestions.push("Hashtag time spans ignore records with unparsed timestamps".to_string());
        }

        ValidationResult {
            is_valid: true,
            issues,
            suggestions,
            quality_score: complete as f32 / records.len().max(1) as f32,
        }
    }

    fn name(&self) -> &str {
        "MetadataValidator"
    }
}

// ============================================================================
// Composite Validator
// ============================================================================

pub struct CompositeValidator {
    validators: Vec<Box<dyn Validator>>,
}

impl Default for CompositeValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeValidator {
    pub fn new() -> Self {
        Self {
            validators: vec![
                Box::new(AnalyzabilityValidator),
                Box::new(DuplicateIdDetector),
                Box::new(MetadataValidator),
            ],
        }
    }

    pub fn add_validator(&mut self, validator: Box<dyn Validator>) {
        self.validators.push(validator);
    }

    pub fn validate_all(&self, records: &[SocialRecord]) -> Vec<ValidationResult> {
        self.validators.iter().map(|v| v.validate(records)).collect()
    }

    pub fn aggregate_results(&self, results: Vec<ValidationResult>) -> ValidationResult {
        let mut all_issues = Vec::new();
        let mut all_suggestions: Vec<String> = Vec::new();
        let mut total_score = 0.0;
        let mut is_valid = true;

        for result in results {
            all_issues.extend(result.issues);
            for suggestion in result.suggestions {
                if !all_suggestions.contains(&suggestion) {
                    all_suggestions.push(suggestion);
                }
            }
            total_score += result.quality_score;
            is_valid = is_valid && result.is_valid;
        }

        ValidationResult {
            is_valid,
            issues: all_issues,
            suggestions: all_suggestions,
            quality_score: total_score / self.validators.len().max(1) as f32,
        }
    }

    pub fn validate(&self, records: &[SocialRecord]) -> ValidationResult {
        self.aggregate_results(self.validate_all(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Engagement;

    fn record(id: &str, text: &str) -> SocialRecord {
        SocialRecord {
            id: id.to_string(),
            platform: Platform::Twitter,
            text: text.to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            username: Some("u".to_string()),
            location: None,
            hashtags: vec![],
            hashtag_display: vec![],
            engagement: Engagement::default(),
            sentiment: None,
        }
    }

    #[test]
    fn test_analyzable_filters_blank_text() {
        let records = vec![record("1", "hello"), record("2", "   "), record("3", "bye")];
        let kept = analyzable(&records);
        assert_eq!(kept.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["1", "3"]);

        let result = AnalyzabilityValidator.validate(&records);
        assert!(result.is_valid);
        assert_eq!(result.issues.len(), 1);
    }

    #[test]
    fn test_no_analyzable_records_is_an_error() {
        let result = AnalyzabilityValidator.validate(&[record("1", "")]);
        assert!(!result.is_valid);
        assert!(result
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::NoAnalyzableRecords && i.severity == IssueSeverity::Error));
    }

    #[test]
    fn test_duplicate_ids_are_warnings() {
        let result = DuplicateIdDetector.validate(&[record("1", "a"), record("1", "b")]);
        assert!(result.is_valid);
        assert_eq!(result.issues.len(), 1);
        assert!((result.quality_score - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_composite_aggregates() {
        let mut bad_ts = record("2", "b");
        bad_ts.timestamp = "last tuesday".to_string();
        let result = CompositeValidator::new().validate(&[record("1", "a"), bad_ts]);
        assert!(result.is_valid);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.suggestions.len(), 1);
    }
}
