mod common;

use common::record;
use proptest::prelude::*;
use sentiscope::analysis::orchestrator::Batch;
use sentiscope::preprocessing::{ImportParser, RepairPipeline};
use sentiscope::store::merge;
use sentiscope::utils::percentage;
use sentiscope::Platform;
use serde_json::Value;
use std::collections::HashSet;

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ,:{}\\[\\]'#_-]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn test_repair_preserves_valid_json(value in json_value()) {
        let text = value.to_string();
        let repaired = RepairPipeline::standard().apply(&text);
        let reparsed: Value = serde_json::from_str(&repaired).unwrap();
        prop_assert_eq!(reparsed, value);
    }

    #[test]
    fn test_pretty_printed_json_parses_directly(value in json_value()) {
        let text = serde_json::to_string_pretty(&value).unwrap();
        let (parsed, _) = ImportParser::new().recover(&text).unwrap();
        prop_assert_eq!(parsed, value);
    }

    #[test]
    fn test_partition_sizes(total in 0usize..3000, batch_size in 1usize..1200) {
        let records: Vec<_> = (0..total)
            .map(|i| record(&i.to_string(), Platform::Twitter, "x"))
            .collect();
        let batches = Batch::create_batches(&records, batch_size);

        prop_assert_eq!(batches.len(), (total + batch_size - 1) / batch_size);
        prop_assert!(batches.iter().all(|b| !b.records.is_empty() && b.records.len() <= batch_size));
        prop_assert_eq!(batches.iter().map(|b| b.records.len()).sum::<usize>(), total);
        for pair in batches.windows(2) {
            prop_assert_eq!(pair[0].end_index, pair[1].start_index);
        }
    }

    #[test]
    fn test_merge_never_duplicates_ids(
        existing in prop::collection::vec(0u8..40, 0..30),
        incoming in prop::collection::vec(0u8..40, 0..30),
    ) {
        let existing: Vec<_> = existing
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .map(|id| record(&id.to_string(), Platform::Twitter, "x"))
            .collect();
        let incoming: Vec<_> = incoming
            .iter()
            .map(|id| record(&id.to_string(), Platform::Twitter, "x"))
            .collect();
        let incoming_len = incoming.len();

        let result = merge(&existing, incoming);
        let ids: HashSet<_> = result.merged.iter().map(|r| r.id.clone()).collect();
        prop_assert_eq!(ids.len(), result.merged.len());
        prop_assert_eq!(result.merged.len(), existing.len() + result.added_count);
        prop_assert_eq!(result.added_count + result.duplicates, incoming_len);
    }

    #[test]
    fn test_percentages_never_nan(part in 0usize..10_000, total in 0usize..10_000) {
        let p = percentage(part.min(total), total);
        prop_assert!(!p.is_nan());
        prop_assert!((0.0..=100.0).contains(&p));
    }
}
