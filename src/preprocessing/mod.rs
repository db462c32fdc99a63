pub mod import_parser;
pub mod normalizer;
pub mod repair;
pub mod validators;

pub use import_parser::{parse_import_blob, ImportParser, ImportPayload, ParseStrategy, ParsedImport};
pub use normalizer::{NormalizeReport, RecordNormalizer, TextNormalizer};
pub use repair::{Repair, RepairPipeline};
pub use validators::{analyzable, CompositeValidator, ValidationIssue, ValidationResult, Validator};
