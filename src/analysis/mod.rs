pub mod orchestrator;
pub mod summary;

pub use orchestrator::{AnalysisEvent, AnalysisOrchestrator, Batch, OrchestratorConfig, RunStatus};
pub use summary::{build_chart_data, build_summary, ChartData, SampleMode, SummaryOptions, SummaryViewModel};
