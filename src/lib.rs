//! # Sentiscope
//!
//! Client-side reconciliation and batch-analysis pipeline for social-media
//! sentiment data.
//!
//! ## Architecture Overview
//!
//! - **Preprocessing**: resilient import parsing, JSON repair, record normalization
//! - **Store**: deduplicating in-memory record store
//! - **Analysis**: sequential batch orchestration and summary/chart view-models
//! - **Remote**: HTTP client for the sentiment backend
//! - **Controller**: import, fetch, analyze, export and report flows
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sentiscope::{Controller, ImportMode, SentiscopeConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let controller = Controller::new(SentiscopeConfig::default())?;
//!     controller.import_file("export.json".as_ref(), ImportMode::Merge).await?;
//!     let result = controller.run_analysis().await?;
//!     println!("{} records analyzed", result.total());
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod controller;
pub mod error;
pub mod error_recovery;
pub mod logging;
pub mod preprocessing;
pub mod remote;
pub mod store;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use config::SentiscopeConfig;
pub use controller::{Controller, ImportMode, ImportOutcome, ReportOutcome, ReportTarget};
pub use error::{Result, SentiscopeError};
pub use types::{AnalysisResult, Platform, Sentiment, SocialRecord};
