use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sentiscope::analysis::orchestrator::AnalysisEvent;
use sentiscope::logging::{init_logging, LogLevel};
use sentiscope::remote::Credentials;
use sentiscope::{Controller, ImportMode, ImportOutcome, Platform, ReportOutcome, ReportTarget, SentiscopeConfig};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

#[derive(Parser)]
#[clap(name = "sentiscope")]
#[clap(about = "Sentiscope - social media sentiment analysis client")]
#[clap(version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend URL (overrides config and environment)
    #[clap(long, global = true)]
    server_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import files and report what was merged
    Import {
        /// Input files (JSON exports or raw platform dumps)
        #[clap(required = true)]
        inputs: Vec<PathBuf>,

        /// Write the merged records as a raw data export
        #[clap(short, long)]
        export: Option<PathBuf>,
    },

    /// Import files and run a batch sentiment analysis
    Analyze {
        #[clap(required = true)]
        inputs: Vec<PathBuf>,

        /// Write summary and chart data as JSON
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a repaired copy of a malformed JSON file
    Repair {
        input: PathBuf,

        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that the backend is reachable
    Ping {
        /// Keep re-probing with backoff until connected
        #[clap(long)]
        wait: bool,
    },

    /// Collect posts from a platform through the backend and analyze them
    Collect {
        /// twitter or instagram
        #[clap(short, long)]
        platform: String,

        /// hashtag or username
        #[clap(short, long, default_value = "hashtag")]
        search_type: String,

        query: String,

        #[clap(short = 'n', long, default_value = "100")]
        max_results: usize,

        #[clap(long, env = "TWITTER_BEARER_TOKEN", hide_env_values = true)]
        twitter_bearer_token: Option<String>,

        #[clap(long, env = "INSTAGRAM_SESSION_ID", hide_env_values = true)]
        instagram_session_id: Option<String>,

        #[clap(long, env = "INSTAGRAM_DS_USER_ID", hide_env_values = true)]
        instagram_ds_user_id: Option<String>,

        #[clap(long, env = "INSTAGRAM_CSRF_TOKEN", hide_env_values = true)]
        instagram_csrf_token: Option<String>,

        /// Write the collected records as a raw data export
        #[clap(short, long)]
        export: Option<PathBuf>,
    },

    /// Import, analyze and ask the backend for a report
    Report {
        #[clap(required = true)]
        inputs: Vec<PathBuf>,

        /// Report path on the backend host; inline report when omitted
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SentiscopeConfig::load(path)
            .await
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SentiscopeConfig::default(),
    }
    .apply_env()?;
    if let Some(url) = cli.server_url {
        config.server_url = url;
    }
    if cli.verbose {
        config.logging.level = LogLevel::Debug;
    }
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Import { inputs, export } => {
            let controller = Controller::new(config)?;
            import_all(&controller, &inputs).await?;
            if let Some(path) = export {
                controller.export_raw_data(&path).await?;
                info!("Raw data written to {}", path.display());
            }
        }

        Commands::Analyze { inputs, output } => {
            let controller = Controller::new(config)?;
            import_all(&controller, &inputs).await?;
            analyze(&controller, output.as_deref()).await?;
        }

        Commands::Repair { input, output } => {
            let output = output.unwrap_or_else(|| repaired_path(&input));
            let controller = Controller::new(config)?;
            let parses = controller.repair_file(&input, &output).await?;
            if parses {
                info!("Repaired file written to {}", output.display());
            } else {
                warn!("Wrote {} but it still does not parse", output.display());
            }
        }

        Commands::Ping { wait } => {
            let controller = Controller::new(config)?;
            let status = if wait {
                controller.start_status_monitor().await.await?
            } else {
                controller.check_status().await
            };
            println!("{} is {:?}", controller.config().server_url, status);
            if !status.is_connected() {
                bail!("backend is not connected");
            }
        }

        Commands::Collect {
            platform,
            search_type,
            query,
            max_results,
            twitter_bearer_token,
            instagram_session_id,
            instagram_ds_user_id,
            instagram_csrf_token,
            export,
        } => {
            let platform = Platform::parse(&platform)
                .with_context(|| format!("unknown platform '{}'", platform))?;
            let credentials = match platform {
                Platform::Twitter => Credentials::Twitter {
                    bearer_token: twitter_bearer_token.unwrap_or_default(),
                },
                Platform::Instagram => Credentials::Instagram {
                    session_id: instagram_session_id.unwrap_or_default(),
                    ds_user_id: instagram_ds_user_id.unwrap_or_default(),
                    csrf_token: instagram_csrf_token.unwrap_or_default(),
                },
            };

            let controller = Controller::new(config)?;
            if !controller.check_status().await.is_connected() {
                bail!("backend at {} is not reachable", controller.config().server_url);
            }
            controller.connect(credentials).await.context("verifying credentials")?;

            let outcome = controller
                .fetch(platform, &search_type, &query, max_results)
                .await?;
            info!("Fetched {} posts, {} new", outcome.fetched, outcome.added);
            print_summary(&controller).await?;

            if let Some(path) = export {
                controller.export_raw_data(&path).await?;
            }
        }

        Commands::Report { inputs, output } => {
            let controller = Controller::new(config)?;
            import_all(&controller, &inputs).await?;
            analyze(&controller, None).await?;

            let target = output.map_or(ReportTarget::Inline, ReportTarget::SavedFile);
            match controller.generate_report(target).await? {
                ReportOutcome::Saved(path) => info!("Report written to {}", path.display()),
                ReportOutcome::Inline {
                    html,
                    pdf_path,
                    docx_path,
                } => {
                    if let Some(p) = pdf_path {
                        println!("PDF: {}", p);
                    }
                    if let Some(p) = docx_path {
                        println!("DOCX: {}", p);
                    }
                    if let Some(html) = html {
                        let path = controller.config().output_dir.join("sentiment_report.html");
                        fs::create_dir_all(&controller.config().output_dir).await?;
                        fs::write(&path, html).await?;
                        println!("HTML: {}", path.display());
                    }
                }
            }
        }
    }

    Ok(())
}

async fn import_all(controller: &Controller, inputs: &[PathBuf]) -> Result<()> {
    for input in inputs {
        let outcome = controller
            .import_file(input, ImportMode::Merge)
            .await
            .with_context(|| format!("importing {}", input.display()));
        match outcome {
            Ok(ImportOutcome::Imported {
                twitter_added,
                instagram_added,
                strategy,
            }) => info!(
                "{}: {} twitter, {} instagram records ({:?})",
                input.display(),
                twitter_added,
                instagram_added,
                strategy
            ),
            Ok(ImportOutcome::DuplicatesOnly { duplicates }) => {
                warn!("{}: all {} records already imported", input.display(), duplicates)
            }
            Ok(ImportOutcome::NoDataFound) => warn!("{}: no Twitter or Instagram data found", input.display()),
            Err(e) => {
                warn!("{:#}", e);
                warn!("Try 'sentiscope repair {}' to write a repaired copy", input.display());
                return Err(e);
            }
        }
    }
    let counts = controller.counts().await;
    info!("Store holds {} twitter and {} instagram records", counts.twitter, counts.instagram);
    Ok(())
}

async fn analyze(controller: &Controller, output: Option<&Path>) -> Result<()> {
    let mut events = controller.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AnalysisEvent::BatchStarted {
                    batch_number,
                    total_batches,
                    ..
                } => info!("Processing batch {} of {}", batch_number, total_batches),
                AnalysisEvent::ProgressUpdate { completed, total, .. } => {
                    info!("Progress: {}/{} records", completed, total)
                }
                AnalysisEvent::BatchFailed { batch_number, error, .. } => {
                    warn!("Batch {} failed: {}", batch_number, error)
                }
                AnalysisEvent::Completed { .. } | AnalysisEvent::Cancelled { .. } => break,
                _ => {}
            }
        }
    });

    let result = controller.run_analysis().await.context("analysis failed")?;
    progress.abort();
    info!("Analysis {:?}: {} records", result.outcome, result.total());
    print_summary(controller).await?;

    if let Some(path) = output {
        let document = serde_json::json!({
            "summary": controller.summary().await,
            "charts": controller.chart_data().await,
        });
        fs::write(path, serde_json::to_string_pretty(&document)?).await?;
        info!("Summary written to {}", path.display());
    }
    Ok(())
}

async fn print_summary(controller: &Controller) -> Result<()> {
    let Some(summary) = controller.summary().await else {
        return Ok(());
    };
    println!("Total posts: {}", summary.total);
    for share in &summary.sentiments {
        println!("  {:<8} {:>6} ({:.1}%)", share.sentiment.as_str(), share.count, share.percentage);
    }
    println!("Average sentiment: {:.2}", summary.average_sentiment);
    for tag in &summary.top_hashtags {
        let span = tag
            .span_days
            .map_or_else(|| "n/a".to_string(), |d| format!("{} days", d));
        println!("  #{:<20} {:>5} uses, {} users, {}", tag.display, tag.count, tag.users.len(), span);
    }
    for error in &summary.errors {
        println!("  batch {} failed: {}", error.batch, error.message);
    }
    Ok(())
}

fn repaired_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "import".to_string());
    input.with_file_name(format!("{}_repaired.json", stem))
}
