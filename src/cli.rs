use crate::converter::{convert_project_annotations, AnnotationBuckets};
use crate::merger::{CsvTextMerger, MergeError};
use crate::model::{RouterEvent, RunReport};
use crate::orchestrator::Router;
use crate::paths::ProjectPaths;
use crate::settings::SettingsHandler;
use crate::storage::S3Communication;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "extraction-router",
    version,
    about = "Run a training pass through the extraction and inference services"
)]
pub struct Cli {
    /// Project to run; selects data/<project>/settings.yaml below the root folder
    #[arg(long)]
    pub project_name: String,

    /// Root folder holding the data/ and models/ trees
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Main settings file (defaults to <root>/data/<project>/settings.yaml)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// S3 settings file (defaults to <root>/data/s3_settings.yaml)
    #[arg(long)]
    pub s3_settings: Option<PathBuf>,

    /// Connect timeout for requests to the services (e.g. 5s)
    #[arg(long)]
    pub connect_timeout: Option<humantime::Duration>,

    /// Convert the annotation workbook to aggregated_annotation.csv before the run
    #[arg(long)]
    pub convert_annotations: bool,

    /// Print the run report as JSON instead of the text summary
    #[arg(long)]
    pub json: bool,

    /// Export the run report as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// Load settings, run the pipeline and render its outcome. Returns the run result.
pub async fn run(args: Cli) -> Result<bool> {
    let (out_tx, out_handle) = spawn_output_writer();
    let result = execute(&args, &out_tx).await;
    drop(out_tx);
    let _ = out_handle.await;
    result
}

async fn execute(args: &Cli, out_tx: &mpsc::UnboundedSender<OutputLine>) -> Result<bool> {
    let (settings, s3_settings) = settings_handler(args)
        .read_settings(&args.project_name)
        .context("failed to load settings")?;
    let paths = ProjectPaths::new(&args.project_name, &settings, &args.root)
        .with_context(|| format!("failed to prepare folders under {}", args.root.display()))?;
    let http = build_http_client(args)?;

    let s3_usage = settings.general.s3_usage;
    let interim_bucket =
        if s3_usage && !s3_settings.interim_bucket.s3_bucket_name.trim().is_empty() {
            Some(
                S3Communication::new(&s3_settings.interim_bucket)
                    .context("failed to set up the interim bucket")?,
            )
        } else {
            None
        };

    if args.convert_annotations {
        let output = if s3_usage {
            let main = S3Communication::new(&s3_settings.main_bucket)
                .context("failed to set up the main bucket")?;
            let interim = interim_bucket
                .as_ref()
                .ok_or(MergeError::MissingInterimBucket)?;
            let buckets = AnnotationBuckets {
                s3_prefix: &s3_settings.prefix,
                main: &main,
                interim,
            };
            convert_project_annotations(&paths, Some(buckets)).await
        } else {
            convert_project_annotations(&paths, None).await
        }
        .context("failed to convert annotations")?;
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "Converted annotations: {}",
            output.display()
        )));
    }

    let mut merger = CsvTextMerger::new();
    if let Some(bucket) = interim_bucket.as_ref() {
        merger = merger.with_interim_bucket(bucket);
    }

    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RouterEvent>();
    let mut router =
        Router::new(&settings, &s3_settings, &paths, &merger, http).with_events(evt_tx);

    // The router is dropped at the end of `pipeline`, which closes the event channel.
    let pipeline = async move {
        let result = router.run().await;
        (result, router.report())
    };
    let forward = async {
        while let Some(event) = evt_rx.recv().await {
            let line = event.to_message();
            let _ = out_tx.send(if args.json {
                OutputLine::Stderr(line)
            } else {
                OutputLine::Stdout(line)
            });
        }
    };
    let ((result, report), ()) = tokio::join!(pipeline, forward);

    let success = result.context("pipeline run aborted")?;
    handle_exports(args, &report, out_tx)?;
    render_report(args, &report, out_tx)?;
    Ok(success)
}

fn settings_handler(args: &Cli) -> SettingsHandler {
    let mut handler = SettingsHandler::new(&args.root, &args.project_name);
    if let Some(path) = args.settings.as_ref() {
        handler = handler.with_main_path(path);
    }
    if let Some(path) = args.s3_settings.as_ref() {
        handler = handler.with_s3_path(path);
    }
    handler
}

fn build_http_client(args: &Cli) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(format!(
        "extraction-router/{}",
        env!("CARGO_PKG_VERSION")
    ));
    if let Some(timeout) = args.connect_timeout.as_ref() {
        builder = builder.connect_timeout(**timeout);
    }
    builder.build().context("failed to build HTTP client")
}

fn render_report(
    args: &Cli,
    report: &RunReport,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    if args.json {
        let out = serde_json::to_string_pretty(report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
        return Ok(());
    }
    for line in crate::text_summary::build_text_summary(report).lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    Ok(())
}

/// Handle export operations requested on the command line.
fn handle_exports(
    args: &Cli,
    report: &RunReport,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    if let Some(path) = args.export_json.as_deref() {
        let out = serde_json::to_string_pretty(report)?;
        std::fs::write(path, out)
            .with_context(|| format!("failed to export JSON to {}", path.display()))?;
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "Exported JSON: {}",
            path.display()
        )));
    }
    Ok(())
}
