use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pagegen_core::ids::{JobId, UnitId};
use pagegen_core::model::DocumentSnapshot;
use pagegen_engine::{
    EngineConfig, EngineEvent, GenerationBackend, OrchestratorContext, SubmitOutcome,
};
use pagegen_http::HttpBackend;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pagegenctl", version, about = "Generation-job orchestration client")]
struct Cli {
    /// Backend base URL.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    backend_url: String,

    /// Document to operate on.
    #[arg(long)]
    document_id: String,

    /// Where elapsed-time state is kept across invocations.
    #[arg(long, default_value = ".pagegen/elapsed.json")]
    ledger_path: PathBuf,

    /// Poll cadence for job status, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    poll_interval_ms: u64,

    /// Debounce window for buffered edits, in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    debounce_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the document as the backend serves it.
    Show,
    /// Pull the latest server snapshot and report what changed.
    Sync,
    /// Per-unit status summary, including elapsed generation time.
    Status,
    /// Submit generation for one or more units and watch to completion.
    Generate {
        #[arg(required = true)]
        unit_ids: Vec<String>,
        /// Extra options forwarded to the backend, as a JSON object.
        #[arg(long)]
        options: Option<String>,
        /// Exit right after submission instead of watching the job.
        #[arg(long)]
        no_watch: bool,
    },
    /// Apply key=value field edits to a unit and save them.
    Edit {
        unit_id: String,
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// Persist a new unit order. Units not listed keep their place after
    /// the listed ones.
    Reorder {
        #[arg(required = true)]
        unit_ids: Vec<String>,
    },
    /// Clear a unit's generated artifact.
    Clear { unit_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let document_id = pagegen_core::ids::DocumentId::from_str(cli.document_id.as_str());
    let backend: Arc<dyn GenerationBackend> = Arc::new(HttpBackend::new(&cli.backend_url));
    let config = EngineConfig {
        poll_interval_ms: cli.poll_interval_ms,
        debounce_ms: cli.debounce_ms,
        ledger_path: Some(cli.ledger_path.clone()),
        ..EngineConfig::default()
    };
    let (ctx, mut events) = OrchestratorContext::new(
        backend,
        document_id.clone(),
        DocumentSnapshot::new(document_id, ""),
        config,
    );
    ctx.sync_document()
        .await
        .context("initial document sync")?;

    match cli.command {
        Command::Show => {
            let doc = ctx.document().await;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Command::Sync => {
            let report = ctx.sync_document().await?;
            println!(
                "synced: {} added, {} removed, {} fields kept local",
                report.units_added, report.units_removed, report.fields_preserved
            );
        }
        Command::Status => {
            let doc = ctx.document().await;
            for unit in &doc.units {
                let mut line = format!("{}  {:?}", unit.id, unit.status);
                if let Some(elapsed) = ctx.elapsed_seconds(&unit.id).await {
                    line.push_str(&format!("  {elapsed}s"));
                }
                if let Some(artifact) = &unit.artifact_ref {
                    line.push_str(&format!("  {artifact}"));
                }
                if let Some(error) = &unit.error_message {
                    line.push_str(&format!("  error: {error}"));
                }
                println!("{line}");
            }
        }
        Command::Generate {
            unit_ids,
            options,
            no_watch,
        } => {
            let unit_ids: Vec<UnitId> = unit_ids.into_iter().map(UnitId::from_str).collect();
            let options = match options {
                Some(raw) => {
                    Some(serde_json::from_str(&raw).context("--options must be valid JSON")?)
                }
                None => None,
            };
            let outcome = ctx.submit_generation(&unit_ids, options).await?;
            match outcome {
                SubmitOutcome::Started { job_id, unit_ids } => {
                    println!("job {job_id} started for {} unit(s)", unit_ids.len());
                    if no_watch {
                        println!("run `pagegenctl status` to follow it");
                    } else {
                        watch_job(&mut events, &job_id).await?;
                        print_units(&ctx, &unit_ids).await;
                    }
                }
                SubmitOutcome::CompletedInline => {
                    println!("completed synchronously");
                    print_units(&ctx, &unit_ids).await;
                }
                SubmitOutcome::AllBusy => {
                    println!("all requested units already have jobs in flight");
                }
            }
        }
        Command::Edit { unit_id, fields } => {
            let unit_id = UnitId::from_str(unit_id);
            let patch = parse_fields(&fields)?;
            ctx.enqueue_edit(&unit_id, patch).await?;
            ctx.flush_all().await.context("saving edits")?;
            println!("saved {unit_id}");
        }
        Command::Reorder { unit_ids } => {
            let order: Vec<UnitId> = unit_ids.into_iter().map(UnitId::from_str).collect();
            ctx.reorder_units(&order).await?;
            println!("order saved");
        }
        Command::Clear { unit_id } => {
            let unit_id = UnitId::from_str(unit_id);
            ctx.clear_artifact(&unit_id).await?;
            println!("cleared {unit_id}");
        }
    }

    ctx.shutdown().await;
    Ok(())
}

/// Follows the event stream until the job reaches a terminal state.
async fn watch_job(
    events: &mut mpsc::Receiver<EngineEvent>,
    job_id: &JobId,
) -> anyhow::Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::JobProgress {
                job_id: id,
                progress,
            } if &id == job_id => {
                println!("progress: {}/{}", progress.completed, progress.total);
            }
            EngineEvent::JobCompleted {
                job_id: id,
                unit_ids,
            } if &id == job_id => {
                println!("completed: {} unit(s)", unit_ids.len());
                return Ok(());
            }
            EngineEvent::JobFailed(failure) if &failure.job_id == job_id => {
                anyhow::bail!("{failure}");
            }
            _ => {}
        }
    }
    anyhow::bail!("engine stopped before the job finished")
}

async fn print_units(ctx: &OrchestratorContext, unit_ids: &[UnitId]) {
    let doc = ctx.document().await;
    for unit_id in unit_ids {
        if let Some(unit) = doc.unit(unit_id) {
            match &unit.artifact_ref {
                Some(artifact) => println!("{}  {:?}  {artifact}", unit.id, unit.status),
                None => println!("{}  {:?}", unit.id, unit.status),
            }
        }
    }
}

/// `key=value` pairs. Values parse as JSON first and fall back to plain
/// strings, so `count=3` and `title=Hello world` both do what they look
/// like.
fn parse_fields(pairs: &[String]) -> anyhow::Result<BTreeMap<String, serde_json::Value>> {
    let mut fields = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("field '{pair}' is not key=value"))?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        fields.insert(key.to_string(), value);
    }
    Ok(fields)
}
