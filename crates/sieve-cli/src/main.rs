use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sieve_core::app::{App, AppBuilder, DownloadDescriptor};
use sieve_core::{Config, TaskId, TaskStatus, TaskStatusView};

#[derive(Debug, Parser)]
#[command(name = "sieve", version, about = "Submit media files for transformation and fetch the results")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit files, wait for every task to finish, then fetch the outputs.
    Submit {
        /// Files to submit.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Where streamed outputs are written.
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Status polling interval in milliseconds.
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,

        /// Print status updates and download descriptors as JSON lines.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env はなくてもよい
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Submit {
            files,
            out,
            poll_ms,
            json,
        } => {
            let config = Config::from_env()?;
            let app = AppBuilder::new(config)
                .build()
                .await
                .context("failed to start")?;
            let result = submit_and_fetch(&app, &files, &out, Duration::from_millis(poll_ms.max(10)), json).await;
            app.shutdown().await;
            result
        }
    }
}

async fn submit_and_fetch(
    app: &App,
    files: &[PathBuf],
    out: &Path,
    poll: Duration,
    json: bool,
) -> anyhow::Result<()> {
    let mut pending: HashMap<TaskId, PathBuf> = HashMap::new();
    for file in files {
        let data = tokio::fs::read(file)
            .await
            .with_context(|| format!("cannot read {}", file.display()))?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = app
            .submit(data.into(), &name)
            .await
            .with_context(|| format!("submission of {} rejected", file.display()))?;
        info!(task_id = %id, file = %file.display(), "submitted");
        pending.insert(id, file.clone());
    }

    let mut last_seen: HashMap<TaskId, (TaskStatus, u8)> = HashMap::new();
    let mut failed = 0usize;
    while !pending.is_empty() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!(remaining = pending.len(), "interrupted, waiting for running tasks to finish");
                bail!("interrupted");
            }
            _ = sleep(poll) => {}
        }

        let ids: Vec<TaskId> = pending.keys().copied().collect();
        for id in ids {
            let view = app.status(id).await?;
            let seen = (view.status, view.progress);
            if last_seen.insert(id, seen) != Some(seen) {
                report(&view, json)?;
            }
            if !view.is_terminal() {
                continue;
            }
            let source = pending.remove(&id).unwrap_or_default();
            if view.status == TaskStatus::Error {
                failed += 1;
                eprintln!(
                    "{} failed: {}",
                    source.display(),
                    view.error.as_deref().unwrap_or("unknown error")
                );
                continue;
            }
            fetch(app, id, view.download, out, json).await?;
        }
    }

    if failed > 0 {
        bail!("{failed} of {} tasks failed", files.len());
    }
    Ok(())
}

fn report(view: &TaskStatusView, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(view)?);
    } else {
        println!("{} {} {}%", view.task_id, view.status, view.progress);
    }
    Ok(())
}

async fn fetch(
    app: &App,
    id: TaskId,
    polled: Option<DownloadDescriptor>,
    out: &Path,
    json: bool,
) -> anyhow::Result<()> {
    // 完了ステータスには記述子が付いている（json モードでは出力済み）
    let descriptor = match polled {
        Some(descriptor) => descriptor,
        None => {
            let descriptor = app.resolve_download(id).await?;
            if json {
                println!("{}", serde_json::to_string(&descriptor)?);
            }
            descriptor
        }
    };
    match descriptor {
        DownloadDescriptor::Redirect { url, expires_at } => {
            if !json {
                println!("{id} download (valid until {expires_at}): {url}");
            }
        }
        DownloadDescriptor::Stream {
            location,
            file_name,
        } => {
            let data = app.router.open_stream(&location).await?;
            tokio::fs::create_dir_all(out)
                .await
                .with_context(|| format!("cannot create {}", out.display()))?;
            let target = out.join(&file_name);
            tokio::fs::write(&target, &data)
                .await
                .with_context(|| format!("cannot write {}", target.display()))?;
            if !json {
                println!("{id} saved to {}", target.display());
            }
        }
    }
    Ok(())
}
