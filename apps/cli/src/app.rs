//! Command implementations.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chunkup_protocol::FileMetadata;
use chunkup_transfer::{ResumeStore, SourceFile, TransferRate, UploadSession};
use chunkup_uploader::{UploadEvent, UploadOrchestrator};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::server_adapter::WsUploadServer;

/// Uploads `path`, resuming an interrupted upload of the same file.
pub async fn upload(config: &Config, path: &Path, assume_yes: bool) -> anyhow::Result<()> {
    let store = Arc::new(open_store(config)?);
    let file = SourceFile::open(path).with_context(|| format!("cannot read {}", path.display()))?;

    let resume = assume_yes || ask_resume(&store, &file).await?;

    let server = Arc::new(
        WsUploadServer::connect(&config.server_url)
            .await
            .with_context(|| format!("cannot connect to {}", config.server_url))?,
    );
    tracing::info!(url = %config.server_url, "connected");

    let mut orchestrator = UploadOrchestrator::new(server.clone(), store, config.upload_config());
    let printer = match orchestrator.take_events() {
        Some(events) => tokio::spawn(print_events(events)),
        None => anyhow::bail!("upload events already taken"),
    };

    let cancel = orchestrator.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT received, cancelling upload");
            cancel.cancel();
        }
    });

    let confirm = move |_: &FileMetadata, _: &UploadSession| resume;
    let result = orchestrator.run(&file, &confirm).await;

    interrupt.abort();
    // Dropping the orchestrator closes the event channel and ends the printer.
    drop(orchestrator);
    let _ = printer.await;
    server.close().await;

    let outcome = result?;
    println!("{}", outcome.artifact);
    Ok(())
}

/// Prints the interrupted upload, if any.
pub fn status(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let state = store.snapshot();

    match (state.file, state.session) {
        (Some(file), Some(session)) => {
            println!("file:            {} ({} bytes, {})", file.name, file.size, file.content_type);
            println!("file identity:   {}", session.file_identity);
            println!("upload identity: {}", session.upload_identity);
            println!(
                "committed:       {}/{} chunks of {} bytes",
                state.committed.len(),
                session.total_chunks,
                session.chunk_size
            );
        }
        _ => println!("no interrupted upload"),
    }
    Ok(())
}

/// Forgets the interrupted upload.
pub fn discard(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    if store.session().is_none() {
        println!("no interrupted upload");
        return Ok(());
    }
    store.clear()?;
    tracing::info!(path = %store.path().display(), "resume state discarded");
    Ok(())
}

fn open_store(config: &Config) -> anyhow::Result<ResumeStore> {
    let path = config.state_file();
    ResumeStore::open(path.clone())
        .with_context(|| format!("cannot open resume state {}", path.display()))
}

/// Asks on the terminal whether to resume, when `file` matches the stored upload.
async fn ask_resume(store: &ResumeStore, file: &SourceFile) -> anyhow::Result<bool> {
    let state = store.snapshot();
    let (Some(stored), Some(session)) = (state.file, state.session) else {
        return Ok(true);
    };
    if !stored.matches(&file.metadata) {
        return Ok(true);
    }

    let question = format!(
        "Resume upload of {} ({}/{} chunks committed)? [Y/n] ",
        stored.name,
        state.committed.len(),
        session.total_chunks
    );
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut stdout = std::io::stdout();
        stdout.write_all(question.as_bytes())?;
        stdout.flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    })
    .await??;

    Ok(parse_answer(&answer))
}

/// Empty input means yes.
fn parse_answer(answer: &str) -> bool {
    !matches!(answer.trim().to_ascii_lowercase().as_str(), "n" | "no")
}

async fn print_events(mut events: mpsc::Receiver<UploadEvent>) {
    let mut rate = TransferRate::default();

    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::Started {
                resumed,
                total_chunks,
                skipped,
            } => {
                if resumed {
                    eprintln!("resuming: {skipped}/{total_chunks} chunks already uploaded");
                } else {
                    eprintln!("uploading {total_chunks} chunks");
                }
                rate = TransferRate::default();
            }
            UploadEvent::Progress {
                overall,
                transferred,
                committed,
                transferred_bytes,
                total_bytes,
            } => {
                rate.record(transferred_bytes);
                let eta = rate
                    .eta(total_bytes.saturating_sub(transferred_bytes))
                    .map(format_duration)
                    .unwrap_or_else(|| "--".into());
                eprintln!(
                    "{overall:5.1}%  sent {transferred}  committed {committed}  {}/s  eta {eta}",
                    format_bytes(rate.bytes_per_second() as u64),
                );
            }
            UploadEvent::ChunkFailed { chunk_id, error } => {
                eprintln!("chunk {chunk_id} failed: {error}");
            }
            UploadEvent::Completed { artifact } => eprintln!("done: {artifact}"),
            UploadEvent::Failed { error } => {
                eprintln!("upload failed: {error}");
                eprintln!("run the same command again to resume");
            }
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}
