use std::io::BufRead;
use std::sync::{mpsc, Arc, RwLock};
use std::time::Duration;

use anyhow::bail;
use clap::Parser;

mod app;
mod classify;
mod cli;
mod config;
mod nid;
mod notes;
mod search;
mod storage;
#[cfg(test)]
mod tests;

use app::{task_runner, EnrichOpts};
use classify::ModelTier;
use config::Config;
use inquire::error::InquireResult;
use nid::NoteId;
use notes::{Note, NoteCreate};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("noteforge=info")),
        )
        .init();

    let args = cli::Args::parse();

    let config = Arc::new(RwLock::new(Config::load()));
    let app = app::App::new(config.clone())?;

    match args.command {
        cli::Command::Add { content, rag } => {
            let note = app.create(
                NoteCreate {
                    content,
                    rag_enabled: rag,
                },
                EnrichOpts::default(),
            )?;
            println!("{}", serde_json::to_string_pretty(&note).unwrap());
            Ok(())
        }

        cli::Command::Search {
            query,
            limit,
            interactive,
        } => {
            if interactive {
                return run_interactive_search(&app);
            }

            let mut notes = app.search(query.as_deref().unwrap_or_default());
            if let Some(limit) = limit {
                notes.truncate(limit);
            }
            print_notes(&notes);
            Ok(())
        }

        cli::Command::Edit { id, content } => {
            let note = app.edit(&NoteId::from(id), content, EnrichOpts::default())?;
            println!("{}", serde_json::to_string_pretty(&note).unwrap());
            Ok(())
        }

        cli::Command::Delete { id, yes } => {
            let id = NoteId::from(id);
            let Some(note) = app.get(&id) else {
                bail!("note {id} not found");
            };

            if !yes {
                match inquire::prompt_confirmation(format!(
                    "Delete \"{}\"? This cannot be undone.",
                    note.headline
                )) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }

            app.delete(&id)?;
            println!("deleted");
            Ok(())
        }

        cli::Command::Reformat { id } => {
            let id = NoteId::from(id);
            app.reformat(&id, EnrichOpts::default())?;
            if let Some(note) = app.get(&id) {
                println!("{}", serde_json::to_string_pretty(&note).unwrap());
            }
            Ok(())
        }

        cli::Command::Revert { id } => {
            let note = app.revert(&NoteId::from(id))?;
            println!("{}", serde_json::to_string_pretty(&note).unwrap());
            Ok(())
        }

        cli::Command::Refresh { id } => {
            let id = NoteId::from(id);
            app.refresh(&id, EnrichOpts::default())?;
            if let Some(note) = app.get(&id) {
                println!("{}", serde_json::to_string_pretty(&note).unwrap());
            }
            Ok(())
        }

        cli::Command::RefreshAll {} => run_refresh_all(&app),

        cli::Command::Import { file } => {
            let data = std::fs::read(&file)?;
            let count = app.import(&data)?;
            println!("{count} notes imported");
            Ok(())
        }

        cli::Command::Export { file } => {
            let data = app.export()?;
            match file {
                Some(path) => {
                    std::fs::write(&path, &data)?;
                    println!("exported to {}", path.display());
                }
                None => println!("{}", String::from_utf8_lossy(&data)),
            }
            Ok(())
        }

        cli::Command::Tier { tier } => {
            let Some(tier) = ModelTier::parse(&tier) else {
                bail!("unknown tier \"{tier}\", expected flash or pro");
            };
            app.set_model_tier(tier);
            println!("model tier set to {tier}");
            Ok(())
        }

        cli::Command::Status {} => {
            let notes = app.snapshot();
            let embedded = notes.iter().filter(|n| n.embedding.is_some()).count();
            println!("notes: {}", notes.len());
            println!("embedded: {embedded}");
            println!("indexed: {}", app.indexed_count());
            println!(
                "ai: {}",
                if app.ai_available() { "available" } else { "unavailable" }
            );
            println!(
                "tier: {}",
                config.read().unwrap().classifier.tier
            );
            Ok(())
        }
    }
}

fn print_notes(notes: &[Note]) {
    println!("{}", serde_json::to_string_pretty(notes).unwrap());
}

/// Drive the whole-collection refresh on a worker thread while rendering the
/// sequential `(current, total)` progress counter.
fn run_refresh_all(app: &app::App) -> anyhow::Result<()> {
    let deps = app.pipeline_deps();
    let progress = deps.refresh_progress.clone();
    let total = app.snapshot().len() as u64;

    if total == 0 {
        println!("nothing to refresh");
        return Ok(());
    }

    let handle = std::thread::spawn(move || task_runner::run_refresh_all(&deps));

    let bar = indicatif::ProgressBar::new(total);
    while !handle.is_finished() {
        if let Some((current, _)) = progress.snapshot() {
            bar.set_position(current as u64);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    bar.finish();

    match handle.join() {
        Ok(result) => result?,
        Err(err) => bail!("refresh worker panicked: {err:?}"),
    }

    println!("refreshed {total} notes, index rebuilt");
    Ok(())
}

/// Line-based live search: each line of stdin is debounced and the latest
/// result set is printed as it lands.
fn run_interactive_search(app: &app::App) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel();

    let stdin = std::io::stdin();
    println!("type a query per line, empty line lists all, ctrl-d exits");

    for line in stdin.lock().lines() {
        let line = line?;
        app.search_debounced(line, tx.clone());

        // only the newest submission ever delivers; older ones are discarded
        if let Ok(response) = rx.recv_timeout(Duration::from_millis(600)) {
            let notes = app.resolve_outcome(&response.query, response.outcome);
            println!("-- {} results for \"{}\"", notes.len(), response.query);
            for note in notes.iter().take(10) {
                println!("{}  [{}] {}", note.id, note.category, note.headline);
            }
        }
    }

    Ok(())
}
