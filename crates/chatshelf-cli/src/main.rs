//! chatshelf - headless inspector for the chatshelf data layer.
//!
//! Builds the same `DataLayer` a UI would and prints what it would render,
//! as JSON by default or one line per entry with `--brief`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chatshelf_core::utils::truncate_string;
use chatshelf_core::{Config, DataLayer, FileStorage, HttpSource, LogNotifier};

const USAGE: &str = "Usage:
  chatshelf [--brief] characters [search]
  chatshelf [--brief] chats <character> [search]
  chatshelf [--brief] folders [character]
  chatshelf [--brief] personas";

/// Width of the last-message preview in brief output
const PREVIEW_WIDTH: usize = 60;

enum Command {
    Characters { search: String },
    Chats { character: String, search: String },
    Folders { character: Option<String> },
    Personas,
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG to control the level and CHATSHELF_LOG_DIR to also write a
/// daily log file. The returned guard flushes the file writer on drop.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    match std::env::var_os("CHATSHELF_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "chatshelf.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

fn parse_args(args: &[String]) -> Result<(Command, bool)> {
    let brief = args.iter().any(|a| a == "--brief");
    let rest: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .filter(|a| *a != "--brief")
        .collect();

    let command = match rest.as_slice() {
        ["characters"] => Command::Characters {
            search: String::new(),
        },
        ["characters", search] => Command::Characters {
            search: search.to_string(),
        },
        ["chats", character] => Command::Chats {
            character: character.to_string(),
            search: String::new(),
        },
        ["chats", character, search] => Command::Chats {
            character: character.to_string(),
            search: search.to_string(),
        },
        ["folders"] => Command::Folders { character: None },
        ["folders", character] => Command::Folders {
            character: Some(character.to_string()),
        },
        ["personas"] => Command::Personas,
        [] => bail!("No command given"),
        other => bail!("Unrecognized arguments: {}", other.join(" ")),
    };
    Ok((command, brief))
}

fn star(is_favorite: bool) -> &'static str {
    if is_favorite {
        "*"
    } else {
        " "
    }
}

async fn run(layer: &DataLayer, command: Command, brief: bool) -> Result<()> {
    match command {
        Command::Characters { search } => {
            let entries = layer.sorted_characters(&search).await;
            if brief {
                for entry in &entries {
                    let count = entry
                        .chat_count
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "?".to_string());
                    println!(
                        "{} {} ({} chats) {}",
                        star(entry.is_favorite),
                        entry.character.display_name(),
                        count,
                        entry.character.id()
                    );
                }
            } else {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            }
        }
        Command::Chats { character, search } => {
            let organized = layer.organized_chats(&character, &search).await;
            if brief {
                for chat in &organized.chats {
                    println!(
                        "{} {} [{}] {} msgs  {}",
                        star(chat.is_favorite),
                        chat.record.file_name,
                        chat.folder_name,
                        chat.record.message_count,
                        truncate_string(&chat.record.preview, PREVIEW_WIDTH)
                    );
                }
                println!(
                    "{} chats, {} messages",
                    organized.stats.chat_count, organized.stats.message_count
                );
            } else {
                println!("{}", serde_json::to_string_pretty(&organized.chats)?);
            }
        }
        Command::Folders { character } => {
            let folders = layer.organization().folders();
            let counts = match character {
                Some(ref id) => Some(layer.folder_counts(id).await),
                None => None,
            };
            let count_of = |id: &str| counts.as_ref().map(|c| c.get(id).copied().unwrap_or(0));

            if brief {
                for folder in &folders {
                    match count_of(&folder.id) {
                        Some(n) => println!("{} ({}) {}", folder.name, n, folder.id),
                        None => println!("{} {}", folder.name, folder.id),
                    }
                }
            } else {
                let rows: Vec<serde_json::Value> = folders
                    .iter()
                    .map(|f| {
                        json!({
                            "id": f.id,
                            "name": f.name,
                            "isSystem": f.is_system,
                            "order": f.order,
                            "count": count_of(&f.id),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
        }
        Command::Personas => {
            let personas = layer
                .personas()
                .await
                .context("Failed to load personas")?;
            if brief {
                for persona in personas.iter() {
                    println!("{} {}", persona.name, persona.key);
                }
            } else {
                println!("{}", serde_json::to_string_pretty(personas.as_slice())?);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, brief) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let mut config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Could not load config, using defaults");
        Config::default()
    });
    if let Ok(url) = std::env::var("CHATSHELF_API_URL") {
        config.api.base_url = url;
    }
    info!(base_url = %config.api.base_url, "chatshelf starting");

    let source = HttpSource::new(&config.api).context("Failed to build HTTP client")?;
    let storage = FileStorage::new(config.data_dir()?, config.storage.quota_bytes)
        .context("Failed to open data directory")?;
    let layer = DataLayer::new(
        config,
        Arc::new(source),
        Arc::new(storage),
        Arc::new(LogNotifier),
    );

    run(&layer, command, brief).await
}
