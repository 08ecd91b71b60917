//! notesync CLI - local-first notes that sync with a remote server.

mod config;
mod remote;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use notesync_core::{
    ConflictKind, ConnectivityFlag, ConnectivityProbe, LocalId, LocalStore, Note, NoteQuery,
    NoteService, RefreshOutcome, SkipReason, SyncReport,
};
use notesync_files::FilesStore;
use notesync_http::HttpRemote;
use notesync_sqlite::SqliteStore;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{find_notesync_dir, Backend, Config, NOTESYNC_DIR, SQLITE_FILE};
use remote::Remote;

const SHORT_ID_LEN: usize = 8;

type Service<S> = NoteService<S, Remote, ConnectivityFlag>;

#[derive(Parser)]
#[command(
    name = "notesync",
    about = "Local-first notes that sync with a remote server",
    version
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Remote server URL (overrides config.toml)
    #[arg(long, env = "NOTESYNC_SERVER", global = true)]
    server: Option<String>,
    /// Never contact the server
    #[arg(long, env = "NOTESYNC_OFFLINE", global = true)]
    offline: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new notesync directory in the current directory
    Init {
        /// Local storage backend
        #[arg(long, value_enum, default_value_t = Backend::Files)]
        backend: Backend,
        /// Delete existing notes and reinitialize
        #[arg(long)]
        reinitialize: bool,
    },
    /// Add a new note
    Add {
        /// Note title
        #[arg(long)]
        title: String,
        /// Comma-separated tags
        #[arg(long, default_value = "")]
        tags: String,
    },
    /// List notes, newest first
    Ls {
        /// Only notes carrying all of these comma-separated tags
        tags: Option<String>,
        /// Number of notes to show (0 for all)
        #[arg(short = 'n', long, default_value = "100")]
        head: usize,
    },
    /// Show one or more notes
    Show {
        /// Comma-separated note IDs (unique prefixes are accepted)
        ids: String,
    },
    /// Edit a note
    Edit {
        /// Note ID (a unique prefix is accepted)
        id: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New comma-separated tags
        #[arg(long)]
        tags: Option<String>,
    },
    /// Delete one or more notes
    Rm {
        /// Comma-separated note IDs (unique prefixes are accepted)
        ids: String,
    },
    /// List all tags
    Tags,
    /// Sync with the server once
    Refresh,
    /// Sync with the server periodically until interrupted
    Watch,
    /// Show how many notes are in each sync state
    Status,
}

impl Commands {
    /// Whether the command may call the server.
    fn uses_network(&self) -> bool {
        matches!(
            self,
            Commands::Add { .. }
                | Commands::Edit { .. }
                | Commands::Rm { .. }
                | Commands::Refresh
                | Commands::Watch
                | Commands::Status
        )
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Get the notesync directory path, or error if not initialized
fn get_notesync_dir() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    match find_notesync_dir(&cwd) {
        Some(dir) => Ok(dir),
        None => bail!("No .notesync directory found. Run 'notesync init' to initialize."),
    }
}

fn parse_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_ids(ids: &str) -> Vec<&str> {
    ids.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Resolve a full ID or unique ID prefix against the known IDs.
fn match_prefix(ids: &[LocalId], prefix: &str) -> Result<Option<LocalId>> {
    let prefix = prefix.trim().to_lowercase();
    if prefix.is_empty() {
        bail!("Empty note ID");
    }
    let matches: Vec<LocalId> = ids
        .iter()
        .filter(|id| id.to_string().starts_with(&prefix))
        .copied()
        .collect();
    match matches.as_slice() {
        [] => Ok(None),
        [id] => Ok(Some(*id)),
        _ => bail!(
            "Note ID '{}' is ambiguous ({} notes match)",
            prefix,
            matches.len()
        ),
    }
}

fn short_id(id: &LocalId) -> String {
    id.to_string().chars().take(SHORT_ID_LEN).collect()
}

fn format_note_line(note: &Note) -> String {
    format!(
        "{}: {} ({}) [{}] -- {}",
        short_id(&note.local_id),
        note.title,
        note.created_at.format("%Y-%m-%d %H:%M"),
        note.sync_state(),
        note.tags.join(",")
    )
}

fn print_report(report: &SyncReport) {
    println!(
        "Pushed {} created, {} edited, {} deleted; pulled {} adopted, {} new, {} updated, {} removed",
        report.created,
        report.edited,
        report.deleted,
        report.adopted,
        report.inserted,
        report.updated,
        report.removed
    );
    if report.skipped > 0 {
        println!("{} notes changed during sync and will be retried", report.skipped);
    }
    for conflict in &report.conflicts {
        let what = match conflict.kind {
            ConflictKind::SimultaneousEdit => "edited on both sides",
            ConflictKind::DeletedRemotely => "deleted on server, local edit discarded",
        };
        println!(
            "Conflict: note {} '{}' {}",
            short_id(&conflict.local_id),
            conflict.local_title,
            what
        );
    }
    for failure in &report.failures {
        eprintln!(
            "Note {} not synced: {}",
            short_id(&failure.local_id),
            failure.message
        );
    }
}

fn open_remote(config: &Config) -> Result<Remote> {
    match &config.server_url {
        Some(url) => {
            let remote = HttpRemote::with_timeout(url, config.request_timeout())
                .with_context(|| format!("Invalid server URL: {}", url))?;
            Ok(Remote::Http(remote))
        }
        None => Ok(Remote::Unconfigured),
    }
}

fn init(dir: &Path, backend: Backend, server: Option<String>, reinitialize: bool) -> Result<()> {
    if dir.exists() {
        if reinitialize {
            std::fs::remove_dir_all(dir)
                .context("Failed to remove existing .notesync directory")?;
        } else {
            bail!("notesync is already initialized in this directory. Use --reinitialize to delete and recreate.");
        }
    }
    std::fs::create_dir_all(dir).context("Failed to create .notesync directory")?;

    let mut config = Config {
        backend,
        ..Default::default()
    };
    config.set_server_url(server);
    config.save(dir)?;

    match backend {
        Backend::Files => {
            FilesStore::open(dir).context("Failed to create note store")?;
        }
        Backend::Sqlite => {
            SqliteStore::open(dir.join(SQLITE_FILE)).context("Failed to create note store")?;
        }
    }

    let verb = if reinitialize { "Reinitialized" } else { "Initialized" };
    println!("{} notesync in {}", verb, dir.display());
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Init {
        backend,
        reinitialize,
    } = cli.command
    {
        return init(Path::new(NOTESYNC_DIR), backend, cli.server, reinitialize);
    }

    let dir = get_notesync_dir()?;
    let mut config = Config::load(&dir)?;
    config.set_server_url(cli.server);
    config.offline |= cli.offline;

    let remote = open_remote(&config)?;
    let flag = ConnectivityFlag::new(false);
    if !config.offline && remote.is_configured() && cli.command.uses_network() {
        flag.set_online(remote.ping().await);
    }
    info!(online = flag.is_online(), offline = config.offline, "connectivity");

    match config.backend {
        Backend::Files => {
            let store = FilesStore::open(&dir).context("Failed to open note store")?;
            let service = NoteService::new(store, remote, flag.clone())
                .with_conflict_window(config.conflict_window());
            run(&service, &flag, &config, cli.command).await
        }
        Backend::Sqlite => {
            let store =
                SqliteStore::open(dir.join(SQLITE_FILE)).context("Failed to open note store")?;
            let service = NoteService::new(store, remote, flag.clone())
                .with_conflict_window(config.conflict_window());
            run(&service, &flag, &config, cli.command).await
        }
    }
}

async fn resolve<S: LocalStore>(service: &Service<S>, prefix: &str) -> Result<Option<LocalId>> {
    let ids: Vec<LocalId> = service
        .list_notes(NoteQuery::default())
        .await?
        .iter()
        .map(|n| n.local_id)
        .collect();
    match_prefix(&ids, prefix)
}

async fn run<S: LocalStore>(
    service: &Service<S>,
    flag: &ConnectivityFlag,
    config: &Config,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Init { .. } => unreachable!(),

        Commands::Add { title, tags } => {
            let note = service.create_note(&title, &parse_tags(&tags))?;
            let note = service.submit_note(note).await?;
            println!("Added note {} ({})", note.local_id, note.sync_state());
        }

        Commands::Ls { tags, head } => {
            let tags = tags.map(|t| parse_tags(&t));
            let query = NoteQuery {
                tags: tags.clone(),
                limit: (head > 0).then_some(head),
            };
            let notes = service.list_notes(query).await?;
            let shown = notes.len();

            for note in &notes {
                println!("{}", format_note_line(note));
            }

            if head > 0 && shown >= head {
                let total = service
                    .list_notes(NoteQuery { tags, limit: None })
                    .await?
                    .len();
                if total > head {
                    println!("[Showing the latest {}/{} notes]", head, total);
                }
            }
        }

        Commands::Show { ids } => {
            let ids = split_ids(&ids);
            if ids.is_empty() {
                bail!("No note IDs provided");
            }

            let mut not_found = Vec::new();
            let mut first = true;

            for prefix in ids {
                let note = match resolve(service, prefix).await? {
                    Some(id) => service.get_note(&id).await?,
                    None => None,
                };
                let Some(note) = note else {
                    not_found.push(prefix);
                    continue;
                };

                if !first {
                    println!("\n{}\n", "=".repeat(40));
                }
                first = false;

                println!("# {}\n", note.title);
                println!("ID: {}", note.local_id);
                if let Some(server_id) = &note.server_id {
                    println!("Server ID: {}", server_id);
                }
                println!("State: {}", note.sync_state());
                println!("Created: {}", note.created_at);
                println!("Last modified: {}", note.updated_at);
                println!("Tags: {}", note.tags.join(","));
            }

            if !not_found.is_empty() {
                for id in &not_found {
                    eprintln!("Note {} not found", id);
                }
                std::process::exit(1);
            }
        }

        Commands::Edit { id, title, tags } => {
            if title.is_none() && tags.is_none() {
                bail!("Nothing to update");
            }
            let Some(local_id) = resolve(service, &id).await? else {
                bail!("Note {} not found", id);
            };
            let current = service
                .get_note(&local_id)
                .await?
                .with_context(|| format!("Note {} not found", id))?;

            let title = title.unwrap_or(current.title);
            let tags = tags.map(|t| parse_tags(&t));
            let note = service.edit_note(&local_id, &title, tags.as_deref()).await?;
            println!("Edited note {} ({})", short_id(&note.local_id), note.sync_state());
        }

        Commands::Rm { ids } => {
            let ids = split_ids(&ids);
            if ids.is_empty() {
                bail!("No note IDs provided");
            }

            let mut not_found = Vec::new();
            for prefix in ids {
                let deleted = match resolve(service, prefix).await? {
                    Some(id) => service.delete_note(&id).await?,
                    None => false,
                };
                if deleted {
                    println!("Deleted note {}", prefix);
                } else {
                    not_found.push(prefix);
                }
            }

            if !not_found.is_empty() {
                for id in &not_found {
                    eprintln!("Note {} not found", id);
                }
                std::process::exit(1);
            }
        }

        Commands::Tags => {
            for tag in service.list_tags().await? {
                let noun = if tag.count == 1 { "note" } else { "notes" };
                println!("{} ({} {})", tag.name, tag.count, noun);
            }
        }

        Commands::Refresh => match service.refresh().await? {
            RefreshOutcome::Completed(report) => print_report(&report),
            RefreshOutcome::Skipped(SkipReason::Offline) => {
                println!("Offline; nothing synced")
            }
            RefreshOutcome::Skipped(SkipReason::InFlight) => {
                println!("A sync is already running")
            }
        },

        Commands::Watch => {
            let mut interval = tokio::time::interval(config.refresh_interval());
            loop {
                interval.tick().await;
                if !config.offline && service.engine().remote().is_configured() {
                    flag.set_online(service.engine().remote().ping().await);
                }
                match service.refresh().await {
                    Ok(RefreshOutcome::Completed(report)) => print_report(&report),
                    Ok(RefreshOutcome::Skipped(reason)) => info!(?reason, "refresh skipped"),
                    Err(e) => warn!(error = %e, "refresh failed"),
                }
            }
        }

        Commands::Status => {
            let counts = service.status().await?;
            let connection = match &config.server_url {
                None => "no server configured".to_string(),
                Some(url) if config.offline => format!("{} (offline)", url),
                Some(url) if flag.is_online() => format!("{} (online)", url),
                Some(url) => format!("{} (unreachable)", url),
            };
            println!("Server: {}", connection);
            println!("Synced: {}", counts.synced);
            println!("Local only: {}", counts.local_only);
            println!("Pending edit: {}", counts.pending_edit);
            println!("Pending delete: {}", counts.pending_delete);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<LocalId> {
        (0..n).map(|_| LocalId::new()).collect()
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn test_match_full_id() {
        let ids = ids(3);
        let full = ids[1].to_string();
        assert_eq!(match_prefix(&ids, &full).unwrap(), Some(ids[1]));
        assert_eq!(match_prefix(&ids, &full.to_uppercase()).unwrap(), Some(ids[1]));
    }

    #[test]
    fn test_match_unique_prefix() {
        let ids = ids(1);
        let prefix = short_id(&ids[0]);
        assert_eq!(match_prefix(&ids, &prefix).unwrap(), Some(ids[0]));
    }

    #[test]
    fn test_match_unknown_and_ambiguous() {
        let a: LocalId = "aaaaaaaa-0000-4000-8000-000000000001".parse().unwrap();
        let b: LocalId = "aaaaaaaa-0000-4000-8000-000000000002".parse().unwrap();
        let ids = vec![a, b];

        assert_eq!(match_prefix(&ids, "bbbb").unwrap(), None);
        assert!(match_prefix(&ids, "aaaa").is_err());
        assert_eq!(
            match_prefix(&ids, "aaaaaaaa-0000-4000-8000-000000000002").unwrap(),
            Some(b)
        );
        assert!(match_prefix(&ids, " ").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "notesync", "-vv", "--offline", "edit", "abcd", "--title", "New", "--tags", "x,y",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.offline);
        assert!(cli.command.uses_network());
        assert!(matches!(
            cli.command,
            Commands::Edit { ref id, title: Some(_), tags: Some(_) } if id == "abcd"
        ));
    }

    #[test]
    fn test_init_creates_config() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join(NOTESYNC_DIR);
        init(&dir, Backend::Sqlite, Some("http://localhost:9000".into()), false).unwrap();

        let config = Config::load(&dir).unwrap();
        assert_eq!(config.backend, Backend::Sqlite);
        assert_eq!(config.server_url.as_deref(), Some("http://localhost:9000"));
        assert!(dir.join(SQLITE_FILE).exists());

        assert!(init(&dir, Backend::Files, None, false).is_err());
        init(&dir, Backend::Files, None, true).unwrap();
        assert_eq!(Config::load(&dir).unwrap().backend, Backend::Files);
    }
}
