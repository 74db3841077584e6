use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use learnledger::backend::HttpBackend;
use learnledger::config::AppConfig;
use learnledger::progress::ProgressStore;
use learnledger::storage::{KvStorage, StorageManager};
use learnledger::sync::SyncRegistry;

#[derive(Parser)]
#[command(name = "learnledger-cli", about = "Inspect and sync local learning progress", version)]
struct Cli {
    /// Use a specific data directory (default: platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show aggregate learning statistics for a user
    Stats {
        /// User identifier
        user: String,
    },

    /// List a user's courses with progress
    Courses {
        user: String,
    },

    /// Export a user's progress as JSON
    Export {
        user: String,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Import a previously exported progress file
    Import {
        user: String,
        file: PathBuf,
    },

    /// Drain the user's pending sync queue against the backend
    Sync {
        user: String,
        /// Keep running and sync on the configured interval
        #[arg(long)]
        watch: bool,
    },

    /// Show storage usage across all locally stored users
    Storage,

    /// Evict least-recently-active users beyond the cap
    Cleanup {
        /// User whose data must be retained
        user: String,
    },

    /// Wipe all local progress for a user
    Clear {
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = AppConfig::load();

    let data_dir = cli
        .data_dir
        .or_else(|| config.data_dir.clone())
        .map(Ok)
        .unwrap_or_else(KvStorage::default_data_dir)
        .context("could not determine data directory")?;
    let storage = Arc::new(Mutex::new(
        KvStorage::new(data_dir).context("could not open storage")?,
    ));

    match cli.command {
        Command::Stats { user } => {
            let store = ProgressStore::new(user, Arc::clone(&storage));
            let stats = store.get_learning_statistics();
            println!("Time spent:        {}s", stats.total_time_spent);
            println!("Completed modules: {}", stats.completed_modules);
            println!("Completed courses: {}", stats.completed_courses);
            println!("Bookmarks:         {}", stats.bookmark_count);
            println!("Notes:             {}", stats.note_count);
            if !stats.recent_courses.is_empty() {
                let ids: Vec<String> =
                    stats.recent_courses.iter().map(|id| id.to_string()).collect();
                println!("Recent courses:    {}", ids.join(", "));
            }
        }

        Command::Courses { user } => {
            let store = ProgressStore::new(user, Arc::clone(&storage));
            let data = store.get_all_progress();
            if data.courses.is_empty() {
                println!("No course progress recorded.");
            }
            let mut courses: Vec<_> = data.courses.values().collect();
            courses.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
            for course in courses {
                let done = if course.is_completed { " [completed]" } else { "" };
                println!(
                    "{:>6}  {:<32} {:>3}%  modules {}/{}{}",
                    course.course_id,
                    course.course_name,
                    course.overall_progress,
                    course
                        .module_progresses
                        .values()
                        .filter(|m| m.is_completed)
                        .count(),
                    course.total_modules,
                    done,
                );
            }
        }

        Command::Export { user, out } => {
            let store = ProgressStore::new(user, Arc::clone(&storage));
            let json = store.export_progress();
            match out {
                Some(path) => {
                    fs::write(&path, &json)
                        .with_context(|| format!("could not write {:?}", path))?;
                    println!("Exported to {:?}", path);
                }
                None => println!("{}", json),
            }
        }

        Command::Import { user, file } => {
            let json = fs::read_to_string(&file)
                .with_context(|| format!("could not read {:?}", file))?;
            let store = ProgressStore::new(user, Arc::clone(&storage));
            if !store.import_progress(&json) {
                bail!("import refused (wrong owner or invalid data)");
            }
            println!("Import complete.");
        }

        Command::Sync { user, watch } => {
            let backend = Arc::new(
                HttpBackend::new(config.backend_url.clone(), config.auth_token.clone())
                    .map_err(|e| anyhow::anyhow!("backend setup failed: {}", e))?,
            );
            let registry = SyncRegistry::new(Arc::clone(&storage), backend);
            let service = registry.get_or_create(&user);

            if watch {
                service.start(config.sync_interval_minutes);
                println!(
                    "Syncing every {} minute(s); press Ctrl-C to stop.",
                    config.sync_interval_minutes
                );
                tokio::signal::ctrl_c().await?;
                registry.release(&user);
            } else if service.sync_with_backend().await {
                println!("Sync complete.");
            } else {
                bail!("sync failed; queue retained for retry");
            }
        }

        Command::Storage => {
            let manager = StorageManager::new(Arc::clone(&storage));
            let summary = manager.usage_summary()?;
            println!("Total: {} bytes", summary.total_bytes);
            for user in summary.users {
                println!("{:>10} bytes  {}", user.bytes, user.user_id);
            }
        }

        Command::Cleanup { user } => {
            let manager = StorageManager::new(Arc::clone(&storage));
            let cleared = manager.cleanup_inactive_users(&user)?;
            println!("Cleared {} inactive user(s).", cleared);
        }

        Command::Clear { user } => {
            let store = ProgressStore::new(user.clone(), Arc::clone(&storage));
            store.clear_all_progress();
            println!("Cleared local progress for {}.", user);
        }
    }

    Ok(())
}
