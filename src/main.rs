use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::Result;
use std::fmt::Write;
use std::path::PathBuf;
use tasklist::{Config, Snapshot, TaskListStore, UuidIds, config};

#[derive(Parser)]
#[command(name = "tasklist")]
#[command(about = "TaskList CLI - Ordered task list persisted as a single blob")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Path to the store directory (default: platform data directory)
    #[arg(short, long)]
    store_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a task
    Add {
        /// Task text; multiple words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Mark a task complete, or open again
    Toggle { id: String },

    /// Delete a task
    Delete { id: String },

    /// Show all tasks
    List,
}

fn main() -> Result<()> {
    // Logs go to stderr, the task list to stdout
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    let store_path = cli.store_path.unwrap_or_else(default_store_path);
    let store_dir = config::prepare_store_dir(&store_path)?;
    let settings = Config::load(&store_dir)?;
    let storage = config::open_storage(&store_dir, &settings)?;

    let mut store = TaskListStore::with_key(storage, UuidIds, settings.storage_key);
    store.load();

    // Redraw after every committed change
    store.subscribe(|snapshot| print!("{}", render(snapshot)));

    match cli.command {
        Commands::Add { text } => {
            if store.add(&text.join(" "))?.is_none() {
                println!("Nothing to add: task text is blank");
            }
        }
        Commands::Toggle { id } => {
            if !store.toggle(&id)? {
                println!("No task with id {}", id);
            }
        }
        Commands::Delete { id } => {
            if !store.delete(&id)? {
                println!("No task with id {}", id);
            }
        }
        Commands::List => {
            print!("{}", render(&store.snapshot()));
        }
    }

    Ok(())
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("tasklist"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn render(snapshot: &Snapshot<'_>) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{}", "My Tasks".bold());
    let _ = writeln!(out, "{} of {} tasks completed", snapshot.completed, snapshot.total);
    out.push('\n');

    if snapshot.tasks.is_empty() {
        let _ = writeln!(out, "{}", "No tasks yet. Add some tasks to get started!".dimmed());
        return out;
    }

    for task in snapshot.tasks {
        if task.completed {
            let _ = writeln!(
                out,
                "{} {}  {}",
                "[x]".green(),
                task.text.as_str().dimmed().strikethrough(),
                task.id.as_str().dimmed()
            );
        } else {
            let _ = writeln!(out, "[ ] {}  {}", task.text, task.id.as_str().dimmed());
        }
    }

    out
}
