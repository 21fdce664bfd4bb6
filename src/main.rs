use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use linestage::config::{self, Config};
use linestage::session::RepositorySession;
use linestage::types::{DiffLine, DiffResult, DiffSide, DiffTarget, Hunk, PathChange, ViewMode};

#[derive(Parser, Debug)]
#[command(
    name = "linestage",
    about = "Stage, unstage and discard individual hunks and lines"
)]
pub struct Cli {
    /// Repository to operate on (any path inside its work tree)
    #[arg(short = 'r', long, default_value = ".")]
    repo: PathBuf,

    /// Number of context lines around each change
    #[arg(short = 'C', long = "context-lines", env = "LINESTAGE_CONTEXT_LINES", default_value_t = config::DEFAULT_CONTEXT_LINES)]
    context_lines: usize,

    /// Size of the blocking I/O worker pool
    #[arg(long, env = "LINESTAGE_IO_THREADS", default_value_t = 4)]
    io_threads: usize,

    /// Quiet period before a batch of file changes is reported
    #[arg(long, env = "LINESTAGE_DEBOUNCE_MS", default_value_t = 200)]
    debounce_ms: u64,

    /// Glob pattern (relative to the work tree) the watcher ignores; repeatable
    #[arg(long = "ignore", value_name = "GLOB")]
    ignore_patterns: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List unstaged and staged changes
    Status,
    /// Show the hunks of one file with selectable line numbers
    Diff {
        path: PathBuf,
        /// Show staged changes (HEAD against the index)
        #[arg(long)]
        staged: bool,
        /// Side-by-side layout
        #[arg(long)]
        split: bool,
    },
    /// Stage a file, one hunk of it, or selected lines of a hunk
    Stage(Selection),
    /// Unstage a file, one hunk of it, or selected lines of a hunk
    Unstage(Selection),
    /// Discard a hunk, or selected lines of it, from the work tree
    Reset(Selection),
    /// Stage every change, like `git add -A`
    StageAll,
    /// Reset the index to HEAD
    UnstageAll,
    /// Print refresh signals caused by external changes until interrupted
    Watch,
}

#[derive(clap::Args, Debug)]
struct Selection {
    path: PathBuf,
    /// Hunk number as printed by `diff`
    #[arg(long)]
    hunk: Option<usize>,
    /// Line numbers within the hunk as printed by `diff`
    #[arg(long, value_delimiter = ',', requires = "hunk")]
    lines: Vec<usize>,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            context_lines: self.context_lines,
            io_threads: self.io_threads.max(1),
            watch_debounce: Duration::from_millis(self.debounce_ms),
            ignore_patterns: self.ignore_patterns.clone(),
            ..Config::default()
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = cli.config();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.io_threads)
        .build()
        .context("Failed to start runtime")?;

    runtime.block_on(run(cli, config))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LINESTAGE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn,linestage=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let session = RepositorySession::open(&cli.repo, config)
        .context("Failed to open git repository. Are you in a git repo?")?;

    let result = dispatch(&session, cli.command).await;
    session.close().await;
    result
}

async fn dispatch(session: &RepositorySession, command: Command) -> Result<()> {
    match command {
        Command::Status => print_status(session).await,
        Command::Diff {
            path,
            staged,
            split,
        } => {
            let target = if staged {
                DiffTarget::Staged
            } else {
                DiffTarget::Unstaged
            };
            let view = if split { ViewMode::Split } else { ViewMode::Unified };
            let change = find_change(session, &path, target).await?;
            let diff = session.compute_diff(&change, target, view).await?;
            print_diff(&diff);
            Ok(())
        }
        Command::Stage(selection) => {
            let change = find_change(session, &selection.path, DiffTarget::Unstaged).await?;
            match selected_hunk(session, &change, DiffTarget::Unstaged, &selection).await? {
                None => session.stage_file(&change).await?,
                Some((hunk, lines)) if lines.is_empty() => {
                    session.stage_hunk(&change, &hunk).await?
                }
                Some((hunk, lines)) => session.stage_lines(&change, &hunk, &lines).await?,
            };
            Ok(())
        }
        Command::Unstage(selection) => {
            let change = find_change(session, &selection.path, DiffTarget::Staged).await?;
            match selected_hunk(session, &change, DiffTarget::Staged, &selection).await? {
                None => session.unstage_file(&change).await?,
                Some((hunk, lines)) if lines.is_empty() => {
                    session.unstage_hunk(&change, &hunk).await?
                }
                Some((hunk, lines)) => session.unstage_lines(&change, &hunk, &lines).await?,
            };
            Ok(())
        }
        Command::Reset(selection) => {
            let change = find_change(session, &selection.path, DiffTarget::Unstaged).await?;
            match selected_hunk(session, &change, DiffTarget::Unstaged, &selection).await? {
                None => bail!("reset needs --hunk"),
                Some((hunk, lines)) if lines.is_empty() => {
                    session.reset_hunk(&change, &hunk).await?
                }
                Some((hunk, lines)) => session.reset_lines(&change, &hunk, &lines).await?,
            };
            Ok(())
        }
        Command::StageAll => {
            session.stage_all().await?;
            Ok(())
        }
        Command::UnstageAll => {
            session.unstage_all().await?;
            Ok(())
        }
        Command::Watch => watch(session).await,
    }
}

async fn print_status(session: &RepositorySession) -> Result<()> {
    let staged = session.staged_changes().await?;
    let unstaged = session.unstaged_changes().await?;

    if staged.is_empty() && unstaged.is_empty() {
        println!("No changes.");
        return Ok(());
    }
    if !staged.is_empty() {
        println!("Staged:");
        for change in &staged {
            println!("  {:?}\t{}", change.change_type, change.path().display());
        }
    }
    if !unstaged.is_empty() {
        println!("Unstaged:");
        for change in &unstaged {
            println!("  {:?}\t{}", change.change_type, change.path().display());
        }
    }
    Ok(())
}

async fn find_change(
    session: &RepositorySession,
    path: &Path,
    target: DiffTarget,
) -> Result<PathChange> {
    let changes = match target {
        DiffTarget::Unstaged => session.unstaged_changes().await?,
        DiffTarget::Staged => session.staged_changes().await?,
    };
    match changes
        .into_iter()
        .find(|c| c.new_path.as_path() == path || c.old_path.as_path() == path)
    {
        Some(change) => Ok(change),
        None => bail!(
            "No {} changes for {}",
            match target {
                DiffTarget::Unstaged => "unstaged",
                DiffTarget::Staged => "staged",
            },
            path.display()
        ),
    }
}

/// Resolve `--hunk` and `--lines` against a fresh diff.
async fn selected_hunk(
    session: &RepositorySession,
    change: &PathChange,
    target: DiffTarget,
    selection: &Selection,
) -> Result<Option<(Hunk, Vec<DiffLine>)>> {
    let Some(hunk_no) = selection.hunk else {
        return Ok(None);
    };
    let hunks = match session
        .compute_diff(change, target, ViewMode::Unified)
        .await?
    {
        DiffResult::Text { hunks, .. } => hunks,
        DiffResult::Split { .. } | DiffResult::Binary { .. } => {
            bail!("{} is binary; stage the whole file instead", change.path().display())
        }
    };
    let Some(hunk) = hunks.into_iter().nth(hunk_no) else {
        bail!("{} has no hunk {}", change.path().display(), hunk_no);
    };

    let mut lines = Vec::with_capacity(selection.lines.len());
    for &n in &selection.lines {
        match hunk.lines.get(n) {
            Some(line) => lines.push(line.clone()),
            None => bail!("hunk {} has no line {}", hunk_no, n),
        }
    }
    Ok(Some((hunk, lines)))
}

fn print_diff(diff: &DiffResult) {
    let path = diff.change().path().display();
    match diff {
        DiffResult::Binary { .. } => println!("Binary file {path} differs"),
        DiffResult::Text { hunks, .. } => {
            for (i, hunk) in hunks.iter().enumerate() {
                println!("[{i}] {hunk}");
                for (n, line) in hunk.lines.iter().enumerate() {
                    println!(
                        "{n:>4} {:>5} {:>5} {}{}",
                        lineno(line, DiffSide::Old),
                        lineno(line, DiffSide::New),
                        line.kind.prefix(),
                        line.text()
                    );
                }
            }
        }
        DiffResult::Split { hunks, .. } => {
            for (i, split) in hunks.iter().enumerate() {
                println!("[{i}] {}", split.hunk);
                for (old, new) in &split.rows {
                    let cell = |l: &Option<DiffLine>| {
                        l.as_ref()
                            .map(|l| format!("{}{}", l.kind.prefix(), l.text()))
                            .unwrap_or_default()
                    };
                    println!("{:<40} | {}", cell(old), cell(new));
                }
            }
        }
    }
}

fn lineno(line: &DiffLine, side: DiffSide) -> String {
    line.lineno(side).map(|n| n.to_string()).unwrap_or_default()
}

async fn watch(session: &RepositorySession) -> Result<()> {
    let mut refresh = session.subscribe();
    session.watch_changes()?;
    println!("Watching {} (Ctrl-C to stop)", session.repo().workdir().display());

    loop {
        tokio::select! {
            signal = refresh.recv() => match signal {
                Ok(kind) => println!("{kind:?}"),
                Err(RecvError::Lagged(n)) => tracing::warn!("missed {} refresh signals", n),
                Err(RecvError::Closed) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
