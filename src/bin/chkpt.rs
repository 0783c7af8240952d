// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use chkpt::{
    checkpoint::{
        create,
        restore::{restore, DEFAULT_BACKUP_MESSAGE},
        version::VersionTag,
    },
    compose::{CleanOptions, ComposeStack},
    deploy::deploy,
    session::{Session, SessionAction},
    ship::ship,
    store::{ArchiveEntry, ArchiveTable},
    syscall::SyscallError,
    watch::{Watcher, DEFAULT_COUNT, DEFAULT_INTERVAL},
    workspace::Workspace,
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use inquire::Text;
use std::{io::IsTerminal, path::PathBuf, process::exit, time::Duration};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "chkpt [options] <chkpt-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Working directory to operate on.
    #[arg(short = 'C', long, global = true, value_name = "path", default_value = ".")]
    pub work_dir: PathBuf,

    /// Checkpoint store to use instead of the configured one.
    #[arg(long, global = true, value_name = "path")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let workspace = Workspace::open(&self.work_dir, self.store)?;
        match self.command {
            Command::Save(opts) => run_save(&workspace, opts),
            Command::List => run_list(&workspace),
            Command::Restore(opts) => run_restore(&workspace, opts),
            Command::Deploy(opts) => run_deploy(&workspace, opts),
            Command::Clean(opts) => run_clean(&workspace, opts),
            Command::Watch(opts) => run_watch(&workspace, opts).await,
            Command::Session(opts) => run_session(&workspace, opts),
            Command::Ship => run_ship(&workspace).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Archive working directory as a new checkpoint.
    #[command(override_usage = "chkpt save [options]")]
    Save(SaveOptions),

    /// List checkpoints in checkpoint store.
    #[command(override_usage = "chkpt list [options]")]
    List,

    /// Restore checkpoint into working directory, backing up current state.
    #[command(override_usage = "chkpt restore [options]")]
    Restore(RestoreOptions),

    /// Deploy checkpoint to configured deployment target.
    #[command(override_usage = "chkpt deploy [options]")]
    Deploy(DeployOptions),

    /// Tear down and rebuild compose stack of working directory.
    #[command(override_usage = "chkpt clean [options]")]
    Clean(CleanCommandOptions),

    /// Watch working directory for recently modified files.
    #[command(override_usage = "chkpt watch [options]")]
    Watch(WatchOptions),

    /// Manage browser terminal session of working directory.
    #[command(override_usage = "chkpt session [options] [action]")]
    Session(SessionOptions),

    /// Push current branch and restart compose stack at once.
    #[command(override_usage = "chkpt ship [options]")]
    Ship,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SaveOptions {
    /// Short description of checkpoint.
    #[arg(short, long, value_name = "message")]
    pub message: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RestoreOptions {
    /// Version of checkpoint to restore, e.g., "1.2" or "1.3b".
    #[arg(short, long, value_name = "version")]
    pub version: Option<String>,

    /// Message of backup made before restoring.
    #[arg(short, long, value_name = "message")]
    pub message: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployOptions {
    /// Version of checkpoint to deploy, e.g., "1.2".
    #[arg(short, long, value_name = "version")]
    pub version: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CleanCommandOptions {
    /// Also remove named volumes of compose stack.
    #[arg(long)]
    pub volumes: bool,

    /// Also prune dangling images.
    #[arg(long)]
    pub prune: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct WatchOptions {
    /// Seconds between two refreshes.
    #[arg(short, long, value_name = "seconds", default_value_t = DEFAULT_INTERVAL.as_secs())]
    pub interval: u64,

    /// Number of files to show.
    #[arg(short = 'n', long, value_name = "count", default_value_t = DEFAULT_COUNT)]
    pub count: usize,

    /// Print recent files once and exit.
    #[arg(long)]
    pub once: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SessionOptions {
    /// Action to perform on session.
    #[arg(value_enum, value_name = "action", default_value_t)]
    pub action: SessionAction,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(exit_code(&error));
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

/// Exit code of the failed external command behind an error, 1 otherwise.
fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<SyscallError>())
        .and_then(SyscallError::exit_code)
        .filter(|code| *code != 0)
        .unwrap_or(1)
}

fn run_save(workspace: &Workspace, opts: SaveOptions) -> Result<()> {
    let message = match opts.message {
        Some(message) => message,
        None => Text::new("checkpoint message").prompt()?,
    };

    let created = create(workspace, message)?;
    println!("{created}");

    Ok(())
}

fn run_list(workspace: &Workspace) -> Result<()> {
    let archives = workspace.store().archives()?;
    if archives.is_empty() {
        println!("no checkpoints in {}", workspace.store().path().display());
    } else {
        println!("checkpoints in {}", workspace.store().path().display());
        print!("{}", ArchiveTable(&archives));
    }

    Ok(())
}

fn run_restore(workspace: &Workspace, opts: RestoreOptions) -> Result<()> {
    let tag = select_version(workspace, opts.version, "version to restore")?;

    // INVARIANT: Only prompt when someone can answer, otherwise take the default.
    let message = match opts.message {
        Some(message) => message,
        None if std::io::stdin().is_terminal() => Text::new("backup message")
            .with_default(DEFAULT_BACKUP_MESSAGE)
            .prompt()?,
        None => DEFAULT_BACKUP_MESSAGE.to_string(),
    };
    let restored = restore(workspace, tag, Some(message.as_str()))?;

    println!(
        "restored {} ({} entries)",
        restored.archive.file_name, restored.extracted
    );
    println!("{}", restored.backup);

    Ok(())
}

fn run_deploy(workspace: &Workspace, opts: DeployOptions) -> Result<()> {
    let settings = workspace.deploy_settings()?;
    let tag = select_version(workspace, opts.version, "version to deploy")?;
    let archive = workspace.store().resolve(tag)?;

    let report = deploy(workspace.work_dir(), settings, &archive)?;
    match report.warnings.len() {
        0 => info!("deployed {}", archive.file_name),
        count => info!("deployed {} with {count} warnings", archive.file_name),
    }

    Ok(())
}

fn run_clean(workspace: &Workspace, opts: CleanCommandOptions) -> Result<()> {
    let stack = ComposeStack::detect(workspace.work_dir()).ok_or_else(|| {
        anyhow!(
            "no compose file in {:?}",
            workspace.work_dir().display()
        )
    })?;
    stack.clean(CleanOptions {
        volumes: opts.volumes,
        prune_images: opts.prune,
    })?;

    Ok(())
}

async fn run_watch(workspace: &Workspace, opts: WatchOptions) -> Result<()> {
    let watcher = Watcher::new(
        workspace.work_dir(),
        &workspace.config().watch.exclude,
        opts.count,
    )?;

    if opts.once {
        watcher.once();
    } else {
        watcher.run(Duration::from_secs(opts.interval.max(1))).await?;
    }

    Ok(())
}

fn run_session(workspace: &Workspace, opts: SessionOptions) -> Result<()> {
    let session = Session::new(workspace.work_dir(), &workspace.config().session);
    session.perform(opts.action)?;

    Ok(())
}

async fn run_ship(workspace: &Workspace) -> Result<()> {
    let shipped = ship(workspace.work_dir()).await?;
    info!(
        "shipped {}{}",
        shipped.branch,
        if shipped.restarted {
            " and restarted compose stack"
        } else {
            ""
        }
    );

    Ok(())
}

/// Use version given on the command line, or list checkpoints and prompt for one.
fn select_version(workspace: &Workspace, version: Option<String>, prompt: &str) -> Result<VersionTag> {
    let version = match version {
        Some(version) => version,
        None => {
            let archives: Vec<ArchiveEntry> = workspace.store().archives()?;
            if archives.is_empty() {
                return Err(anyhow!(
                    "no checkpoints in {:?}",
                    workspace.store().path().display()
                ));
            }
            print!("{}", ArchiveTable(&archives));
            Text::new(prompt).prompt()?
        }
    };

    Ok(version.parse()?)
}
