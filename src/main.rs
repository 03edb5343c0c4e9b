use clap::{Parser, Subcommand};

use ticketflow::commands;
use ticketflow::errors;
use ticketflow::exec::CancelToken;
use ticketflow::output::{self, OutputFormat};
use ticketflow::store::StatusFilter;

#[derive(Parser)]
#[command(name = "ticketflow")]
#[command(version, about = "Git-backed ticket management: one Markdown ticket per branch, optionally per worktree", long_about = None)]
struct Cli {
    /// Output format for final results; TICKETFLOW_OUTPUT_FORMAT works too
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold .ticketflow.yaml, the ticket directories and .gitignore
    Init,
    /// Create a ticket in todo/
    New {
        /// Slug for the new ticket ([a-z0-9-]+)
        slug: String,
        /// Parent ticket id; inferred from the current branch if omitted
        #[arg(long)]
        parent: Option<String>,
    },
    /// List tickets
    List {
        #[arg(long, value_enum, default_value = "active")]
        status: StatusArg,
        /// Show at most this many tickets
        #[arg(long)]
        count: Option<usize>,
    },
    /// Show a single ticket
    Show { id: String },
    /// Show the current ticket and totals
    Status,
    /// Repair the current-ticket.md symlink for the current branch
    Restore,
    /// Start a ticket: create its branch (and worktree), move it to doing/
    Start {
        id: String,
        /// Re-initialize a ticket that is already in progress
        #[arg(long)]
        force: bool,
    },
    /// Close the current ticket, or a specific one by id
    Close {
        id: Option<String>,
        /// Why the ticket is being closed (required for unmerged branches)
        #[arg(long)]
        reason: Option<String>,
        /// Ignore uncommitted changes
        #[arg(long)]
        force: bool,
    },
    /// Remove the branch and worktree of a done ticket
    Cleanup {
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Inspect or clean up worktrees
    Worktree {
        #[command(subcommand)]
        command: WorktreeCommands,
    },
    /// Reconcile worktrees and branches against ticket state
    AutoCleanup {
        /// Report what would be removed without touching anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Report what auto-cleanup would do, plus ticket totals
    CleanupStats,
    /// Rewrite frontmatter timestamps that carry sub-second precision
    MigrateDates {
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum WorktreeCommands {
    /// List worktrees with their ticket status
    List,
    /// Remove worktrees whose ticket is no longer in doing/
    Clean,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum StatusArg {
    Todo,
    Doing,
    Done,
    Active,
    All,
}

impl From<StatusArg> for StatusFilter {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Todo => StatusFilter::Todo,
            StatusArg::Doing => StatusFilter::Doing,
            StatusArg::Done => StatusFilter::Done,
            StatusArg::Active => StatusFilter::Active,
            StatusArg::All => StatusFilter::All,
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    // Resolved once: flag wins over TICKETFLOW_OUTPUT_FORMAT.
    let format = OutputFormat::resolve(cli.format);

    let cancel = CancelToken::new();
    #[cfg(unix)]
    {
        let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, cancel.flag());
    }

    if let Err(err) = dispatch(cli.command, format, cancel) {
        output::emit_error(format, &err);
        std::process::exit(errors::exit_code(&err));
    }
}

fn dispatch(command: Commands, format: OutputFormat, cancel: CancelToken) -> anyhow::Result<()> {
    match command {
        Commands::Init => commands::init::run(format, cancel),
        Commands::New { slug, parent } => commands::new::run(format, cancel, &slug, parent),
        Commands::List { status, count } => {
            commands::list::run_list(format, cancel, status.into(), count)
        }
        Commands::Show { id } => commands::list::run_show(format, cancel, &id),
        Commands::Status => commands::list::run_status(format, cancel),
        Commands::Restore => commands::restore::run(format, cancel),
        Commands::Start { id, force } => commands::start::run(format, cancel, &id, force),
        Commands::Close { id, reason, force } => {
            commands::close::run(format, cancel, id, reason, force)
        }
        Commands::Cleanup { id, force } => commands::cleanup::run_cleanup(format, cancel, &id, force),
        Commands::Worktree { command } => match command {
            WorktreeCommands::List => commands::cleanup::run_worktree_list(format, cancel),
            WorktreeCommands::Clean => commands::cleanup::run_worktree_clean(format, cancel),
        },
        Commands::AutoCleanup { dry_run } => {
            commands::cleanup::run_auto_cleanup(format, cancel, dry_run)
        }
        Commands::CleanupStats => commands::cleanup::run_cleanup_stats(format, cancel),
        Commands::MigrateDates { dry_run } => commands::migrate::run(format, cancel, dry_run),
    }
}
