//! Clap derive structures for the `fleetspell` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fleetspell -- run one command across many cluster controllers
#[derive(Debug, Parser)]
#[command(
    name = "fleetspell",
    version,
    about = "Run operational commands across a fleet of cluster controllers",
    long_about = "Runs read and write commands against every controller selected by\n\
        --filter, connecting directly, through an SSH port-forward, or through\n\
        sshuttle as each controller's configuration requires.\n\n\
        Controllers are read from config.yaml and config.personal.yaml in the\n\
        fleetspell data directory (FLEETSPELL_DATA).",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Global config file
    #[arg(long, env = "FLEETSPELL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Personal config file (credentials and overrides)
    #[arg(long, env = "FLEETSPELL_PERSONAL_CONFIG", global = true)]
    pub personal_config: Option<PathBuf>,

    /// Select controllers, e.g. "customer=acme,globex risk=1,2"
    #[arg(long, short = 'f', default_value = "", global = true)]
    pub filter: String,

    /// How controllers are scheduled
    #[arg(long, default_value = "serial", global = true)]
    pub run_type: RunType,

    /// Concurrent controllers for --run-type parallel
    #[arg(long, default_value = "5", global = true)]
    pub limit: usize,

    /// Controllers per batch for --run-type batch
    #[arg(long, default_value = "5", global = true)]
    pub batch_size: usize,

    /// Preview what would be done without changing anything
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Dial every controller anew instead of reusing connections
    #[arg(long, global = true)]
    pub force_reconnect: bool,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "FLEETSPELL_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', alias = "silent", global = true)]
    pub yes: bool,
}

// ── Value Enums ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunType {
    /// One controller at a time
    Serial,
    /// Up to --limit controllers at once
    Parallel,
    /// --batch-size controllers at a time, batch after batch
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AclArg {
    Login,
    AddModel,
    Superuser,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check that each controller is reachable
    Ping,

    /// Show model status
    #[command(alias = "st")]
    Status(ModelsArgs),

    /// Show controller information
    ShowController,

    /// Create a user on each controller
    #[command(
        after_help = "Prints the new credentials as a snippet for config.personal.yaml.\n\
            Without --password an empty answer at the prompt (or --yes)\n\
            generates a random password per controller."
    )]
    AddUser(AddUserArgs),

    /// Remove a user from each controller
    RemoveUser(UserArgs),

    /// Re-enable a disabled user
    EnableUser(UserArgs),

    /// Disable a user without removing it
    DisableUser(UserArgs),

    /// Grant a controller access level to a user
    Grant(GrantArgs),

    /// Upgrade packages on matching units from a patch file
    #[command(
        after_help = "Patch file format:\n\n\
            applications:\n\
            - application: \"^.*ubuntu.*$\"\n\
            \x20 dist_upgrade: true\n\
            \x20 packages_to_update:\n\
            \x20 - app: nova-common\n\
            \x20   version: 2:21.2.4-0ubuntu2.1"
    )]
    UpdatePackages(UpdatePackagesArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ModelsArgs {
    /// Models (or model aliases) to include; all models when omitted
    #[arg(long, short = 'm', value_delimiter = ',')]
    pub models: Vec<String>,
}

#[derive(Debug, Args)]
pub struct UserArgs {
    /// User name
    #[arg(long, short = 'u', alias = "username")]
    pub user: String,
}

#[derive(Debug, Args)]
pub struct AddUserArgs {
    /// User name to create
    #[arg(long, short = 'u', alias = "username")]
    pub user: String,

    /// Display name; defaults to the user name
    #[arg(long, alias = "display_name")]
    pub display_name: Option<String>,

    /// Password for the new user (prompted when omitted)
    #[arg(long, env = "FLEETSPELL_NEW_USER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Debug, Args)]
pub struct GrantArgs {
    /// User name
    #[arg(long, short = 'u', alias = "username")]
    pub user: String,

    /// Access level to grant
    #[arg(long, value_enum)]
    pub acl: AclArg,
}

#[derive(Debug, Args)]
pub struct UpdatePackagesArgs {
    /// YAML patch file
    #[arg(long)]
    pub patch: PathBuf,

    #[command(flatten)]
    pub models: ModelsArgs,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
