mod commands;
mod state;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Format of diagnostic log lines on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Tether sync engine.
#[derive(Parser)]
#[command(name = "tether", version, about = "Tether sync engine")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Engine configuration file (TOML); missing means defaults
    #[arg(long, global = true, default_value = "tether.toml")]
    config: PathBuf,

    /// JSON file holding every project, task, job and link
    #[arg(long, global = true, default_value = "tether-state.json")]
    state: PathBuf,

    /// Diagnostic log format; the level comes from RUST_LOG
    #[arg(long, global = true, default_value = "text", value_enum)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Statically validate a script file against a sandbox ruleset
    Check {
        /// Path to the script
        file: PathBuf,
        /// Use the core-code ruleset instead of the baseline one
        #[arg(long)]
        elevated: bool,
    },

    /// Register a host model that tasks may create and link records of
    Model {
        /// Technical model name, e.g. res.partner
        model: String,
        /// Comma-separated field names
        #[arg(long, default_value = "")]
        fields: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
    },

    /// Import a bundle into a project ("upgrade from source")
    Upgrade {
        /// Bundle directory or gist page URL
        source: String,
        /// Project to upgrade; a new project is created when omitted
        #[arg(long)]
        project: Option<u64>,
        /// Operator name
        #[arg(long, default_value = "admin")]
        user: String,
        /// Run as a manager (needed to change core code)
        #[arg(long)]
        manager: bool,
    },

    /// Activate a task and run queued jobs until none remain
    Run {
        #[command(subcommand)]
        target: commands::run::RunTarget,
        /// Operator name
        #[arg(long, global = true, default_value = "admin")]
        user: String,
    },

    /// Create and move sync orders
    Order {
        #[command(subcommand)]
        command: commands::order::OrderCommand,
    },

    /// Reveal a secret value (managers only)
    Secret {
        /// Secret id
        id: u64,
        /// Operator name
        #[arg(long, default_value = "admin")]
        user: String,
        /// Run as a manager
        #[arg(long)]
        manager: bool,
    },

    /// List the links of a project
    Links {
        /// Project id
        project: u64,
        /// Only links of this relation
        #[arg(long)]
        relation: Option<String>,
        /// Only links with this external reference
        #[arg(long = "ref")]
        reference: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let ctx = commands::Ctx {
        output: cli.output,
        quiet: cli.quiet,
        config: cli.config,
        state: cli.state,
    };
    let result = match cli.command {
        Commands::Check { file, elevated } => commands::check::cmd_check(&ctx, &file, elevated),
        Commands::Model {
            model,
            fields,
            name,
        } => commands::model::cmd_model(&ctx, &model, &fields, name.as_deref()),
        Commands::Upgrade {
            source,
            project,
            user,
            manager,
        } => commands::upgrade::cmd_upgrade(&ctx, &source, project, &user, manager),
        Commands::Run { target, user } => commands::run::cmd_run(&ctx, target, &user),
        Commands::Order { command } => commands::order::cmd_order(&ctx, command),
        Commands::Secret { id, user, manager } => {
            commands::secret::cmd_secret(&ctx, id, &user, manager)
        }
        Commands::Links {
            project,
            relation,
            reference,
        } => commands::links::cmd_links(&ctx, project, relation.as_deref(), reference.as_deref()),
    };

    if let Err(e) = result {
        report_error(&format!("error: {:#}", e), ctx.output, ctx.quiet);
        process::exit(1);
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
