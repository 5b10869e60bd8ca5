//! Lore CLI - Build and query knowledge bases from your documents

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Lore - Build and query knowledge bases from your documents
#[derive(Parser)]
#[command(name = "lore")]
#[command(author = "Lalo Morales <lalomorales22@github.com>")]
#[command(version)]
#[command(about = "Build and query knowledge bases from your documents", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Principal to act as
    #[arg(long = "as", global = true, env = "USER", default_value = "local")]
    principal: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize Lore (create config and database)
    Init,

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Manage knowledge bases
    #[command(subcommand)]
    Kb(KbCommands),

    /// Sync a knowledge base with a directory
    Sync {
        /// Knowledge base name or ID
        kb: String,

        /// Directory to sync from
        dir: String,

        /// Keep running and sync again every SECS seconds
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },

    /// Ask a question and show the most relevant passages
    Query {
        /// Your question
        question: String,

        /// Knowledge bases to search (default: all readable)
        #[arg(short, long = "kb")]
        kb: Vec<String>,

        /// Maximum number of passages (default: from config)
        #[arg(short = 'n', long)]
        top_k: Option<usize>,
    },

    /// Show engine status and available tools
    Status,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Print the config file location
    Path,
}

#[derive(Subcommand)]
enum KbCommands {
    /// Create a knowledge base owned by you
    Create {
        /// Knowledge base name
        name: String,
    },

    /// List knowledge bases you can read
    List,

    /// Show details of a knowledge base
    Show {
        /// Knowledge base name or ID
        name: String,
    },

    /// Grant a principal access
    Grant {
        /// Knowledge base name or ID
        name: String,

        /// Principal to grant access to
        principal: String,

        /// Access mode: read or sync
        #[arg(short, long, default_value = "read")]
        mode: String,
    },

    /// Revoke a principal's access
    Revoke {
        /// Knowledge base name or ID
        name: String,

        /// Principal to revoke
        principal: String,
    },

    /// Make a knowledge base readable by everyone
    Public {
        /// Knowledge base name or ID
        name: String,

        /// Make it private again
        #[arg(long)]
        off: bool,
    },

    /// Delete a knowledge base and everything in it
    Delete {
        /// Knowledge base name or ID
        name: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lore=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lore=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let principal = cli.principal.as_str();

    let result = match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => commands::config::show(),
            ConfigCommands::Path => commands::config::path(),
        },
        Commands::Kb(cmd) => match cmd {
            KbCommands::Create { name } => commands::kb::create(principal, &name),
            KbCommands::List => commands::kb::list(principal),
            KbCommands::Show { name } => commands::kb::show(principal, &name),
            KbCommands::Grant {
                name,
                principal: grantee,
                mode,
            } => commands::kb::grant(principal, &name, &grantee, &mode),
            KbCommands::Revoke {
                name,
                principal: grantee,
            } => commands::kb::revoke(principal, &name, &grantee),
            KbCommands::Public { name, off } => commands::kb::public(principal, &name, !off),
            KbCommands::Delete { name } => commands::kb::delete(principal, &name),
        },
        Commands::Sync { kb, dir, every } => commands::sync::run(principal, &kb, &dir, every),
        Commands::Query {
            question,
            kb,
            top_k,
        } => commands::query::run(principal, &question, &kb, top_k),
        Commands::Status => commands::status::run(principal),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
