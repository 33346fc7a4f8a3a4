//! Plumb CLI - Git plumbing commands over the Plumb object database.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod http;

use crate::commands::{CatMode, Deepen};
use crate::config::Config;

/// Plumb - Git object storage and smart HTTP fetch
#[derive(Parser, Debug)]
#[command(name = "plumb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (default: ./plumb.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Git directory (overrides the configuration)
    #[arg(long, global = true)]
    git_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute an object id, optionally storing the object
    HashObject {
        /// Object kind
        #[arg(short = 't', long = "type", default_value = "blob")]
        kind: String,
        /// Write the object into the database
        #[arg(short, long)]
        write: bool,
        /// Input file (default: standard input)
        file: Option<PathBuf>,
    },

    /// Show an object's kind, size or content
    CatFile {
        #[command(flatten)]
        mode: CatArgs,
        /// Object id or unique prefix
        object: String,
    },

    /// Check a pack against its index
    VerifyPack {
        /// List every object
        #[arg(short, long)]
        verbose: bool,
        /// Path to the .pack or .idx file
        pack: PathBuf,
    },

    /// Store a pack file and build its index
    IndexPack {
        /// Pack file (default: standard input)
        file: Option<PathBuf>,
    },

    /// Write every object of a pack as a loose object
    UnpackObjects {
        /// Pack file (default: standard input)
        file: Option<PathBuf>,
    },

    /// List the refs of a remote repository
    LsRemote {
        /// Remote URL
        url: String,
    },

    /// Fetch objects from a remote repository
    Fetch {
        /// Remote URL
        url: String,
        /// Only fetch refs starting with these prefixes
        refs: Vec<String>,
        /// Limit history to this many commits
        #[arg(long)]
        depth: Option<u32>,
        /// Limit history to commits after this unix time
        #[arg(long)]
        shallow_since: Option<i64>,
        /// Exclude history reachable from this ref
        #[arg(long)]
        shallow_exclude: Vec<String>,
    },

    /// Show version information
    Version,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct CatArgs {
    /// Show the object kind
    #[arg(short = 't')]
    kind: bool,
    /// Show the object size
    #[arg(short = 's')]
    size: bool,
    /// Print the object content
    #[arg(short = 'p')]
    pretty: bool,
}

impl CatArgs {
    fn mode(&self) -> CatMode {
        if self.kind {
            CatMode::Kind
        } else if self.size {
            CatMode::Size
        } else {
            CatMode::Pretty
        }
    }
}

fn run(cli: Cli, mut config: Config) -> anyhow::Result<()> {
    if let Some(git_dir) = cli.git_dir {
        config.git_dir = git_dir;
    }

    match cli.command {
        Commands::HashObject { kind, write, file } => {
            commands::hash_object(&config, &kind, file.as_deref(), write)
        }
        Commands::CatFile { mode, object } => commands::cat_file(&config, &object, mode.mode()),
        Commands::VerifyPack { verbose, pack } => commands::verify_pack(&pack, verbose),
        Commands::IndexPack { file } => commands::index_pack(&config, file.as_deref()),
        Commands::UnpackObjects { file } => commands::unpack_objects(&config, file.as_deref()),
        Commands::LsRemote { url } => commands::ls_remote(&config, &url),
        Commands::Fetch {
            url,
            refs,
            depth,
            shallow_since,
            shallow_exclude,
        } => commands::fetch(
            &config,
            &url,
            &refs,
            Deepen {
                depth,
                since: shallow_since,
                not: shallow_exclude,
            },
        ),
        Commands::Version => {
            println!("plumb {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing
    let log_level = match cli.verbose {
        0 => config.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("plumb={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli, config) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
