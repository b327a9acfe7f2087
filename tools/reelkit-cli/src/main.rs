//! reelkit CLI: build playlists, preview them, and master them into reels.
//!
//! Usage:
//!   reelkit init <NAME>            Create a new project
//!   reelkit add <PATH> <KIND>      Add generated content to a project
//!   reelkit reference <PATH> <ID>  Include packaged content by pointer
//!   reelkit reels <PATH>           Show how the output splits into reels
//!   reelkit preview <PATH>         Play a project through the read-ahead butler
//!   reelkit master <PATH>          Master a project into a package
//!   reelkit serve                  Run a remote encode server
//!   reelkit status                 Query a running master's job status

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "reelkit",
    about = "Playlist playback and reel mastering",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new empty project
    Init {
        /// Project name
        name: String,

        /// Parent directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Output frame rate (defaults to the configured rate)
        #[arg(long)]
        fps: Option<u32>,

        /// Picture width
        #[arg(long)]
        width: Option<u32>,

        /// Picture height
        #[arg(long)]
        height: Option<u32>,

        /// Stereoscopic output
        #[arg(long)]
        three_d: bool,

        /// Reel split: single | by-video-content | by-length
        #[arg(long, default_value = "single")]
        reels: String,
    },

    /// Add generated content to a project
    Add {
        /// Path to the project directory
        path: PathBuf,

        /// Start on the output timeline (seconds)
        #[arg(long, default_value = "0")]
        at: f64,

        #[command(subcommand)]
        kind: commands::add::AddKind,
    },

    /// Include packaged content by pointer instead of re-encoding it
    Reference {
        /// Path to the project directory
        path: PathBuf,

        /// Content id
        id: u64,

        /// Clear the flag instead of setting it
        #[arg(long)]
        off: bool,
    },

    /// Show the playlist and its reel split
    Reels {
        /// Path to the project directory
        path: PathBuf,
    },

    /// Play a project through the read-ahead butler
    Preview {
        /// Path to the project directory
        path: PathBuf,

        /// Start time (seconds)
        #[arg(long, default_value = "0")]
        from: f64,

        /// Frames to pull
        #[arg(long, default_value = "48")]
        frames: usize,
    },

    /// Master a project into a package
    Master {
        /// Path to the project directory
        path: PathBuf,

        /// Package directory (defaults to <PATH>/output)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Local encode threads
        #[arg(long)]
        threads: Option<usize>,

        /// Remote encode server (repeatable)
        #[arg(long = "server")]
        servers: Vec<String>,

        /// Publish job status on the configured status port
        #[arg(long)]
        status: bool,
    },

    /// Run a remote encode server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Port (defaults to the configured encode port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Query a running master's job status
    Status {
        /// Status server address (defaults to the local status port)
        #[arg(long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = reelkit_common::config::AppConfig::load();

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    logging.json |= cli.json_logs;
    reelkit_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Init {
            name,
            output,
            fps,
            width,
            height,
            three_d,
            reels,
        } => commands::init::run(&config, name, output, fps, width, height, three_d, reels),
        Commands::Add { path, at, kind } => commands::add::run(path, at, kind),
        Commands::Reference { path, id, off } => commands::reference::run(path, id, !off),
        Commands::Reels { path } => commands::reels::run(path),
        Commands::Preview { path, from, frames } => {
            commands::preview::run(&config, path, from, frames).await
        }
        Commands::Master {
            path,
            output,
            threads,
            servers,
            status,
        } => commands::master::run(&config, path, output, threads, servers, status).await,
        Commands::Serve { bind, port } => commands::serve::run(&config, bind, port).await,
        Commands::Status { addr } => commands::status::run(&config, addr).await,
    }
}
