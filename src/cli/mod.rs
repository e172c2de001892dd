//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "arag",
    version,
    author = "neur0map",
    about = "Adaptive retrieval-augmented generation over local document corpora",
    long_about = "arag serves questions against prebuilt document corpora. Each question runs hybrid \
                  BM25 + dense retrieval, falls back to web search when nothing relevant is found, and \
                  generates a cited answer while streaming its progress to subscribers."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/adaptive-rag/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the server in the foreground
    Serve {
        /// Profile to use (e.g., "offline", "audited")
        #[arg(short, long)]
        profile: Option<String>,

        /// Skip building every corpus at startup
        #[arg(long)]
        no_preload: bool,
    },

    /// Stop a running server
    Stop,

    /// Show server status
    Status,

    /// Ask a question against a corpus
    Ask {
        /// Question to ask
        question: String,

        /// Corpus id (defaults to the session's selected corpus)
        #[arg(short = 'C', long)]
        corpus: Option<String>,

        /// Session id for conversation history
        #[arg(short, long)]
        session: Option<String>,

        /// Print progress steps while the answer is generated
        #[arg(short, long)]
        follow: bool,

        /// Print the raw response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stream the progress of an execution
    Subscribe {
        /// Execution id
        execution_id: String,
    },

    /// Select a corpus for a session, building it if needed
    Select {
        /// Corpus id
        corpus: String,

        /// Session id (a new one is created when omitted)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// List available corpora
    Corpora {
        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Clear a session's conversation history
    ClearSession {
        /// Session id
        session: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
