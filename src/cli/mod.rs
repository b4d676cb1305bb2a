//! CLI module for tunefetch

use clap::{Args, Parser, Subcommand};

use crate::backend::{Quality, Source};

pub mod commands;
mod progress;

#[derive(Parser, Debug)]
#[command(
    name = "tunefetch",
    about = "Fetch songs from NetEase and QQ Music into your music server"
)]
#[command(version, author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Music server URL
    #[arg(long, global = true, env = "TUNEFETCH_SERVER")]
    pub server: Option<String>,

    /// Cookie of an existing server session
    #[arg(long, global = true, env = "TUNEFETCH_SESSION", hide_env_values = true)]
    pub session: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Options shared by every command that downloads
#[derive(Args, Debug, Clone, Default)]
pub struct DownloadOpts {
    /// Catalog to search (defaults to the configured source)
    #[arg(short, long, value_enum)]
    pub source: Option<Source>,

    /// Number of downloads running at once
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Requested audio quality
    #[arg(short, long, value_enum)]
    pub quality: Option<Quality>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search a remote catalog
    Search {
        /// Search keywords
        #[arg(required = true, num_args = 1..)]
        keywords: Vec<String>,

        /// Maximum number of results
        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// Pick results interactively and download them
        #[arg(long)]
        select: bool,

        #[command(flatten)]
        opts: DownloadOpts,
    },

    /// Download the best match of each query
    Download {
        /// One query per song, e.g. "晴天 周杰伦"
        #[arg(required = true, num_args = 1..)]
        queries: Vec<String>,

        /// Download even if the song is already in the library
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        opts: DownloadOpts,
    },

    /// Create a playlist and fill it, downloading what is missing
    Import {
        /// Playlist name (defaults to the linked playlist's name)
        #[arg(required_unless_present = "link")]
        name: Option<String>,

        /// One query per song
        #[arg(num_args = 1.., required_unless_present = "link", conflicts_with = "link")]
        queries: Vec<String>,

        /// Share link of a catalog playlist to copy instead of queries
        #[arg(long)]
        link: Option<String>,

        #[command(flatten)]
        opts: DownloadOpts,
    },

    /// List songs in the local library
    Library {
        /// Only show songs whose title or artist contains this text
        filter: Option<String>,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
