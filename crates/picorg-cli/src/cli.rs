use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "picorg")]
#[command(about = "Organize image collections with AI descriptions and duplicate detection", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (JSON). Defaults to ~/.picorg/config.json when present.
    #[arg(short, long, global = true, env = "PICORG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import a directory of images
    Import(ImportArgs),
    /// List groups of byte-identical images
    Duplicates(OutputArgs),
    /// Classify failed (and optionally pending) images again
    Retry {
        /// Also classify images that were never classified
        #[arg(long)]
        include_pending: bool,
    },
    /// Remove records whose files no longer exist
    Prune {
        /// Only check records under this directory
        prefix: Option<PathBuf>,
    },
    /// List imported images
    Images(ImagesArgs),
    /// Count images per month taken, newest first
    Months(OutputArgs),
    /// Forget an image (the file itself is left alone)
    Remove { path: PathBuf },
    /// Manage categories
    #[command(subcommand)]
    Categories(CategoryCommands),
    /// Print the effective configuration
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Directory to import
    pub root: PathBuf,

    /// Only import files directly inside the directory
    #[arg(long)]
    pub no_recursive: bool,

    /// Do not call the model
    #[arg(long)]
    pub no_classify: bool,

    /// Process paths that already have a record
    #[arg(long)]
    pub rescan: bool,

    /// Do not write thumbnails
    #[arg(long)]
    pub no_thumbnails: bool,

    /// Allowed extensions (repeatable); replaces the configured list
    #[arg(long = "ext", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Glob, relative to the root, of paths to leave out (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Print one line per file as it finishes
    #[arg(long)]
    pub progress: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct ImagesArgs {
    #[arg(long)]
    pub category: Option<String>,

    /// pending, classified or failed
    #[arg(long)]
    pub status: Option<String>,

    /// Substring of the description or path
    #[arg(long)]
    pub search: Option<String>,

    /// Only images under this directory
    #[arg(long)]
    pub under: Option<PathBuf>,

    /// Only images taken in this month (YYYY-MM)
    #[arg(long, value_parser = picorg::store::parse_month)]
    pub month: Option<String>,

    #[arg(long, default_value_t = 50)]
    pub limit: u32,

    /// Cursor printed by the previous page
    #[arg(long)]
    pub after: Option<String>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Subcommand)]
pub enum CategoryCommands {
    /// List categories with image counts
    List(OutputArgs),
    /// Create a category
    Add {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Rename a category, moving its images with it
    Rename { old: String, new: String },
    /// Delete a category; its images move to "Uncategorized"
    Remove { name: String },
    /// File an image under a category
    Assign { path: PathBuf, category: String },
}
