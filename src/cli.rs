use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rezip")]
#[command(version)]
#[command(about = "Random-access ZIP tool: list, extract, append, erase and compact in place", long_about = None)]
#[command(after_help = "Examples:\n  \
  rezip extract data1.zip -x joe           extract all files except joe from data1.zip\n  \
  rezip extract -p foo.zip | more          send contents of foo.zip via pipe into more\n  \
  rezip list https://example.com/a.zip     list files from remote ZIP\n  \
  rezip add out.zip src/ README.md         append a directory and a file\n  \
  rezip erase out.zip old.bin && rezip compact out.zip")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Log library activity (repeat for more detail)
    #[arg(long = "log", global = true, action = clap::ArgAction::Count)]
    pub log: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List archive contents
    List {
        /// ZIP file path or HTTP URL
        #[arg(value_name = "FILE")]
        file: String,

        /// List verbosely
        #[arg(short = 'v')]
        verbose: bool,
    },

    /// Extract files from an archive
    Extract(ExtractArgs),

    /// Add files or directories, replacing entries of the same name
    Add {
        /// Archive to create or update
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Files and directories to add
        #[arg(value_name = "PATHS", required = true)]
        paths: Vec<PathBuf>,

        /// Store without compression
        #[arg(long)]
        store: bool,

        /// Write Zip64 records for every entry
        #[arg(long)]
        zip64: bool,

        /// Deflate level, 0-9
        #[arg(short = 'l', long, default_value_t = 6)]
        level: u32,

        /// Junk paths (store file names only)
        #[arg(short = 'j')]
        junk_paths: bool,
    },

    /// Remove entries; their space is reclaimed by `compact`
    Erase {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Entry names or glob patterns
        #[arg(value_name = "NAMES", required = true)]
        names: Vec<String>,
    },

    /// Rewrite an archive without erased or overwritten data
    Compact {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<PathBuf>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,
}

pub fn is_http_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || matches!(&self.command, Command::Extract(args) if args.pipe)
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}
