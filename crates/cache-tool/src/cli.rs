use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use cache_rs::config::{ToolConfig, Verbosity};

#[derive(Parser, Debug)]
#[command(
    name = "cache-tool",
    author,
    version,
    about = "Inspect, clear and allocate HTTP object cache storage offline"
)]
pub struct Cli {
    /// Span list file, or a single device or image.
    #[arg(long, global = true, env = "CACHE_TOOL_SPANS")]
    pub spans: Option<PathBuf>,

    /// Volume configuration file.
    #[arg(long, global = true, env = "CACHE_TOOL_VOLUMES")]
    pub volumes: Option<PathBuf>,

    /// Persist changes. Without this every command is a dry run.
    #[arg(long, global = true)]
    pub write: bool,

    /// File with `url=` lines.
    #[arg(long, global = true)]
    pub input: Option<PathBuf>,

    /// Device path prefix selecting spans.
    #[arg(long, global = true)]
    pub device: Option<PathBuf>,

    #[arg(short, long, global = true, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Describe spans and volumes.
    List {
        #[command(subcommand)]
        detail: Option<ListDetail>,
    },
    /// Remove the header of every span.
    Clear,
    /// Remove the header of selected spans.
    Clearspan {
        #[command(subcommand)]
        target: ClearTarget,
    },
    /// Check the directory of every allocated stripe.
    Check,
    /// Redistribute all spans over the configured volumes.
    Volumes,
    /// Allocate storage to volumes.
    Alloc {
        #[command(subcommand)]
        target: AllocTarget,
    },
    /// Find the stripe content keys map to.
    Find {
        #[command(subcommand)]
        target: FindTarget,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListDetail {
    /// Also locate stripe metadata and report directory geometry.
    Stripes,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    /// Spans whose path starts with `--device`.
    Span,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocTarget {
    /// Only spans that hold no allocated stripe.
    Free,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindTarget {
    /// URLs read from `--input`.
    Url,
}

impl Cli {
    pub const fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Silent
        } else if self.verbose > 0 {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    pub const fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            write_enabled: self.write,
            verbosity: self.verbosity(),
        }
    }
}
