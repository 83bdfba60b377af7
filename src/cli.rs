//! Command line of the `rscp` binary.
//!
//! Mirrors the flags a local `scp` passes to the remote end, so an SSH server
//! can exec `rscp` wherever it would exec `scp`.

use clap::Parser;
use std::path::PathBuf;

use crate::command::Config;

#[derive(Clone, Debug, Parser)]
#[command(
    author,
    version,
    about = "SCP protocol endpoint speaking over stdin/stdout"
)]
pub struct Args {
    /// Sink mode: receive into TARGET
    #[arg(short = 't', conflicts_with = "from")]
    pub to: bool,

    /// Source mode: send TARGET
    #[arg(short = 'f')]
    pub from: bool,

    /// Recursive: allow directories
    #[arg(short = 'r')]
    pub recursive: bool,

    /// Preserve modification and access times
    #[arg(short = 'p')]
    pub preserve: bool,

    /// TARGET must be a directory (sink mode)
    #[arg(short = 'd')]
    pub target_is_dir: bool,

    /// Log transfer events to stderr
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Write transfer events to a file instead of stderr
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Append a JSONL record of the session to this file
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// File or directory to send, or destination to receive into
    pub target: PathBuf,
}

impl Args {
    pub fn config(&self) -> Config {
        Config {
            source: self.from,
            sink: self.to,
            target: self.target.clone(),
            recursive: self.recursive,
            preserve_times: self.preserve,
            target_is_dir: self.target_is_dir,
        }
    }
}
