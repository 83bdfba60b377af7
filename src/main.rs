//! rscp - remote end of an SCP transfer
//!
//! Speaks the SCP protocol on stdin/stdout, the way `scp -t` / `scp -f` do
//! when an SSH server runs them for a client.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, Read, Write};
use std::sync::Arc;

use rscp::cli::Args;
use rscp::log::{SessionJournal, SessionRecord};
use rscp::logger::{Logger, NoopLogger, TextLogger};
use rscp::Engine;

/// stdin and stdout joined into one bidirectional stream
struct Stdio<R, W> {
    input: R,
    output: W,
}

impl<R: Read, W> Read for Stdio<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl<R, W: Write> Write for Stdio<R, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}

fn main() -> Result<()> {
    // Set up Ctrl-C handler
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let args = Args::parse();

    // Choose logger once; zero overhead in hot paths with NoopLogger
    let logger: Arc<dyn Logger> = if let Some(ref p) = args.log_file {
        Arc::new(
            TextLogger::new(p)
                .with_context(|| format!("Failed to open log file: {}", p.display()))?,
        )
    } else if args.verbose {
        Arc::new(TextLogger::stderr())
    } else {
        Arc::new(NoopLogger)
    };

    let config = args.config();
    let mut engine = Engine::new(config.clone())?.with_logger(logger);

    let mut stream = Stdio {
        input: io::stdin().lock(),
        output: io::stdout().lock(),
    };
    let outcome = engine.serve(&mut stream);

    if let Some(ref path) = args.journal {
        let record = SessionRecord::new(engine.role(), &config.target, &outcome);
        if let Err(e) = SessionJournal::new(path).add_entry(&record) {
            eprintln!("rscp: failed to write journal {}: {:#}", path.display(), e);
        }
    }

    outcome
        .map(|_| ())
        .with_context(|| format!("{} {} failed", engine.role(), config.target.display()))
}
