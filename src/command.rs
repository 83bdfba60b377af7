//! Command dispatcher: validate a [`Config`] and drive the matching engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::fs::{FileSystem, LocalFs};
use crate::logger::{Logger, NoopLogger};
use crate::sink::SinkEngine;
use crate::source::SourceEngine;

/// One invocation, as `scp -f` / `scp -t` would describe it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Read `target` and send it
    pub source: bool,
    /// Receive into `target`
    pub sink: bool,
    pub target: PathBuf,
    /// Allow directories
    pub recursive: bool,
    /// Source only: send modification/access times ahead of each unit
    pub preserve_times: bool,
    /// Sink only: fail unless `target` is an existing directory
    pub target_is_dir: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Source,
    Sink,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => write!(f, "source"),
            Role::Sink => write!(f, "sink"),
        }
    }
}

impl Config {
    /// Which side this configuration plays, or why it is unusable.
    pub fn role(&self) -> Result<Role> {
        let role = match (self.source, self.sink) {
            (true, false) => Role::Source,
            (false, true) => Role::Sink,
            _ => {
                return Err(Error::Configuration(
                    "exactly one of source or sink must be set".into(),
                ))
            }
        };
        if self.target.as_os_str().is_empty() {
            return Err(Error::Configuration("target path is empty".into()));
        }
        Ok(role)
    }
}

/// Statistics for one session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
}

impl TransferStats {
    pub fn add_file(&mut self, bytes: u64) {
        self.files += 1;
        self.bytes += bytes;
    }
}

/// A validated command ready to run against a stream.
///
/// `serve` borrows the engine mutably, so one engine drives one session at a
/// time. Run one engine per session to transfer in parallel.
pub struct Engine {
    config: Config,
    role: Role,
    fs: Arc<dyn FileSystem>,
    logger: Arc<dyn Logger>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        let role = config.role()?;
        Ok(Self {
            config,
            role,
            fs: Arc::new(LocalFs),
            logger: Arc::new(NoopLogger),
        })
    }

    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the session to completion over `stream`.
    ///
    /// Blocks until the peer finishes, fails, or the stream is closed. Closing
    /// the stream from elsewhere is the way to cancel.
    pub fn serve<S: Read + Write + ?Sized>(&mut self, stream: &mut S) -> Result<TransferStats> {
        let started = Instant::now();
        let target = &self.config.target;
        self.logger.start(self.role, target);

        let result = match self.role {
            Role::Source => SourceEngine::new(
                &*self.fs,
                &*self.logger,
                self.config.recursive,
                self.config.preserve_times,
            )
            .run(target, stream),
            Role::Sink => SinkEngine::new(&*self.fs, &*self.logger, self.config.recursive).run(
                target,
                self.config.target_is_dir,
                stream,
            ),
        };

        match &result {
            Ok(stats) => self
                .logger
                .done(stats.files, stats.bytes, started.elapsed().as_secs_f64()),
            Err(e) => self.logger.error(&self.role.to_string(), target, &e.to_string()),
        }
        result
    }
}
