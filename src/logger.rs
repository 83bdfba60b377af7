use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::command::Role;

/// Per-unit transfer events. Every method defaults to doing nothing.
pub trait Logger: Send + Sync {
    fn start(&self, _role: Role, _target: &Path) {}
    fn copy_done(&self, _path: &Path, _bytes: u64) {}
    fn directory(&self, _path: &Path) {}
    fn skip(&self, _path: &Path, _reason: &str) {}
    fn error(&self, _context: &str, _path: &Path, _msg: &str) {}
    fn done(&self, _files: u64, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: Mutex::new(Box::new(f)),
        })
    }

    /// Log to stderr; stdout usually carries the protocol itself.
    pub fn stderr() -> Self {
        Self {
            out: Mutex::new(Box::new(std::io::stderr())),
        }
    }

    fn line(&self, s: &str) {
        let mut out = self.out.lock();
        let _ = writeln!(out, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn start(&self, role: Role, target: &Path) {
        self.line(&format!("START role={} target={}", role, target.display()));
    }
    fn copy_done(&self, path: &Path, bytes: u64) {
        self.line(&format!("COPY path={} bytes={}", path.display(), bytes));
    }
    fn directory(&self, path: &Path) {
        self.line(&format!("DIR path={}", path.display()));
    }
    fn skip(&self, path: &Path, reason: &str) {
        self.line(&format!("SKIP path={} reason={}", path.display(), reason));
    }
    fn error(&self, context: &str, path: &Path, msg: &str) {
        self.line(&format!("ERROR ctx={} path={} msg={}", context, path.display(), msg));
    }
    fn done(&self, files: u64, bytes: u64, seconds: f64) {
        self.line(&format!("DONE files={files} bytes={bytes} seconds={seconds:.3}"));
    }
}
