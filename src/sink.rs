//! Sink side: read units off the stream and rebuild them under the target.
//!
//! The engine pulls one control line at a time and answers every accepted
//! unit with a single acknowledgment, only after the unit is complete on disk.
//! Nested directories live on an explicit stack; a directory end marker with
//! nothing to pop, or a stream that ends while directories are still open,
//! is a desync.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use crate::ack::{self, Severity};
use crate::command::TransferStats;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::logger::Logger;
use crate::protocol::{CHUNK_SIZE, DEFAULT_DIR_MODE, MODE_MASK};
use crate::wire::{self, Header};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Times {
    mtime: i64,
    atime: i64,
}

/// Where top-level units land
#[derive(Debug, Clone, PartialEq, Eq)]
enum Destination {
    /// Target is a directory; units are created inside it
    Into(PathBuf),
    /// Target names the unit itself (renamed copy)
    Rename(PathBuf),
}

/// A file whose header was accepted and whose body is still on the wire
struct PendingFile {
    path: PathBuf,
    size: u64,
    mode: u32,
    times: Option<Times>,
    writer: Box<dyn Write + Send>,
}

struct DirFrame {
    path: PathBuf,
    times: Option<Times>,
    // Final mode when the directory was created with extra owner bits
    restore_mode: Option<u32>,
}

enum State {
    AwaitingHeader,
    ReceivingFileBody(PendingFile),
    Done,
}

pub struct SinkEngine<'a> {
    fs: &'a dyn FileSystem,
    logger: &'a dyn Logger,
    recursive: bool,
    stack: Vec<DirFrame>,
    pending_times: Option<Times>,
    // Missing target named with a trailing separator; created once a unit is accepted
    pending_root: Option<PathBuf>,
    stats: TransferStats,
}

impl<'a> SinkEngine<'a> {
    pub fn new(fs: &'a dyn FileSystem, logger: &'a dyn Logger, recursive: bool) -> Self {
        Self {
            fs,
            logger,
            recursive,
            stack: Vec::new(),
            pending_times: None,
            pending_root: None,
            stats: TransferStats::default(),
        }
    }

    /// Receive everything the source sends. A failure is answered with a
    /// fatal acknowledgment whenever the source can still read one.
    pub fn run<S: Read + Write + ?Sized>(
        mut self,
        target: &Path,
        target_is_dir: bool,
        stream: &mut S,
    ) -> Result<TransferStats> {
        match self.receive(target, target_is_dir, stream) {
            Ok(()) => Ok(self.stats),
            Err(e) => {
                if e.is_reportable() {
                    let _ = ack::send_error(stream, Severity::Fatal, &format!("scp: {}", e));
                }
                Err(e)
            }
        }
    }

    fn receive<S: Read + Write + ?Sized>(
        &mut self,
        target: &Path,
        target_is_dir: bool,
        stream: &mut S,
    ) -> Result<()> {
        let root = self.resolve_destination(target, target_is_dir)?;

        // Tell the source we are ready
        ack::send_ok(stream)?;

        let mut state = State::AwaitingHeader;
        loop {
            state = match state {
                State::AwaitingHeader => self.next_header(&root, stream)?,
                State::ReceivingFileBody(file) => {
                    self.receive_body(file, stream)?;
                    State::AwaitingHeader
                }
                State::Done => return Ok(()),
            };
        }
    }

    fn resolve_destination(&mut self, target: &Path, target_is_dir: bool) -> Result<Destination> {
        let trailing = has_trailing_separator(target);
        match self.fs.stat(target) {
            Ok(info) if info.is_dir() => Ok(Destination::Into(target.to_path_buf())),
            Ok(_) if trailing || target_is_dir => Err(Error::fs(
                target,
                io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            )),
            Ok(_) => Ok(Destination::Rename(target.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound && trailing => {
                self.pending_root = Some(target.to_path_buf());
                Ok(Destination::Into(target.to_path_buf()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && !target_is_dir => {
                Ok(Destination::Rename(target.to_path_buf()))
            }
            Err(e) => Err(Error::fs(target, e)),
        }
    }

    fn create_root(&mut self) -> Result<()> {
        if let Some(root) = self.pending_root.take() {
            self.fs
                .mkdir(&root, DEFAULT_DIR_MODE)
                .map_err(|e| Error::fs(&root, e))?;
            self.logger.directory(&root);
        }
        Ok(())
    }

    fn destination_for(&self, root: &Destination, name: &str) -> PathBuf {
        match (self.stack.last(), root) {
            (Some(frame), _) => frame.path.join(name),
            (None, Destination::Into(dir)) => dir.join(name),
            (None, Destination::Rename(path)) => path.clone(),
        }
    }

    fn next_header<S: Read + Write + ?Sized>(
        &mut self,
        root: &Destination,
        stream: &mut S,
    ) -> Result<State> {
        let Some(line) = wire::read_line(stream)? else {
            if !self.stack.is_empty() {
                return Err(Error::Desync(format!(
                    "stream ended with {} directories still open",
                    self.stack.len()
                )));
            }
            if self.pending_times.is_some() {
                return Err(Error::ProtocolSyntax(
                    "time header not followed by a file or directory".into(),
                ));
            }
            return Ok(State::Done);
        };

        // The source reports its own failures in place of a header
        if let Some(severity) = line.first().and_then(|&b| Severity::from_byte(b)) {
            return Err(Error::Peer {
                severity,
                message: String::from_utf8_lossy(&line[1..]).into_owned(),
            });
        }

        match Header::decode(&line)? {
            Header::Times { mtime, atime } => {
                self.pending_times = Some(Times { mtime, atime });
                ack::send_ok(stream)?;
                Ok(State::AwaitingHeader)
            }
            Header::File { mode, size, name } => {
                let path = self.destination_for(root, &name);
                let times = self.pending_times.take();
                self.create_root()?;
                let writer = self
                    .fs
                    .open_write(&path, mode)
                    .map_err(|e| Error::fs(&path, e))?;
                if let Err(e) = ack::send_ok(stream) {
                    drop(writer);
                    self.discard(&path);
                    return Err(e);
                }
                Ok(State::ReceivingFileBody(PendingFile {
                    path,
                    size,
                    mode,
                    times,
                    writer,
                }))
            }
            Header::Dir { mode, name } => {
                let path = self.destination_for(root, &name);
                if !self.recursive {
                    return Err(Error::RecursionDisabled { path });
                }
                let times = self.pending_times.take();
                self.create_root()?;
                let created = self.ensure_dir(&path, mode)?;
                let restore_mode = if times.is_some() || (created && mode & 0o700 != 0o700) {
                    Some(mode)
                } else {
                    None
                };
                self.stack.push(DirFrame {
                    path,
                    times,
                    restore_mode,
                });
                self.stats.dirs += 1;
                ack::send_ok(stream)?;
                Ok(State::AwaitingHeader)
            }
            Header::EndDir => {
                if self.pending_times.is_some() {
                    return Err(Error::ProtocolSyntax(
                        "time header not followed by a file or directory".into(),
                    ));
                }
                let frame = self.stack.pop().ok_or_else(|| {
                    Error::Desync("directory end without a matching directory start".into())
                })?;
                self.finish_dir(&frame)?;
                ack::send_ok(stream)?;
                Ok(State::AwaitingHeader)
            }
        }
    }

    /// Returns whether the directory had to be created.
    fn ensure_dir(&self, path: &Path, mode: u32) -> Result<bool> {
        match self.fs.stat(path) {
            Ok(info) if info.is_dir() => Ok(false),
            Ok(_) => Err(Error::fs(
                path,
                io::Error::new(io::ErrorKind::AlreadyExists, "exists and is not a directory"),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Owner needs full access to fill it; the real mode is restored on leave
                self.fs
                    .mkdir(path, (mode & MODE_MASK) | 0o700)
                    .map_err(|e| Error::fs(path, e))?;
                self.logger.directory(path);
                Ok(true)
            }
            Err(e) => Err(Error::fs(path, e)),
        }
    }

    fn finish_dir(&self, frame: &DirFrame) -> Result<()> {
        if let Some(mode) = frame.restore_mode {
            self.fs
                .chmod(&frame.path, mode)
                .map_err(|e| Error::fs(&frame.path, e))?;
        }
        if let Some(t) = frame.times {
            self.fs
                .set_times(&frame.path, t.atime, t.mtime)
                .map_err(|e| Error::fs(&frame.path, e))?;
        }
        Ok(())
    }

    fn receive_body<S: Read + Write + ?Sized>(
        &mut self,
        file: PendingFile,
        stream: &mut S,
    ) -> Result<()> {
        let PendingFile {
            path,
            size,
            mode,
            times,
            mut writer,
        } = file;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut remaining = size;
        // A local write failure does not stop the copy loop: the body still
        // has to be drained to keep the stream aligned
        let mut write_err = None;

        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match stream.read(&mut buf[..want]) {
                Ok(0) => {
                    drop(writer);
                    self.discard(&path);
                    return Err(Error::Desync(format!(
                        "stream ended after {} of {} bytes of {}",
                        size - remaining,
                        size,
                        path.display()
                    )));
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    drop(writer);
                    self.discard(&path);
                    return Err(e.into());
                }
            };
            if write_err.is_none() {
                if let Err(e) = writer.write_all(&buf[..n]) {
                    write_err = Some(e);
                }
            }
            remaining -= n as u64;
        }
        if write_err.is_none() {
            if let Err(e) = writer.flush() {
                write_err = Some(e);
            }
        }
        drop(writer);

        if let Err(e) = self.read_end_marker(stream, size) {
            self.discard(&path);
            return Err(e);
        }
        if let Some(e) = write_err {
            self.discard(&path);
            return Err(Error::fs(&path, e));
        }

        if let Some(t) = times {
            self.fs
                .chmod(&path, mode)
                .map_err(|e| Error::fs(&path, e))?;
            self.fs
                .set_times(&path, t.atime, t.mtime)
                .map_err(|e| Error::fs(&path, e))?;
        }

        self.stats.add_file(size);
        self.logger.copy_done(&path, size);
        ack::send_ok(stream)
    }

    /// The byte after the body is the source's own status for the file.
    fn read_end_marker<S: Read + ?Sized>(&self, stream: &mut S, size: u64) -> Result<()> {
        let mut byte = [0u8; 1];
        match stream.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(Error::Desync(format!(
                    "stream ended before the end-of-file marker after {} bytes",
                    size
                )))
            }
            Err(e) => return Err(e.into()),
        }
        match byte[0] {
            0 => Ok(()),
            b => match Severity::from_byte(b) {
                Some(severity) => Err(ack::read_peer_error(stream, severity)?),
                None => Err(Error::Desync(format!(
                    "expected end-of-file marker after {} bytes, got {:#04x}",
                    size, b
                ))),
            },
        }
    }

    // Drop what was written of a unit that did not complete
    fn discard(&self, path: &Path) {
        if let Err(e) = self.fs.remove_file(path) {
            self.logger.error("discard", path, &e.to_string());
        }
    }
}

fn has_trailing_separator(path: &Path) -> bool {
    let s = path.as_os_str().to_string_lossy();
    s.ends_with('/') || s.ends_with(MAIN_SEPARATOR)
}
