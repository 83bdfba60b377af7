//! Source side: serialize a local file or directory tree onto the stream.
//!
//! Every header goes out through [`SourceEngine::unit`], which writes the line
//! and then blocks for exactly one acknowledgment, so no code path can run
//! ahead of the sink. Directory trees are walked with an explicit frame stack
//! in name order, which keeps the output deterministic and the call depth flat
//! no matter how deep the tree is.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::ack::{self, Severity};
use crate::command::TransferStats;
use crate::error::{Error, Result};
use crate::fs::{FileInfo, FileKind, FileSystem};
use crate::logger::Logger;
use crate::protocol::{CHUNK_SIZE, MODE_MASK};
use crate::wire::{self, Header};

pub struct SourceEngine<'a> {
    fs: &'a dyn FileSystem,
    logger: &'a dyn Logger,
    recursive: bool,
    preserve_times: bool,
    stats: TransferStats,
    // Set once an error has already been sent to the sink
    reported: bool,
}

/// A directory whose header has been acknowledged and whose entries are being sent
struct DirFrame {
    path: PathBuf,
    entries: std::vec::IntoIter<OsString>,
}

impl<'a> SourceEngine<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        logger: &'a dyn Logger,
        recursive: bool,
        preserve_times: bool,
    ) -> Self {
        Self {
            fs,
            logger,
            recursive,
            preserve_times,
            stats: TransferStats::default(),
            reported: false,
        }
    }

    pub fn run<S: Read + Write + ?Sized>(
        mut self,
        target: &Path,
        stream: &mut S,
    ) -> Result<TransferStats> {
        // The sink speaks first to say it is ready
        ack::read_ack(stream)?;

        match self.send_root(target, stream) {
            Ok(()) => Ok(self.stats),
            Err(e) => {
                if e.is_reportable() && !self.reported {
                    let _ = ack::send_error(stream, Severity::Fatal, &format!("scp: {}", e));
                }
                Err(e)
            }
        }
    }

    fn send_root<S: Read + Write + ?Sized>(&mut self, target: &Path, stream: &mut S) -> Result<()> {
        let info = self.stat(target)?;
        let name = file_name(target, target.file_name())?;
        match info.kind {
            FileKind::File => self.send_file(stream, target, name, &info),
            FileKind::Directory if !self.recursive => Err(Error::RecursionDisabled {
                path: target.to_path_buf(),
            }),
            FileKind::Directory => self.send_tree(stream, target, name, &info),
            FileKind::Other => Err(Error::fs(
                target,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            )),
        }
    }

    fn send_tree<S: Read + Write + ?Sized>(
        &mut self,
        stream: &mut S,
        root: &Path,
        name: String,
        info: &FileInfo,
    ) -> Result<()> {
        let mut stack = vec![self.enter_dir(stream, root, name, info)?];

        while let Some(frame) = stack.last_mut() {
            let Some(entry) = frame.entries.next() else {
                self.unit(stream, &Header::EndDir)?;
                stack.pop();
                continue;
            };
            let path = frame.path.join(&entry);
            let info = self.stat(&path)?;
            match info.kind {
                FileKind::File => {
                    let name = file_name(&path, Some(&entry))?;
                    self.send_file(stream, &path, name, &info)?;
                }
                FileKind::Directory => {
                    let name = file_name(&path, Some(&entry))?;
                    let frame = self.enter_dir(stream, &path, name, &info)?;
                    stack.push(frame);
                }
                FileKind::Other => self.logger.skip(&path, "not a regular file"),
            }
        }
        Ok(())
    }

    fn enter_dir<S: Read + Write + ?Sized>(
        &mut self,
        stream: &mut S,
        path: &Path,
        name: String,
        info: &FileInfo,
    ) -> Result<DirFrame> {
        // List before announcing the directory so a failure is still reportable
        let entries = self
            .fs
            .list_entries(path)
            .map_err(|e| Error::fs(path, e))?;

        self.send_times(stream, info)?;
        self.unit(
            stream,
            &Header::Dir {
                mode: info.mode & MODE_MASK,
                name,
            },
        )?;
        self.stats.dirs += 1;
        self.logger.directory(path);

        Ok(DirFrame {
            path: path.to_path_buf(),
            entries: entries.into_iter(),
        })
    }

    fn send_file<S: Read + Write + ?Sized>(
        &mut self,
        stream: &mut S,
        path: &Path,
        name: String,
        info: &FileInfo,
    ) -> Result<()> {
        let mut reader = self.fs.open_read(path).map_err(|e| Error::fs(path, e))?;

        self.send_times(stream, info)?;
        self.unit(
            stream,
            &Header::File {
                mode: info.mode & MODE_MASK,
                size: info.size,
                name,
            },
        )?;
        self.send_body(stream, path, &mut reader, info.size)?;
        ack::read_ack(stream)?;

        self.stats.add_file(info.size);
        self.logger.copy_done(path, info.size);
        Ok(())
    }

    /// Write exactly `size` bytes followed by the end-of-file marker.
    fn send_body<S: Read + Write + ?Sized>(
        &mut self,
        stream: &mut S,
        path: &Path,
        reader: &mut dyn Read,
        size: u64,
    ) -> Result<()> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut remaining = size;
        let mut failure = None;

        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            match reader.read(&mut buf[..want]) {
                Ok(0) => {
                    failure = Some(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("file shrank while sending ({} bytes missing)", remaining),
                    ));
                    break;
                }
                Ok(n) => {
                    stream.write_all(&buf[..n])?;
                    remaining -= n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            // The sink counts bytes, so pad to the declared size and replace
            // the end-of-file marker with the error
            buf.fill(0);
            while remaining > 0 {
                let n = remaining.min(buf.len() as u64) as usize;
                stream.write_all(&buf[..n])?;
                remaining -= n as u64;
            }
            let err = Error::fs(path, e);
            self.reported = true;
            ack::send_error(stream, Severity::Fatal, &format!("scp: {}", err))?;
            return Err(err);
        }

        // End-of-file marker
        ack::send_ok(stream)
    }

    fn send_times<S: Read + Write + ?Sized>(&mut self, stream: &mut S, info: &FileInfo) -> Result<()> {
        if !self.preserve_times {
            return Ok(());
        }
        // The wire carries unsigned seconds; pre-epoch stamps go out as 0
        self.unit(
            stream,
            &Header::Times {
                mtime: info.mtime.max(0),
                atime: info.atime.max(0),
            },
        )
    }

    /// Send one header line and wait for its acknowledgment.
    fn unit<S: Read + Write + ?Sized>(&mut self, stream: &mut S, header: &Header) -> Result<()> {
        stream.write_all(&header.encode())?;
        stream.flush()?;
        ack::read_ack(stream)
    }

    fn stat(&self, path: &Path) -> Result<FileInfo> {
        self.fs.stat(path).map_err(|e| Error::fs(path, e))
    }
}

/// Base name as it goes on the wire.
fn file_name(path: &Path, name: Option<&std::ffi::OsStr>) -> Result<String> {
    let name = name
        .ok_or_else(|| {
            Error::fs(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })?
        .to_str()
        .ok_or_else(|| {
            Error::fs(
                path,
                io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8"),
            )
        })?;
    wire::validate_name(name)?;
    Ok(name.to_string())
}
